/// Remote engine for a Judge0-compatible execution service
///
/// Submissions are sent synchronously (`wait=true`) with base64-encoded
/// source and stdin; the response is decoded and mapped onto an
/// [`ExecutionOutcome`].
use super::{ExecutionEngine, ProgramArtifact};
use crate::config::RemoteConfig;
use anyhow::{Context, Result};
use arena_common::types::ExecutionOutcome;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const SUBMISSIONS_PATH: &str = "/submissions";

#[derive(Debug, Serialize)]
struct SubmissionRequest {
    source_code: String,
    language_id: u32,
    stdin: String,
    cpu_time_limit: f64,
    wall_time_limit: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmissionStatus {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmissionResponse {
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub compile_output: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<SubmissionStatus>,
    /// CPU seconds as a decimal string
    #[serde(default)]
    pub time: Option<String>,
}

fn encode_b64(text: &str) -> String {
    general_purpose::STANDARD.encode(text.as_bytes())
}

/// Decode a base64 stream from the service.
///
/// The service wraps long payloads with newlines; text that is not valid
/// base64 is returned unchanged.
pub fn decode_b64(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    match general_purpose::STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(decoded) => decoded,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        },
        Err(_) => text.to_string(),
    }
}

/// Map a service response onto an outcome
pub fn classify_response(response: &SubmissionResponse, elapsed_ms: u64) -> ExecutionOutcome {
    let stdout = decode_b64(response.stdout.as_deref());
    let stderr = decode_b64(response.stderr.as_deref());
    let message = decode_b64(response.message.as_deref());
    let wall_time_ms = response
        .time
        .as_deref()
        .and_then(|t| t.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as u64)
        .unwrap_or(elapsed_ms);

    let (id, description) = match &response.status {
        Some(status) => (status.id, status.description.as_str()),
        None => (0, "missing status"),
    };

    match id {
        // 4 (wrong answer) only happens when expected output is sent; we never send it
        3 | 4 => ExecutionOutcome::accepted(stdout, stderr, wall_time_ms),
        5 => ExecutionOutcome::timeout(stdout, wall_time_ms),
        6 => ExecutionOutcome::compile_error(decode_b64(response.compile_output.as_deref()), wall_time_ms),
        7..=12 => {
            let detail = [stderr.as_str(), message.as_str()]
                .into_iter()
                .find(|s| !s.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| description.to_string());
            ExecutionOutcome::runtime_error(stdout, detail, wall_time_ms)
        }
        _ => {
            let mut detail = format!("execution service returned status {} ({})", id, description);
            if !message.trim().is_empty() {
                detail.push_str(": ");
                detail.push_str(message.trim());
            }
            ExecutionOutcome::infrastructure(detail)
        }
    }
}

pub struct RemoteEngine {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl RemoteEngine {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client for the execution service")?;
        Ok(Self { client, config })
    }

    fn submissions_url(&self) -> String {
        format!("{}{}", self.config.base_url, SUBMISSIONS_PATH)
    }
}

#[async_trait]
impl ExecutionEngine for RemoteEngine {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn overhead(&self) -> Duration {
        self.config.request_timeout
    }

    async fn run(&self, artifact: &ProgramArtifact, stdin: &str, limit: Duration) -> ExecutionOutcome {
        let body = SubmissionRequest {
            source_code: encode_b64(&artifact.source),
            language_id: artifact.language().0,
            stdin: encode_b64(stdin),
            cpu_time_limit: limit.as_secs_f64(),
            wall_time_limit: limit.as_secs_f64(),
        };

        let mut request = self
            .client
            .post(self.submissions_url())
            .query(&[("base64_encoded", "true"), ("wait", "true")])
            // the service queues before it runs; allow for both
            .timeout(self.config.request_timeout + limit)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-RapidAPI-Key", key);
        }
        if let Some(host) = &self.config.api_host {
            request = request.header("X-RapidAPI-Host", host);
        }

        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(language = %artifact.language(), "Execution service request timed out - abandoned");
                return ExecutionOutcome::timeout(String::new(), start.elapsed().as_millis() as u64);
            }
            Err(e) => {
                error!(error = %e, "Execution service unreachable");
                return ExecutionOutcome::infrastructure(format!("execution service unreachable: {}", e));
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(http_status = status.as_u16(), "Execution service rejected submission");
            return ExecutionOutcome::infrastructure(format!(
                "execution service error ({}): {}",
                status.as_u16(),
                text.trim()
            ));
        }

        match response.json::<SubmissionResponse>().await {
            Ok(parsed) => {
                debug!(
                    status_id = parsed.status.as_ref().map(|s| s.id).unwrap_or_default(),
                    elapsed_ms,
                    "Execution service responded"
                );
                classify_response(&parsed, elapsed_ms)
            }
            Err(e) if e.is_timeout() => ExecutionOutcome::timeout(String::new(), start.elapsed().as_millis() as u64),
            Err(e) => ExecutionOutcome::infrastructure(format!("malformed execution service response: {}", e)),
        }
    }
}
