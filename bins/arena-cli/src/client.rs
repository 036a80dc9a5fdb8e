// Thin HTTP client for the Arena API

use anyhow::{bail, Context, Result};
use arena_common::submission::{SubmitRequest, SubmitResponse};
use arena_common::types::{JobId, PollStatus};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct LanguageSummary {
    pub id: u32,
    pub name: String,
    pub file_extension: String,
    pub strategy: String,
}

#[derive(Debug, Deserialize)]
struct LanguagesResponse {
    languages: Vec<LanguageSummary>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(&self, request: &SubmitRequest) -> Result<JobId> {
        let response = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["error"].as_str().unwrap_or("no error message");
            bail!("Submission rejected ({}): {}", status, message);
        }

        let accepted: SubmitResponse = response.json().await.context("Malformed submit response")?;
        Ok(accepted.job_id)
    }

    pub async fn poll(&self, job_id: JobId) -> Result<PollStatus> {
        let response = self
            .http
            .get(format!("{}/job/{}", self.base_url, job_id))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        // 202, 200 and 404 all carry a poll body
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::BAD_REQUEST {
            bail!("Poll failed with {}", status);
        }
        response.json().await.context("Malformed poll response")
    }

    pub async fn languages(&self) -> Result<Vec<LanguageSummary>> {
        let response = self
            .http
            .get(format!("{}/languages", self.base_url))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?
            .error_for_status()?;
        let parsed: LanguagesResponse = response.json().await.context("Malformed languages response")?;
        Ok(parsed.languages)
    }
}
