//! Submission validation
//!
//! Turns a caller's request into a queued [`Job`]. Everything that can be
//! rejected is rejected here, synchronously, before the job reaches the queue.

use crate::error::SubmitError;
use crate::languages::LanguageRegistry;
use crate::store::JobStore;
use crate::types::{Job, JobId, JobMode, JobPayload, LanguageId, TestCase};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const MAX_SOURCE_BYTES: usize = 1024 * 1024;
pub const MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_TEST_CASES: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub source_code: String,
    pub language_id: u32,
    pub mode: JobMode,
    /// stdin text for single mode; test case list (or its JSON text) for batch mode
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Validate a request and build the job it describes
pub fn build_job(request: SubmitRequest, registry: &LanguageRegistry) -> Result<Job, SubmitError> {
    if request.source_code.trim().is_empty() {
        return Err(SubmitError::invalid("source_code must not be empty"));
    }
    if request.source_code.len() > MAX_SOURCE_BYTES {
        return Err(SubmitError::invalid(format!(
            "source_code exceeds {} bytes",
            MAX_SOURCE_BYTES
        )));
    }

    let language = LanguageId(request.language_id);
    if registry.get(language).is_none() {
        return Err(SubmitError::invalid(format!("unknown language id {}", language)));
    }

    let payload = match request.mode {
        JobMode::Single => JobPayload::Single(parse_stdin(request.payload)?),
        JobMode::Batch => JobPayload::Batch(parse_test_cases(request.payload)?),
    };

    Ok(Job {
        id: Uuid::new_v4(),
        language,
        source_code: request.source_code,
        payload,
        submitted_at: Utc::now(),
    })
}

fn parse_stdin(payload: serde_json::Value) -> Result<String, SubmitError> {
    let stdin = match payload {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        _ => return Err(SubmitError::invalid("single mode payload must be a string")),
    };
    if stdin.len() > MAX_INPUT_BYTES {
        return Err(SubmitError::invalid(format!("stdin exceeds {} bytes", MAX_INPUT_BYTES)));
    }
    Ok(stdin)
}

fn parse_test_cases(payload: serde_json::Value) -> Result<Vec<TestCase>, SubmitError> {
    // the course backend stores test cases as a JSON string
    let payload = match payload {
        serde_json::Value::String(text) => serde_json::from_str(&text)
            .map_err(|e| SubmitError::invalid(format!("test cases are not valid JSON: {}", e)))?,
        other => other,
    };
    if !payload.is_array() {
        return Err(SubmitError::invalid("batch mode payload must be a list of test cases"));
    }

    let cases: Vec<TestCase> = serde_json::from_value(payload)
        .map_err(|e| SubmitError::invalid(format!("malformed test case: {}", e)))?;

    if cases.is_empty() {
        return Err(SubmitError::invalid("batch mode requires at least one test case"));
    }
    if cases.len() > MAX_TEST_CASES {
        return Err(SubmitError::invalid(format!(
            "at most {} test cases are allowed, got {}",
            MAX_TEST_CASES,
            cases.len()
        )));
    }
    if let Some(index) = cases.iter().position(|c| c.input.byte_len() > MAX_INPUT_BYTES) {
        return Err(SubmitError::invalid(format!(
            "input of test case {} exceeds {} bytes",
            index, MAX_INPUT_BYTES
        )));
    }
    Ok(cases)
}

/// Validate, enqueue, and return the new job id without waiting for execution
pub async fn submit(
    store: &dyn JobStore,
    registry: &LanguageRegistry,
    request: SubmitRequest,
) -> Result<JobId, SubmitError> {
    let job = build_job(request, registry)?;
    store.enqueue(&job).await?;

    info!(
        job_id = %job.id,
        language = %job.language,
        mode = %job.mode(),
        cases = job.test_cases().len(),
        "Job queued"
    );
    Ok(job.id)
}
