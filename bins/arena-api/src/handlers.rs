// HTTP route handlers for the Arena API

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use arena_common::error::SubmitError;
use arena_common::languages::Strategy;
use arena_common::submission::{self, SubmitRequest, SubmitResponse};
use arena_common::types::{LanguageId, PollStatus};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

fn error_response(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "error": message.into(),
            "kind": kind,
        })),
    )
        .into_response()
}

/// POST /execute - Validate and queue a job
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            metrics::SUBMISSIONS_REJECTED_TOTAL.inc();
            debug!(error = %rejection, "Malformed submission body");
            return error_response(StatusCode::BAD_REQUEST, "invalid_input", rejection.body_text());
        }
    };

    let language = state
        .registry
        .get(LanguageId(request.language_id))
        .map(|p| p.name.clone())
        .unwrap_or_else(|| request.language_id.to_string());
    let mode = request.mode;

    match submission::submit(state.store.as_ref(), &state.registry, request).await {
        Ok(job_id) => {
            metrics::JOBS_SUBMITTED_TOTAL
                .with_label_values(&[language.as_str(), &mode.to_string()])
                .inc();
            (StatusCode::CREATED, Json(SubmitResponse { job_id })).into_response()
        }
        Err(SubmitError::InvalidInput(message)) => {
            metrics::SUBMISSIONS_REJECTED_TOTAL.inc();
            info!(language = %language, reason = %message, "Submission rejected");
            error_response(StatusCode::BAD_REQUEST, "invalid_input", message)
        }
        Err(SubmitError::Store(e)) => {
            error!(error = %e, "Failed to queue job");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
    }
}

/// GET /job/:job_id - Current status, with the result once terminal
pub async fn get_job_result(State(state): State<Arc<AppState>>, Path(job_id): Path<String>) -> Response {
    let job_uuid = match Uuid::parse_str(&job_id) {
        Ok(id) => id,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_input", "Invalid job ID format");
        }
    };

    match state.store.poll(job_uuid).await {
        Ok(polled) => {
            metrics::POLLS_TOTAL.with_label_values(&[polled.label()]).inc();
            let status = match &polled {
                PollStatus::Pending | PollStatus::Running => StatusCode::ACCEPTED,
                PollStatus::Succeeded { .. } | PollStatus::Failed { .. } => StatusCode::OK,
                PollStatus::NotFound => StatusCode::NOT_FOUND,
            };
            debug!(job_id = %job_uuid, status = polled.label(), "Job polled");
            (status, Json(polled)).into_response()
        }
        Err(e) => {
            error!(job_id = %job_uuid, error = %e, "Failed to query job status");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LanguageInfo {
    pub id: LanguageId,
    pub name: String,
    pub file_extension: String,
    pub strategy: &'static str,
}

/// GET /languages - Configured languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<LanguageInfo> = state
        .registry
        .profiles()
        .map(|p| LanguageInfo {
            id: p.id,
            name: p.name.clone(),
            file_extension: p.file_extension.clone(),
            strategy: match p.strategy {
                Strategy::DriverInjection { .. } => "driver_injection",
                Strategy::PerCaseLoop => "per_case_loop",
            },
        })
        .collect();
    (StatusCode::OK, Json(json!({ "languages": languages })))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_handler() -> Response {
    match metrics::gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
