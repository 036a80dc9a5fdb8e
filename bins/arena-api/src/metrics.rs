// Prometheus counters for the HTTP front door

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Labels: `language`, `mode`
    pub static ref JOBS_SUBMITTED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_jobs_submitted_total", "Jobs accepted into the queue"),
        &["language", "mode"]
    )
    .expect("arena_jobs_submitted_total metric creation failed");

    pub static ref SUBMISSIONS_REJECTED_TOTAL: IntCounter = IntCounter::new(
        "arena_submissions_rejected_total",
        "Submissions rejected as invalid input"
    )
    .expect("arena_submissions_rejected_total metric creation failed");

    /// Labels: `status`
    pub static ref POLLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arena_polls_total", "Job polls by reported status"),
        &["status"]
    )
    .expect("arena_polls_total metric creation failed");
}

/// Register every metric with [`REGISTRY`]; safe to call more than once
pub fn register() {
    // AlreadyReg on repeated calls is expected
    let _ = REGISTRY.register(Box::new(JOBS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SUBMISSIONS_REJECTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(POLLS_TOTAL.clone()));
}

/// Text exposition of all registered metrics
pub fn gather() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
