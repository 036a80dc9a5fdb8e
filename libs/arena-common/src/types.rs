use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type JobId = Uuid;

/// Numeric language identifier, shared with the remote execution service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageId(pub u32);

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Single,
    Batch,
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobMode::Single => write!(f, "single"),
            JobMode::Batch => write!(f, "batch"),
        }
    }
}

/// Test input as submitted: one scalar or an ordered list of scalars.
///
/// Scalars are kept textual; the harness decides the runtime type.
/// JSON numbers and booleans are accepted and converted to text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
#[serde(try_from = "serde_json::Value")]
pub enum TestInput {
    Scalar(String),
    List(Vec<String>),
}

impl TestInput {
    /// Program stdin for per-case execution: one element per line, newline terminated
    pub fn as_stdin(&self) -> String {
        let mut stdin = match self {
            TestInput::Scalar(value) => value.clone(),
            TestInput::List(items) => items.join("\n"),
        };
        if !stdin.ends_with('\n') {
            stdin.push('\n');
        }
        stdin
    }

    /// Human-readable rendering used in case reports
    pub fn echo(&self) -> String {
        match self {
            TestInput::Scalar(value) => value.clone(),
            TestInput::List(items) => items.join(", "),
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            TestInput::Scalar(value) => value.len(),
            TestInput::List(items) => items.iter().map(String::len).sum(),
        }
    }
}

impl TryFrom<serde_json::Value> for TestInput {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(scalar_text)
                .collect::<Result<Vec<_>, _>>()
                .map(TestInput::List),
            other => scalar_text(other).map(TestInput::Scalar),
        }
    }
}

fn scalar_text(value: serde_json::Value) -> Result<String, String> {
    match value {
        serde_json::Value::String(text) => Ok(text),
        serde_json::Value::Number(number) => Ok(number.to_string()),
        serde_json::Value::Bool(flag) => Ok(flag.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(format!("expected a scalar, found {}", other)),
    }
}

fn deserialize_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    scalar_text(value).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: TestInput,
    #[serde(alias = "output", deserialize_with = "deserialize_scalar")]
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

/// Mode-specific payload of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "data", rename_all = "snake_case")]
pub enum JobPayload {
    Single(String),
    Batch(Vec<TestCase>),
}

/// Immutable part of a job; this is what travels through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub language: LanguageId,
    pub source_code: String,
    pub payload: JobPayload,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn mode(&self) -> JobMode {
        match self.payload {
            JobPayload::Single(_) => JobMode::Single,
            JobPayload::Batch(_) => JobMode::Batch,
        }
    }

    pub fn test_cases(&self) -> &[TestCase] {
        match &self.payload {
            JobPayload::Single(_) => &[],
            JobPayload::Batch(cases) => cases,
        }
    }
}

/// Lifecycle status; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending | JobStatus::Running, JobStatus::Succeeded | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Classification of one backend invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    Accepted,
    CompileError,
    RuntimeError,
    Timeout,
    InfrastructureError,
}

/// Raw result of running one program once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub exit_class: ExitClass,
    pub stdout: String,
    pub stderr: String,
    pub compile_log: String,
    pub wall_time_ms: u64,
}

impl ExecutionOutcome {
    pub fn accepted(stdout: impl Into<String>, stderr: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            exit_class: ExitClass::Accepted,
            stdout: stdout.into(),
            stderr: stderr.into(),
            compile_log: String::new(),
            wall_time_ms,
        }
    }

    pub fn runtime_error(stdout: impl Into<String>, stderr: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            exit_class: ExitClass::RuntimeError,
            stdout: stdout.into(),
            stderr: stderr.into(),
            compile_log: String::new(),
            wall_time_ms,
        }
    }

    pub fn compile_error(compile_log: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            exit_class: ExitClass::CompileError,
            stdout: String::new(),
            stderr: String::new(),
            compile_log: compile_log.into(),
            wall_time_ms,
        }
    }

    pub fn timeout(stdout: impl Into<String>, wall_time_ms: u64) -> Self {
        Self {
            exit_class: ExitClass::Timeout,
            stdout: stdout.into(),
            stderr: String::from("[Execution timed out]"),
            compile_log: String::new(),
            wall_time_ms,
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self {
            exit_class: ExitClass::InfrastructureError,
            stdout: String::new(),
            stderr: message.into(),
            compile_log: String::new(),
            wall_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    RuntimeError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub index: usize,
    pub verdict: Verdict,
    pub input_echo: String,
    pub expected: String,
    pub actual: String,
    pub error: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub passed: usize,
    pub runtime_ms: u64,
    pub cases: Vec<CaseResult>,
}

impl BatchReport {
    /// Report for a batch that produced no scored cases
    pub fn unscored(total: usize, runtime_ms: u64) -> Self {
        Self {
            total,
            passed: 0,
            runtime_ms,
            cases: Vec::new(),
        }
    }
}

/// Final classification written into a job's result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Accepted,
    CompileError,
    RuntimeError,
    Timeout,
    ParseError,
    InfrastructureError,
}

impl ResultStatus {
    pub fn job_status(self) -> JobStatus {
        match self {
            ResultStatus::Accepted => JobStatus::Succeeded,
            _ => JobStatus::Failed,
        }
    }
}

impl From<ExitClass> for ResultStatus {
    fn from(class: ExitClass) -> Self {
        match class {
            ExitClass::Accepted => ResultStatus::Accepted,
            ExitClass::CompileError => ResultStatus::CompileError,
            ExitClass::RuntimeError => ResultStatus::RuntimeError,
            ExitClass::Timeout => ResultStatus::Timeout,
            ExitClass::InfrastructureError => ResultStatus::InfrastructureError,
        }
    }
}

/// Terminal record of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub mode: JobMode,
    pub status: ResultStatus,
    /// User-facing text (single mode)
    pub output: Option<String>,
    /// Raw program stdout (single mode)
    pub stdout: Option<String>,
    pub compile_log: Option<String>,
    pub error: Option<String>,
    pub report: Option<BatchReport>,
    pub wall_time_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    pub fn job_status(&self) -> JobStatus {
        self.status.job_status()
    }

    /// Failure result for a job whose execution could not be classified
    pub fn infrastructure(job_id: JobId, mode: JobMode, total_cases: usize, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            job_id,
            mode,
            status: ResultStatus::InfrastructureError,
            output: match mode {
                JobMode::Single => Some(format!("System Error: {}", message)),
                JobMode::Batch => None,
            },
            stdout: None,
            compile_log: None,
            error: Some(message),
            report: match mode {
                JobMode::Single => None,
                JobMode::Batch => Some(BatchReport::unscored(total_cases, 0)),
            },
            wall_time_ms: 0,
            finished_at: Utc::now(),
        }
    }
}

/// Answer to a poll by job id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollStatus {
    Pending,
    Running,
    Succeeded { result: JobResult },
    Failed { result: JobResult },
    NotFound,
}

impl PollStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PollStatus::Pending => "pending",
            PollStatus::Running => "running",
            PollStatus::Succeeded { .. } => "succeeded",
            PollStatus::Failed { .. } => "failed",
            PollStatus::NotFound => "not_found",
        }
    }

    pub fn from_result(result: JobResult) -> Self {
        match result.job_status() {
            JobStatus::Succeeded => PollStatus::Succeeded { result },
            _ => PollStatus::Failed { result },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollStatus::Succeeded { .. } | PollStatus::Failed { .. })
    }
}
