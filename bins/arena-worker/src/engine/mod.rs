/// Execution Engine - Abstraction for Code Execution
///
/// **Core Responsibility:**
/// Run one program with one stdin under a wall-clock limit and report a
/// classified [`ExecutionOutcome`].
///
/// **Architectural Boundary:**
/// - Engines know HOW to execute (local subprocess, remote service)
/// - Engines do NOT know scoring rules or harness report formats
/// - Failures are outcomes, never `Err`: a backend that cannot run the
///   program reports `InfrastructureError`
use arena_common::languages::LanguageProfile;
use arena_common::types::{ExecutionOutcome, ExitClass, LanguageId};
use async_trait::async_trait;
use std::time::Duration;

pub mod local;
pub mod remote;

pub use local::LocalEngine;
pub use remote::RemoteEngine;

/// Source file ready to be built and run by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramArtifact {
    pub profile: LanguageProfile,
    pub source: String,
}

impl ProgramArtifact {
    pub fn new(profile: &LanguageProfile, source: impl Into<String>) -> Self {
        Self {
            profile: profile.clone(),
            source: source.into(),
        }
    }

    pub fn language(&self) -> LanguageId {
        self.profile.id
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn run(&self, artifact: &ProgramArtifact, stdin: &str, limit: Duration) -> ExecutionOutcome;

    /// Time one `run` may take beyond the program's own limit (queueing,
    /// network round trips). Added to the orchestrator's budget per call.
    fn overhead(&self) -> Duration {
        Duration::ZERO
    }

    /// Run the same program once per input, in order.
    ///
    /// Stops after the first outcome that is not `Accepted`; the returned
    /// vector is therefore shorter than `inputs` when a case aborts the batch.
    async fn run_batch(
        &self,
        artifact: &ProgramArtifact,
        inputs: &[String],
        per_case_limit: Duration,
    ) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(inputs.len());
        for stdin in inputs {
            let outcome = self.run(artifact, stdin, per_case_limit).await;
            let stop = outcome.exit_class != ExitClass::Accepted;
            outcomes.push(outcome);
            if stop {
                break;
            }
        }
        outcomes
    }
}
