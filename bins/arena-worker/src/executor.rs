/// Job Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Drive one job from `Pending` to a terminal status.
///
/// **Architecture:**
/// 1. Claim the job in the store (exactly one worker wins)
/// 2. Single mode: run the source directly against the payload stdin
/// 3. Batch mode: ask the driver generator for a plan, run it, score it
/// 4. Write the terminal result
///
/// Every failure, including a panic inside execution, ends as a classified
/// result; nothing here leaves a job `Running`.
use crate::config::Timeouts;
use crate::driver::{DriverGenerator, ExecutionPlan};
use crate::engine::{ExecutionEngine, ProgramArtifact};
use crate::evaluator;
use arena_common::error::StoreError;
use arena_common::languages::LanguageRegistry;
use arena_common::store::JobStore;
use arena_common::types::{Job, JobPayload, JobResult, ResultStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Slack on top of a plan's budget and the engine's per-call overhead,
/// so the engine's own deadline fires first
const BUDGET_GRACE: Duration = Duration::from_secs(1);

/// Attempts for each store write a worker makes on a dequeued job
const STORE_ATTEMPTS: u32 = 3;

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(200 * attempt as u64)
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<LanguageRegistry>,
    engine: Arc<dyn ExecutionEngine>,
    generator: Arc<DriverGenerator>,
    timeouts: Timeouts,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        engine: Arc<dyn ExecutionEngine>,
        generator: Arc<DriverGenerator>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            registry,
            engine,
            generator,
            timeouts,
        }
    }

    /// Execute a job and produce its terminal result.
    ///
    /// Execution runs in its own task so a panic is caught at the join point.
    pub async fn execute(&self, job: Job) -> JobResult {
        let orchestrator = self.clone();
        let task_job = job.clone();
        let handle = tokio::spawn(async move { orchestrator.run(&task_job).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Execution task aborted");
                JobResult::infrastructure(
                    job.id,
                    job.mode(),
                    job.test_cases().len(),
                    format!("execution aborted: {}", e),
                )
            }
        }
    }

    async fn run(&self, job: &Job) -> JobResult {
        let Some(profile) = self.registry.get(job.language) else {
            error!(job_id = %job.id, language = %job.language, "Language is not configured on this worker");
            return JobResult::infrastructure(
                job.id,
                job.mode(),
                job.test_cases().len(),
                format!("language {} is not configured", job.language),
            );
        };

        match &job.payload {
            JobPayload::Single(stdin) => {
                let artifact = ProgramArtifact::new(profile, job.source_code.clone());
                let budget = self.timeouts.driver
                    + if profile.is_compiled() {
                        self.timeouts.compile
                    } else {
                        Duration::ZERO
                    };
                let run = self.engine.run(&artifact, stdin, self.timeouts.driver);
                match tokio::time::timeout(self.deadline(budget, 1), run).await {
                    Ok(outcome) => evaluator::single_result(job, outcome),
                    Err(_) => {
                        warn!(job_id = %job.id, budget_ms = budget.as_millis() as u64, "Job exceeded its budget");
                        evaluator::budget_exceeded(job, budget)
                    }
                }
            }
            JobPayload::Batch(_) => {
                let plan = match self.generator.plan(job, profile, &self.timeouts) {
                    Ok(plan) => plan,
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "Failed to build execution plan");
                        return JobResult::infrastructure(
                            job.id,
                            job.mode(),
                            job.test_cases().len(),
                            format!("failed to build execution plan: {}", e),
                        );
                    }
                };
                self.run_plan(job, plan).await
            }
        }
    }

    /// Outer wall-clock cut for `budget` spread over `calls` engine calls
    fn deadline(&self, budget: Duration, calls: usize) -> Duration {
        budget + self.engine.overhead() * calls.max(1) as u32 + BUDGET_GRACE
    }

    async fn run_plan(&self, job: &Job, plan: ExecutionPlan) -> JobResult {
        let budget = plan.budget();
        let calls = match &plan {
            ExecutionPlan::Driver { .. } => 1,
            ExecutionPlan::PerCase { inputs, .. } => inputs.len(),
        };
        let deadline = self.deadline(budget, calls);
        let start = Instant::now();

        let result = match plan {
            ExecutionPlan::Driver { artifact, markers, .. } => {
                let run = self.engine.run(&artifact, "", self.timeouts.driver);
                tokio::time::timeout(deadline, run)
                    .await
                    .map(|outcome| evaluator::score_driver(job, outcome, &markers))
            }
            ExecutionPlan::PerCase {
                artifact,
                inputs,
                per_case,
                ..
            } => {
                let run = self.engine.run_batch(&artifact, &inputs, per_case);
                tokio::time::timeout(deadline, run)
                    .await
                    .map(|outcomes| evaluator::score_per_case(job, outcomes, start.elapsed()))
            }
        };

        result.unwrap_or_else(|_| {
            warn!(job_id = %job.id, budget_ms = budget.as_millis() as u64, "Job exceeded its budget");
            evaluator::budget_exceeded(job, budget)
        })
    }
}

/// Claim, execute, and complete one dequeued job.
///
/// Returns the stored result, or `None` when another worker owns the job.
#[instrument(skip_all, fields(job_id = %job.id, language = %job.language, mode = %job.mode()))]
pub async fn process_job(
    store: &dyn JobStore,
    orchestrator: &Orchestrator,
    job: Job,
) -> Result<Option<JobResult>, StoreError> {
    let mut attempt = 1;
    let claimed = loop {
        match store.mark_running(job.id).await {
            Ok(claimed) => break claimed,
            Err(e) if attempt < STORE_ATTEMPTS => {
                warn!(error = %e, attempt, "Failed to claim job - retrying");
                tokio::time::sleep(retry_backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                // already popped from the queue: it stays pending until its TTL expires
                error!(error = %e, "Dequeued job could not be claimed - job lost");
                return Err(e);
            }
        }
    };
    if !claimed {
        warn!("Job already claimed or expired - skipping");
        return Ok(None);
    }

    info!(
        cases = job.test_cases().len(),
        source_size = job.source_code.len(),
        "Job started"
    );

    let result = orchestrator.execute(job).await;
    log_result(&result);

    attempt = 1;
    loop {
        match store.complete(&result).await {
            Ok(true) => break,
            Ok(false) => {
                warn!("Job was already terminal - result discarded");
                break;
            }
            Err(e) if attempt < STORE_ATTEMPTS => {
                warn!(error = %e, attempt, "Failed to persist result - retrying");
                tokio::time::sleep(retry_backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => {
                error!(error = %e, "Result could not be stored - job left running");
                return Err(e);
            }
        }
    }

    Ok(Some(result))
}

fn log_result(result: &JobResult) {
    let (passed, total) = result
        .report
        .as_ref()
        .map(|r| (r.passed, r.total))
        .unwrap_or_default();

    match result.status {
        ResultStatus::Accepted => info!(
            status = ?result.status,
            passed,
            total,
            wall_time_ms = result.wall_time_ms,
            "Job finished"
        ),
        ResultStatus::CompileError | ResultStatus::RuntimeError => warn!(
            status = ?result.status,
            passed,
            total,
            "Job failed"
        ),
        ResultStatus::Timeout => warn!(wall_time_ms = result.wall_time_ms, "Job timed out"),
        ResultStatus::ParseError => error!(
            error = result.error.as_deref().unwrap_or_default(),
            "Driver report could not be parsed"
        ),
        ResultStatus::InfrastructureError => error!(
            error = result.error.as_deref().unwrap_or_default(),
            "Job failed on infrastructure"
        ),
    }
}
