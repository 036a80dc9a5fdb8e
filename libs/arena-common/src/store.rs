//! Job queue and state store.
//!
//! The store is the only state shared between the API and the workers. It
//! queues submitted jobs, hands each job to exactly one worker, and keeps the
//! status and terminal result of every job for a bounded retention window.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::redis as keys;
use crate::types::{Job, JobId, JobResult, JobStatus, LanguageId, PollStatus};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new job as pending and make it available to workers
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError>;

    /// Take the next job for any of `languages`, waiting up to `wait`
    async fn dequeue(&self, languages: &[LanguageId], wait: Duration) -> Result<Option<Job>, StoreError>;

    /// Move a job from pending to running; false if it was already claimed,
    /// finished, or expired
    async fn mark_running(&self, job_id: JobId) -> Result<bool, StoreError>;

    /// Write the terminal result; false if the job was already terminal or expired
    async fn complete(&self, result: &JobResult) -> Result<bool, StoreError>;

    async fn poll(&self, job_id: JobId) -> Result<PollStatus, StoreError>;
}

/// Production store backed by Redis lists and keys
#[derive(Clone)]
pub struct RedisJobStore {
    conn: redis::aio::ConnectionManager,
    config: StoreConfig,
}

impl RedisJobStore {
    /// Open a dedicated connection.
    ///
    /// BLPOP blocks the connection it runs on, so every worker loop opens its own.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        keys::push_job(&mut conn, job, self.config.pending_ttl).await
    }

    async fn dequeue(&self, languages: &[LanguageId], wait: Duration) -> Result<Option<Job>, StoreError> {
        let mut conn = self.conn.clone();
        keys::pop_job(&mut conn, languages, wait, self.config.result_ttl).await
    }

    async fn mark_running(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        keys::claim_job(&mut conn, &job_id, self.config.pending_ttl).await
    }

    async fn complete(&self, result: &JobResult) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        keys::store_result(&mut conn, result, self.config.result_ttl).await
    }

    async fn poll(&self, job_id: JobId) -> Result<PollStatus, StoreError> {
        let mut conn = self.conn.clone();
        keys::poll_job(&mut conn, &job_id).await
    }
}

struct Entry {
    status: JobStatus,
    result: Option<JobResult>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Job>,
    entries: HashMap<JobId, Entry>,
}

impl Inner {
    fn evict_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
        let entries = &self.entries;
        self.queue.retain(|job| entries.contains_key(&job.id));
    }
}

/// In-process store with the same semantics as the Redis store.
///
/// Expiry is evaluated lazily on every access. The mutex is only held for
/// map and queue manipulation, never across an await point.
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    notify: Notify,
    result_ttl: Duration,
    pending_ttl: Duration,
}

impl MemoryJobStore {
    pub fn new(result_ttl: Duration, pending_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            result_ttl,
            pending_ttl,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.result_ttl, config.pending_ttl)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a panic while holding the lock cannot leave the maps half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_take(&self, languages: &[LanguageId]) -> Option<Job> {
        let mut inner = self.lock();
        inner.evict_expired(Instant::now());
        let position = inner.queue.iter().position(|job| languages.contains(&job.language))?;
        inner.queue.remove(position)
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        {
            let mut inner = self.lock();
            let now = Instant::now();
            inner.evict_expired(now);
            inner.entries.insert(
                job.id,
                Entry {
                    status: JobStatus::Pending,
                    result: None,
                    expires_at: now + self.pending_ttl,
                },
            );
            inner.queue.push_back(job.clone());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, languages: &[LanguageId], wait: Duration) -> Result<Option<Job>, StoreError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(job) = self.try_take(languages) {
                return Ok(Some(job));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // a wakeup may be meant for a different language; re-check either way
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn mark_running(&self, job_id: JobId) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.evict_expired(now);
        match inner.entries.get_mut(&job_id) {
            Some(entry) if entry.status.can_advance_to(JobStatus::Running) => {
                entry.status = JobStatus::Running;
                entry.expires_at = now + self.pending_ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete(&self, result: &JobResult) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.evict_expired(now);
        let terminal = result.job_status();
        match inner.entries.get_mut(&result.job_id) {
            Some(entry) if entry.status.can_advance_to(terminal) => {
                entry.status = terminal;
                entry.result = Some(result.clone());
                entry.expires_at = now + self.result_ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn poll(&self, job_id: JobId) -> Result<PollStatus, StoreError> {
        let mut inner = self.lock();
        inner.evict_expired(Instant::now());
        let entry = match inner.entries.get(&job_id) {
            Some(entry) => entry,
            None => return Ok(PollStatus::NotFound),
        };
        match (entry.status, &entry.result) {
            (JobStatus::Pending, _) => Ok(PollStatus::Pending),
            (JobStatus::Running, _) => Ok(PollStatus::Running),
            (_, Some(result)) => Ok(PollStatus::from_result(result.clone())),
            (status, None) => Err(StoreError::Corrupt(format!(
                "job {} is {} without a result",
                job_id, status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BatchReport, JobMode, JobPayload, ResultStatus};
    use chrono::Utc;
    use uuid::Uuid;

    const PYTHON: LanguageId = LanguageId(71);
    const JAVA: LanguageId = LanguageId(62);

    fn make_job(language: LanguageId) -> Job {
        Job {
            id: Uuid::new_v4(),
            language,
            source_code: "print('hello')".to_string(),
            payload: JobPayload::Single(String::new()),
            submitted_at: Utc::now(),
        }
    }

    fn make_result(job: &Job, status: ResultStatus) -> JobResult {
        JobResult {
            job_id: job.id,
            mode: JobMode::Single,
            status,
            output: Some("hello".to_string()),
            stdout: Some("hello\n".to_string()),
            compile_log: None,
            error: None,
            report: None,
            wall_time_ms: 12,
            finished_at: Utc::now(),
        }
    }

    fn store() -> MemoryJobStore {
        MemoryJobStore::new(Duration::from_secs(60), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_poll_pending_right_after_submit() {
        let store = store();
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();

        assert_eq!(store.poll(job.id).await.unwrap(), PollStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = store();
        assert_eq!(store.poll(Uuid::new_v4()).await.unwrap(), PollStatus::NotFound);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = store();
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();

        let taken = store.dequeue(&[PYTHON], Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(taken.id, job.id);
        assert!(store.mark_running(job.id).await.unwrap());
        assert_eq!(store.poll(job.id).await.unwrap(), PollStatus::Running);

        let result = make_result(&job, ResultStatus::Accepted);
        assert!(store.complete(&result).await.unwrap());
        match store.poll(job.id).await.unwrap() {
            PollStatus::Succeeded { result: stored } => assert_eq!(stored, result),
            other => panic!("unexpected poll status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_is_claimed_once() {
        let store = store();
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();

        assert!(store.mark_running(job.id).await.unwrap());
        assert!(!store.mark_running(job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_status_never_regresses() {
        let store = store();
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();
        store.mark_running(job.id).await.unwrap();

        let failed = make_result(&job, ResultStatus::RuntimeError);
        assert!(store.complete(&failed).await.unwrap());

        let late = make_result(&job, ResultStatus::Accepted);
        assert!(!store.complete(&late).await.unwrap());
        assert!(!store.mark_running(job.id).await.unwrap());

        match store.poll(job.id).await.unwrap() {
            PollStatus::Failed { result } => assert_eq!(result.status, ResultStatus::RuntimeError),
            other => panic!("unexpected poll status {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_results_are_not_found() {
        let store = MemoryJobStore::new(Duration::ZERO, Duration::from_secs(60));
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();
        store.mark_running(job.id).await.unwrap();
        store.complete(&make_result(&job, ResultStatus::Accepted)).await.unwrap();

        assert_eq!(store.poll(job.id).await.unwrap(), PollStatus::NotFound);
    }

    #[tokio::test]
    async fn test_expired_pending_jobs_leave_the_queue() {
        let store = MemoryJobStore::new(Duration::from_secs(60), Duration::ZERO);
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();

        assert_eq!(store.poll(job.id).await.unwrap(), PollStatus::NotFound);
        assert!(store.dequeue(&[PYTHON], Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dequeue_filters_by_language() {
        let store = store();
        let java_job = make_job(JAVA);
        let python_job = make_job(PYTHON);
        store.enqueue(&java_job).await.unwrap();
        store.enqueue(&python_job).await.unwrap();

        let taken = store.dequeue(&[PYTHON], Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(taken.id, python_job.id);
        assert!(store.dequeue(&[PYTHON], Duration::ZERO).await.unwrap().is_none());

        let taken = store.dequeue(&[PYTHON, JAVA], Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(taken.id, java_job.id);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let store = store();
        let started = std::time::Instant::now();
        let taken = store.dequeue(&[PYTHON], Duration::from_millis(50)).await.unwrap();
        assert!(taken.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let store = std::sync::Arc::new(store());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.dequeue(&[PYTHON], Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();

        let taken = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(taken.id, job.id);
    }

    #[tokio::test]
    async fn test_batch_failure_result_keeps_total() {
        let store = store();
        let job = make_job(PYTHON);
        store.enqueue(&job).await.unwrap();
        store.mark_running(job.id).await.unwrap();

        let mut result = make_result(&job, ResultStatus::CompileError);
        result.mode = JobMode::Batch;
        result.report = Some(BatchReport::unscored(3, 0));
        store.complete(&result).await.unwrap();

        match store.poll(job.id).await.unwrap() {
            PollStatus::Failed { result } => {
                let report = result.report.unwrap();
                assert_eq!(report.total, 3);
                assert_eq!(report.passed, 0);
                assert!(report.cases.is_empty());
            }
            other => panic!("unexpected poll status {:?}", other),
        }
    }
}
