use crate::error::StoreError;
use crate::types::{Job, JobId, JobMode, JobResult, JobStatus, LanguageId, PollStatus};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::error;

/// Redis queue semantics - the single definition of key layout
/// Keeps the API and workers from drifting apart

pub const QUEUE_PREFIX: &str = "arena:queue";
pub const RESULT_PREFIX: &str = "arena:result";
pub const STATUS_PREFIX: &str = "arena:status";

/// pending -> running, for exactly one caller
const CLAIM_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == 'pending' then
  redis.call('SET', KEYS[1], 'running', 'EX', ARGV[1])
  return 1
end
return 0
"#;

/// pending|running -> terminal; result and status are written together
const COMPLETE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == 'pending' or current == 'running' then
  redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
  redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
  return 1
end
return 0
"#;

/// Deterministic queue name for a language
pub fn queue_name(language: LanguageId) -> String {
    format!("{}:{}", QUEUE_PREFIX, language)
}

/// Result key for a job
pub fn result_key(job_id: &JobId) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

/// Status key for a job
pub fn status_key(job_id: &JobId) -> String {
    format!("{}:{}", STATUS_PREFIX, job_id)
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Record the job as pending and push it onto its language queue
/// Both writes happen in one MULTI so a queued job always has a status
pub async fn push_job(
    conn: &mut ConnectionManager,
    job: &Job,
    pending_ttl: Duration,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(job)?;

    redis::pipe()
        .atomic()
        .cmd("SET")
        .arg(status_key(&job.id))
        .arg(JobStatus::Pending.as_str())
        .arg("EX")
        .arg(ttl_secs(pending_ttl))
        .ignore()
        .cmd("RPUSH")
        .arg(queue_name(job.language))
        .arg(payload)
        .ignore()
        .query_async::<_, ()>(conn)
        .await?;

    Ok(())
}

/// Identity of a queued payload that no longer decodes as a [`Job`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableJob {
    pub job_id: JobId,
    pub mode: JobMode,
    pub total_cases: usize,
}

/// Recover enough of a broken payload to fail its job visibly
pub fn salvage_job(payload: &str) -> Option<UndecodableJob> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let job_id = value.get("id")?.as_str()?.parse().ok()?;
    let data = &value["payload"];
    let mode = match data["mode"].as_str() {
        Some("batch") => JobMode::Batch,
        _ => JobMode::Single,
    };
    let total_cases = match mode {
        JobMode::Batch => data["data"].as_array().map(Vec::len).unwrap_or(0),
        JobMode::Single => 0,
    };
    Some(UndecodableJob {
        job_id,
        mode,
        total_cases,
    })
}

/// Pop the next job from any of the given language queues
/// Uses BLPOP with a timeout so callers can observe shutdown
///
/// An entry that cannot be decoded is already off the queue, so its job is
/// completed as an infrastructure failure rather than left pending.
pub async fn pop_job(
    conn: &mut ConnectionManager,
    languages: &[LanguageId],
    timeout: Duration,
    result_ttl: Duration,
) -> Result<Option<Job>, StoreError> {
    let queues: Vec<String> = languages.iter().map(|l| queue_name(*l)).collect();
    let result: Option<(String, String)> = conn.blpop(queues, timeout.as_secs_f64()).await?;

    let Some((queue, payload)) = result else {
        return Ok(None);
    };
    match serde_json::from_str(&payload) {
        Ok(job) => Ok(Some(job)),
        Err(e) => {
            let message = format!("queued job could not be decoded: {}", e);
            match salvage_job(&payload) {
                Some(lost) => {
                    error!(job_id = %lost.job_id, queue = %queue, error = %e, "Dropping undecodable job");
                    let failed = JobResult::infrastructure(lost.job_id, lost.mode, lost.total_cases, message.clone());
                    store_result(conn, &failed, result_ttl).await?;
                }
                None => error!(queue = %queue, error = %e, "Dropping unidentifiable queue entry"),
            }
            Err(StoreError::Corrupt(message))
        }
    }
}

/// Claim a pending job; returns false if another worker got there first
/// or the job is gone
pub async fn claim_job(
    conn: &mut ConnectionManager,
    job_id: &JobId,
    pending_ttl: Duration,
) -> Result<bool, StoreError> {
    let script = redis::Script::new(CLAIM_SCRIPT);
    let claimed: i32 = script
        .key(status_key(job_id))
        .arg(ttl_secs(pending_ttl))
        .invoke_async(conn)
        .await?;
    Ok(claimed == 1)
}

/// Store the terminal result and status
/// A job that is already terminal keeps its first result
pub async fn store_result(
    conn: &mut ConnectionManager,
    result: &JobResult,
    result_ttl: Duration,
) -> Result<bool, StoreError> {
    let payload = serde_json::to_string(result)?;
    let script = redis::Script::new(COMPLETE_SCRIPT);
    let applied: i32 = script
        .key(status_key(&result.job_id))
        .key(result_key(&result.job_id))
        .arg(result.job_status().as_str())
        .arg(payload)
        .arg(ttl_secs(result_ttl))
        .invoke_async(conn)
        .await?;
    Ok(applied == 1)
}

/// Retrieve execution result from Redis
pub async fn get_result(
    conn: &mut ConnectionManager,
    job_id: &JobId,
) -> Result<Option<JobResult>, StoreError> {
    let payload: Option<String> = conn.get(result_key(job_id)).await?;

    match payload {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Current status of a job, combined with its result once terminal
pub async fn poll_job(conn: &mut ConnectionManager, job_id: &JobId) -> Result<PollStatus, StoreError> {
    let raw: Option<String> = conn.get(status_key(job_id)).await?;
    let status = match raw {
        Some(raw) => raw.parse::<JobStatus>().map_err(StoreError::Corrupt)?,
        None => return Ok(PollStatus::NotFound),
    };

    match status {
        JobStatus::Pending => Ok(PollStatus::Pending),
        JobStatus::Running => Ok(PollStatus::Running),
        JobStatus::Succeeded | JobStatus::Failed => match get_result(conn, job_id).await? {
            Some(result) => Ok(PollStatus::from_result(result)),
            // result expired between the two reads
            None => Ok(PollStatus::NotFound),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name(LanguageId(71)), "arena:queue:71");
        assert_eq!(queue_name(LanguageId(62)), "arena:queue:62");
    }

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        let key1 = result_key(&id);
        let key2 = result_key(&id);
        assert_eq!(key1, key2);
        assert!(key1.starts_with("arena:result:"));
    }

    #[test]
    fn test_status_key_format() {
        let id = Uuid::new_v4();
        let key = status_key(&id);
        assert!(key.starts_with("arena:status:"));
        assert!(key.contains(&id.to_string()));
    }

    #[test]
    fn test_ttl_never_zero() {
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_secs(90)), 90);
    }

    #[test]
    fn test_salvage_broken_batch_payload() {
        let id = Uuid::new_v4();
        // language id from a newer schema no longer decodes
        let payload = format!(
            r#"{{"id":"{}","language":"python","source_code":"x","payload":{{"mode":"batch","data":[{{"input":"1"}},{{"input":"2"}}]}}}}"#,
            id
        );
        assert!(serde_json::from_str::<Job>(&payload).is_err());

        let lost = salvage_job(&payload).unwrap();
        assert_eq!(lost.job_id, id);
        assert_eq!(lost.mode, JobMode::Batch);
        assert_eq!(lost.total_cases, 2);
    }

    #[test]
    fn test_salvage_needs_a_job_id() {
        assert!(salvage_job("not json").is_none());
        assert!(salvage_job(r#"{"id": "not-a-uuid"}"#).is_none());
        let single = salvage_job(&format!(r#"{{"id":"{}"}}"#, Uuid::new_v4())).unwrap();
        assert_eq!((single.mode, single.total_cases), (JobMode::Single, 0));
    }
}
