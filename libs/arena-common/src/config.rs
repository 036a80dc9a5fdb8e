// Job store configuration
// Built once at process start and handed to the store

use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_RESULT_TTL_SECS: u64 = 86400;
pub const DEFAULT_PENDING_TTL_SECS: u64 = 86400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub redis_url: String,
    /// Retention of terminal results
    pub result_ttl: Duration,
    /// Retention of jobs that have not reached a terminal status
    pub pending_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
            pending_ttl: Duration::from_secs(DEFAULT_PENDING_TTL_SECS),
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            result_ttl: parse_secs(&lookup, "ARENA_RESULT_TTL_SECS")?.unwrap_or(defaults.result_ttl),
            pending_ttl: parse_secs(&lookup, "ARENA_PENDING_TTL_SECS")?.unwrap_or(defaults.pending_ttl),
        })
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::Invalid(format!("{} must be a whole number of seconds, got '{}'", key, raw))),
    }
}
