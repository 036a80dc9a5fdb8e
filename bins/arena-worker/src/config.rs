// Worker configuration
// Built once from the environment at startup and passed by reference

use anyhow::{bail, Context, Result};
use arena_common::config::StoreConfig;
use arena_common::languages::LanguageRegistry;
use arena_common::types::LanguageId;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_CASE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_DRIVER_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_JUDGE0_HOST: &str = "judge0-ce.p.rapidapi.com";
pub const DEFAULT_JUDGE0_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Remote,
}

/// Connection settings for a Judge0-compatible service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_host: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Wall-clock limit for one per-case run
    pub per_case: Duration,
    /// Wall-clock limit for a single-mode run or a whole injected driver
    pub driver: Duration,
    /// Allowance for compiling once before per-case runs
    pub compile: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            per_case: Duration::from_millis(DEFAULT_CASE_TIMEOUT_MS),
            driver: Duration::from_millis(DEFAULT_DRIVER_TIMEOUT_MS),
            compile: Duration::from_millis(DEFAULT_COMPILE_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    pub backend: BackendKind,
    pub remote: Option<RemoteConfig>,
    pub concurrency: usize,
    /// Raw language selectors; resolved against the registry by [`WorkerConfig::languages`]
    pub language_filter: Vec<String>,
    pub languages_file: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store = StoreConfig::from_lookup(&lookup)?;

        let backend = match lookup("ARENA_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("local") => BackendKind::Local,
            Some("remote") | Some("judge0") => BackendKind::Remote,
            Some(other) => bail!("ARENA_BACKEND must be 'local' or 'remote', got '{}'", other),
        };

        let remote = match backend {
            BackendKind::Local => None,
            BackendKind::Remote => Some(remote_config(&lookup)?),
        };

        let concurrency = parse_number(&lookup, "WORKER_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY as u64) as usize;
        if concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let language_filter = lookup("WORKER_LANGUAGES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            per_case: parse_millis(&lookup, "ARENA_CASE_TIMEOUT_MS")?.unwrap_or(defaults.per_case),
            driver: parse_millis(&lookup, "ARENA_DRIVER_TIMEOUT_MS")?.unwrap_or(defaults.driver),
            compile: parse_millis(&lookup, "ARENA_COMPILE_TIMEOUT_MS")?.unwrap_or(defaults.compile),
        };

        Ok(Self {
            store,
            backend,
            remote,
            concurrency,
            language_filter,
            languages_file: lookup("ARENA_LANGUAGES_FILE").map(PathBuf::from),
            timeouts,
        })
    }

    /// Languages this worker serves; every configured language when no filter is set
    pub fn languages(&self, registry: &LanguageRegistry) -> Result<Vec<LanguageId>> {
        if self.language_filter.is_empty() {
            return Ok(registry.ids());
        }
        let mut ids = Vec::new();
        for selector in &self.language_filter {
            let profile = registry
                .resolve(selector)
                .with_context(|| format!("WORKER_LANGUAGES names unknown language '{}'", selector))?;
            if !ids.contains(&profile.id) {
                ids.push(profile.id);
            }
        }
        Ok(ids)
    }
}

fn remote_config<F>(lookup: &F) -> Result<RemoteConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let api_key = lookup("JUDGE0_API_KEY").filter(|k| !k.trim().is_empty());
    let api_host = lookup("JUDGE0_API_HOST").filter(|h| !h.trim().is_empty());

    let base_url = match lookup("JUDGE0_URL") {
        Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
        // hosted RapidAPI deployment; requires a key
        _ => {
            if api_key.is_none() {
                bail!("remote backend needs JUDGE0_URL or JUDGE0_API_KEY");
            }
            format!("https://{}", api_host.as_deref().unwrap_or(DEFAULT_JUDGE0_HOST))
        }
    };

    // the RapidAPI gateway rejects keyed requests without a host header
    let api_host = match (&api_key, api_host) {
        (Some(_), None) => Some(DEFAULT_JUDGE0_HOST.to_string()),
        (_, host) => host,
    };

    Ok(RemoteConfig {
        base_url,
        api_key,
        api_host,
        request_timeout: parse_millis(lookup, "JUDGE0_REQUEST_TIMEOUT_MS")?
            .unwrap_or(Duration::from_millis(DEFAULT_JUDGE0_REQUEST_TIMEOUT_MS)),
    })
}

fn parse_number<F>(lookup: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, raw)),
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_number(lookup, key)?.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<WorkerConfig> {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        WorkerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.backend, BackendKind::Local);
        assert!(config.remote.is_none());
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn test_remote_with_rapidapi_key() {
        let config = config_from(&[("ARENA_BACKEND", "remote"), ("JUDGE0_API_KEY", "secret")]).unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.base_url, "https://judge0-ce.p.rapidapi.com");
        assert_eq!(remote.api_key.as_deref(), Some("secret"));
        assert_eq!(remote.api_host.as_deref(), Some(DEFAULT_JUDGE0_HOST));
    }

    #[test]
    fn test_remote_self_hosted() {
        let config = config_from(&[
            ("ARENA_BACKEND", "remote"),
            ("JUDGE0_URL", "http://judge0:2358/"),
            ("JUDGE0_REQUEST_TIMEOUT_MS", "2500"),
        ])
        .unwrap();
        let remote = config.remote.unwrap();
        assert_eq!(remote.base_url, "http://judge0:2358");
        assert!(remote.api_key.is_none());
        assert!(remote.api_host.is_none());
        assert_eq!(remote.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_remote_without_endpoint_is_rejected() {
        let err = config_from(&[("ARENA_BACKEND", "remote")]).unwrap_err();
        assert!(err.to_string().contains("JUDGE0_URL"));
    }

    #[test]
    fn test_rejects_unknown_backend_and_bad_numbers() {
        assert!(config_from(&[("ARENA_BACKEND", "docker")]).is_err());
        assert!(config_from(&[("WORKER_CONCURRENCY", "0")]).is_err());
        assert!(config_from(&[("ARENA_CASE_TIMEOUT_MS", "fast")]).is_err());
    }

    #[test]
    fn test_language_filter_resolution() {
        let registry = LanguageRegistry::builtin();
        let config = config_from(&[("WORKER_LANGUAGES", "python, 54,python")]).unwrap();
        assert_eq!(config.languages(&registry).unwrap(), vec![LanguageId(71), LanguageId(54)]);

        let all = config_from(&[]).unwrap();
        assert_eq!(all.languages(&registry).unwrap(), registry.ids());

        let unknown = config_from(&[("WORKER_LANGUAGES", "cobol")]).unwrap();
        assert!(unknown.languages(&registry).is_err());
    }
}
