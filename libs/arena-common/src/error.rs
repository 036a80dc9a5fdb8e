use thiserror::Error;

/// Failures of the job store itself (not of the jobs it holds)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt store entry: {0}")]
    Corrupt(String),
}

/// Rejection of a submission
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl SubmitError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SubmitError::InvalidInput(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
