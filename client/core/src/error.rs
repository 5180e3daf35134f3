//! Error types for the blocking client

use thiserror::Error;

/// Invalid configuration, raised by [`crate::BlockingConfigBuilder::build`]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Threshold outside `[0.1, 1.0]`
    #[error("blocking threshold must be between 0.1 and 1.0 inclusive, got {0}")]
    InvalidThreshold(f64),

    /// Negative cache TTL
    #[error("ttl must be greater than or equal to 0, got {0}")]
    NegativeTtl(i64),

    /// Scoring endpoint is not a valid URL
    #[error("invalid scoring endpoint: {0}")]
    InvalidEndpoint(String),

    /// Settings file could not be read or written
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file is not valid JSON
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine used out of order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("engine must be initialized before use")]
    NotInitialized,
    #[error("application context has been released")]
    ContextReleased,
    #[error("engine must be initialized from within a Tokio runtime")]
    NoRuntime,
    #[error("signal worker pool has shut down")]
    PoolClosed,
}

/// Failure of the scoring round trip. Reported through the result, never raised.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// Deadline exhausted or transport timeout
    #[error("timeout")]
    Timeout,

    /// Non-OK status from the scoring service
    #[error("{message}")]
    HttpStatus { code: u16, message: String },

    /// Anything else: malformed URL, unreadable body, bad JSON
    #[error("{0}")]
    Unknown(String),
}

impl NetworkError {
    /// Numeric code reported to listeners
    pub fn code(&self) -> u16 {
        match self {
            NetworkError::Timeout => 408,
            NetworkError::HttpStatus { code, .. } => *code,
            NetworkError::Unknown(_) => 500,
        }
    }

    /// Whether a [`crate::RetryPolicy`] may try again after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetworkError::Unknown(_))
    }
}

/// Umbrella error for hosts that drive the whole client
#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
}
