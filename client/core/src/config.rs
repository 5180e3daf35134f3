//! Client configuration
//!
//! [`BlockingConfig`] is immutable once built. Changing settings means
//! building a new config and handing it to
//! [`crate::DecisionEngine::update_config`].

use crate::error::ConfigError;
use crate::logging::LogLevel;
use crate::scoring::DEFAULT_SCORING_ENDPOINT;
use crate::signals::SignalProvider;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const MIN_THRESHOLD: f64 = 0.1;
pub const MAX_THRESHOLD: f64 = 1.0;
pub const DEFAULT_THRESHOLD: f64 = 0.75;
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 2_000;
pub const DEFAULT_TTL_MS: i64 = 8 * 60 * 60 * 1_000;

/// Retry policy for the scoring call. Only unknown failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Validated, immutable client configuration
#[derive(Debug, Clone)]
pub struct BlockingConfig {
    api_key: String,
    threshold: f64,
    ttl: Duration,
    request_timeout: Duration,
    endpoint: Url,
    retry: RetryPolicy,
    provider: Arc<SignalProvider>,
}

impl BlockingConfig {
    pub fn builder(api_key: impl Into<String>) -> BlockingConfigBuilder {
        BlockingConfigBuilder::new(api_key)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Probabilities strictly above this are blocked
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Result cache lifetime; zero disables caching
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whole-request budget; zero means no deadline
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn provider(&self) -> &Arc<SignalProvider> {
        &self.provider
    }
}

/// Builder for [`BlockingConfig`]. Validation happens in [`build`](Self::build).
pub struct BlockingConfigBuilder {
    api_key: String,
    threshold: f64,
    ttl_ms: i64,
    request_timeout_ms: i64,
    endpoint: String,
    retry: RetryPolicy,
    provider: Option<SignalProvider>,
}

impl BlockingConfigBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            threshold: DEFAULT_THRESHOLD,
            ttl_ms: DEFAULT_TTL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            endpoint: DEFAULT_SCORING_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            provider: None,
        }
    }

    /// Blocking threshold, 0.1 to 1.0 inclusive
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Request budget in milliseconds; negative values become 0
    pub fn request_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.request_timeout_ms = timeout_ms.max(0);
        self
    }

    /// Cache lifetime in milliseconds; 0 disables the cache
    pub fn ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Custom signal provider. Defaults to the platform provider.
    pub fn provider(mut self, provider: SignalProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<BlockingConfig, ConfigError> {
        if !(MIN_THRESHOLD..=MAX_THRESHOLD).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.ttl_ms < 0 {
            return Err(ConfigError::NegativeTtl(self.ttl_ms));
        }
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::InvalidEndpoint(format!("{}: {e}", self.endpoint)))?;

        let ttl = Duration::from_millis(self.ttl_ms as u64);
        let request_timeout = Duration::from_millis(self.request_timeout_ms as u64);
        let provider = self
            .provider
            .unwrap_or_else(|| SignalProvider::platform(ttl, request_timeout));

        Ok(BlockingConfig {
            api_key: self.api_key,
            threshold: self.threshold,
            ttl,
            request_timeout,
            endpoint,
            retry: self.retry,
            provider: Arc::new(provider),
        })
    }
}

/// On-disk form of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingSettings {
    pub api_key: String,
    pub threshold: f64,
    pub ttl_ms: i64,
    pub request_timeout_ms: i64,
    pub endpoint: String,
    pub retry: RetryPolicy,
    pub log_level: LogLevel,
}

impl Default for BlockingSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            threshold: DEFAULT_THRESHOLD,
            ttl_ms: DEFAULT_TTL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            endpoint: DEFAULT_SCORING_ENDPOINT.to_string(),
            retry: RetryPolicy::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl BlockingSettings {
    /// Load from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn into_builder(self) -> BlockingConfigBuilder {
        BlockingConfigBuilder::new(self.api_key)
            .threshold(self.threshold)
            .ttl_ms(self.ttl_ms)
            .request_timeout_ms(self.request_timeout_ms)
            .endpoint(self.endpoint)
            .retry(self.retry)
    }
}
