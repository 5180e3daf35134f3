//! Pre-bid Blocking Client
//!
//! Decides, per ad opportunity, whether the current device/session looks like
//! invalid traffic. Local device signals are combined with a remote fraud
//! probability, under a caller-supplied latency budget, with recent decisions
//! cached to avoid repeat network calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           DECISION ENGINE                               │
//! │                                                                         │
//! │  request_block_status(mode)                                             │
//! │        │                                                                │
//! │  ┌─────▼────────────────────────────────────────────┐                   │
//! │  │  Worker Pool (2-4 workers, queue depth 4)        │                   │
//! │  │   device id │ IPv4 │ IPv6 │ user agent           │◄── SignalProvider │
//! │  └─────┬────────────────────────────────────────────┘    (TTL memo)     │
//! │        │ join with deadline                                             │
//! │  ┌─────▼──────┐   hit   ┌──────────────┐                                │
//! │  │ ResultCache├────────►│  Classifier  ├──► BlockStatus                 │
//! │  └─────┬──────┘         └──────▲───────┘                                │
//! │        │ miss                  │                                        │
//! │  ┌─────▼──────────┐            │                                        │
//! │  │ ScoringClient  ├────────────┘                                        │
//! │  │ (HTTP + JSON)  │                                                     │
//! │  └────────────────┘                                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use prebid_blocking::{AppContext, BlockStatus, BlockingConfig, BlockingMode, DecisionEngine};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), prebid_blocking::BlockingError> {
//! let context = Arc::new(AppContext::new("com.example.app"));
//! let engine = DecisionEngine::new();
//! engine.initialize(&context, BlockingConfig::builder("api-key").threshold(0.8).build()?)?;
//!
//! match engine.request_block_status(BlockingMode::Default).await?.await {
//!     BlockStatus::Block => { /* skip the ad request */ }
//!     BlockStatus::Allow => { /* proceed */ }
//!     BlockStatus::Error { code, message } => eprintln!("{code}: {message}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod platform;
pub mod pool;
pub mod scoring;
pub mod signals;

use serde::{Deserialize, Serialize};

pub use cache::{CacheKey, ResultCache};
pub use config::{BlockingConfig, BlockingConfigBuilder, BlockingSettings, RetryPolicy};
pub use engine::{DecisionEngine, PendingStatus};
pub use error::{BlockingError, ConfigError, NetworkError, StateError};
pub use logging::{init_tracing, log_level, set_log_level, LogLevel};
pub use scoring::{HttpTransport, ScoringClient, ScoringTransport, TransportResponse};
pub use signals::{AppContext, SignalField, SignalProvider, SignalSet, SignalSource};

/// Blocking mode. The non-default modes are for testing ad loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockingMode {
    /// Score remotely and compare against the threshold
    #[default]
    Default,
    /// Always block, without a network call
    AlwaysBlock,
    /// Never block, without a network call
    NeverBlock,
}

impl BlockingMode {
    /// Verdict imposed by this mode, if any
    pub fn forced_verdict(self) -> Option<Verdict> {
        match self {
            BlockingMode::Default => None,
            BlockingMode::AlwaysBlock => Some(Verdict::Block),
            BlockingMode::NeverBlock => Some(Verdict::Allow),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Allow,
    Block,
}

/// Outcome of one request before classification
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Probability from the scoring service (`-1` when it sent none)
    Scored { probability: f64 },
    /// Imposed by a test mode
    Forced { verdict: Verdict, probability: f64 },
    /// Scoring failed; never cached
    Error(NetworkError),
}

impl Decision {
    pub fn forced(verdict: Verdict) -> Self {
        let probability = match verdict {
            Verdict::Block => 1.0,
            Verdict::Allow => 0.0,
        };
        Decision::Forced { verdict, probability }
    }

    pub fn probability(&self) -> Option<f64> {
        match self {
            Decision::Scored { probability } | Decision::Forced { probability, .. } => Some(*probability),
            Decision::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Decision::Error(_))
    }

    /// Block only when the probability is strictly above `threshold`
    pub fn classify(&self, threshold: f64) -> BlockStatus {
        match self {
            Decision::Forced { verdict: Verdict::Block, .. } => BlockStatus::Block,
            Decision::Forced { verdict: Verdict::Allow, .. } => BlockStatus::Allow,
            Decision::Scored { probability } if *probability > threshold => BlockStatus::Block,
            Decision::Scored { .. } => BlockStatus::Allow,
            Decision::Error(e) => BlockStatus::Error {
                code: e.code(),
                message: e.to_string(),
            },
        }
    }
}

/// Final answer delivered for each request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockStatus {
    Allow,
    Block,
    Error { code: u16, message: String },
}

impl BlockStatus {
    pub fn is_block(&self) -> bool {
        matches!(self, BlockStatus::Block)
    }

    /// Invoke exactly one listener method
    pub fn notify(&self, listener: &dyn BlockStatusListener) {
        match self {
            BlockStatus::Block => listener.on_block(),
            BlockStatus::Allow => listener.on_allow(),
            BlockStatus::Error { code, message } => listener.on_error(*code, message),
        }
    }
}

/// Callback-style receiver for [`DecisionEngine::request_block_status_with`]
pub trait BlockStatusListener: Send + Sync {
    /// Traffic looks invalid
    fn on_block(&self) {}
    /// Traffic looks valid
    fn on_allow(&self) {}
    /// The request failed (bad credentials, timeout, ...)
    fn on_error(&self, _code: u16, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_strict() {
        let threshold = 0.75;
        assert_eq!(Decision::Scored { probability: 0.9 }.classify(threshold), BlockStatus::Block);
        assert_eq!(Decision::Scored { probability: 0.75 }.classify(threshold), BlockStatus::Allow);
        assert_eq!(Decision::Scored { probability: 0.2 }.classify(threshold), BlockStatus::Allow);
        assert_eq!(Decision::Scored { probability: -1.0 }.classify(threshold), BlockStatus::Allow);
    }

    #[test]
    fn test_forced_verdicts_ignore_threshold() {
        let block = Decision::forced(Verdict::Block);
        assert_eq!(block.probability(), Some(1.0));
        assert_eq!(block.classify(1.0), BlockStatus::Block);

        let allow = Decision::forced(Verdict::Allow);
        assert_eq!(allow.probability(), Some(0.0));
        assert_eq!(allow.classify(0.1), BlockStatus::Allow);

        assert_eq!(BlockingMode::Default.forced_verdict(), None);
        assert_eq!(BlockingMode::AlwaysBlock.forced_verdict(), Some(Verdict::Block));
        assert_eq!(BlockingMode::default(), BlockingMode::Default);
    }

    #[test]
    fn test_error_decision_reports_code() {
        let decision = Decision::Error(NetworkError::Timeout);
        assert!(decision.is_error());
        assert_eq!(
            decision.classify(0.5),
            BlockStatus::Error { code: 408, message: "timeout".into() }
        );
    }

    #[test]
    fn test_notify_calls_one_method() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Recorder(Mutex<Vec<String>>);

        impl BlockStatusListener for Recorder {
            fn on_block(&self) {
                self.0.lock().unwrap().push("block".into());
            }
            fn on_error(&self, code: u16, message: &str) {
                self.0.lock().unwrap().push(format!("error {code} {message}"));
            }
        }

        let recorder = Recorder::default();
        BlockStatus::Block.notify(&recorder);
        BlockStatus::Allow.notify(&recorder);
        BlockStatus::Error { code: 500, message: "boom".into() }.notify(&recorder);

        assert_eq!(*recorder.0.lock().unwrap(), vec!["block".to_string(), "error 500 boom".to_string()]);
    }
}
