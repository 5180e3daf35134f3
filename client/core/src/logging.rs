//! Log level gating on top of `tracing`
//!
//! The client keeps its own verbosity knob so hosts can silence or widen its
//! output without touching their subscriber. Every message still goes through
//! `tracing` under the `prebid_blocking` target.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Client verbosity. A level includes every level ordered at or below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    #[default]
    Info = 1,
    Error = 2,
    Warning = 3,
    Debug = 4,
}

impl LogLevel {
    /// `true` when messages of `other` severity should be emitted at this level
    pub fn includes(self, other: LogLevel) -> bool {
        self >= other
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::None,
            1 => LogLevel::Info,
            2 => LogLevel::Error,
            3 => LogLevel::Warning,
            _ => LogLevel::Debug,
        }
    }

    /// Default `tracing` filter directive for this level
    fn directive(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Debug => "debug",
            _ => "info",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LogLevel::None),
            "info" => Ok(LogLevel::Info),
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Set the process-wide client log level
pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Current process-wide client log level
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

#[doc(hidden)]
pub fn enabled(level: LogLevel) -> bool {
    log_level().includes(level)
}

/// Install a fmt subscriber honouring `RUST_LOG`, falling back to `level`.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing(level: LogLevel) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prebid_blocking={}", level.directive())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::LogLevel::Info) {
            tracing::info!(target: "prebid_blocking", $($arg)*);
        }
    };
}

macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::LogLevel::Error) {
            tracing::error!(target: "prebid_blocking", $($arg)*);
        }
    };
}

macro_rules! log_warning {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::LogLevel::Warning) {
            tracing::warn!(target: "prebid_blocking", $($arg)*);
        }
    };
}

macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logging::enabled($crate::logging::LogLevel::Debug) {
            tracing::debug!(target: "prebid_blocking", $($arg)*);
        }
    };
}

pub(crate) use {log_debug, log_error, log_info, log_warning};
