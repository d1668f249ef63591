//! Tracing/logging initialization.
//!
//! Filtering follows `RUST_LOG` when set, otherwise the configured default.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "COOP_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per event, with timestamps.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Directive used when `RUST_LOG` is absent.
    pub default_filter: String,
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: "info".to_string(),
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Defaults, with the format taken from `COOP_LOG_FORMAT` (`json` or
    /// `pretty`) when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup(ENV_LOG_FORMAT).as_deref().map(str::trim) {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };
        Self {
            format,
            ..Self::default()
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_filter))
    }
}

/// Initialize tracing/logging for the process from the environment.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(&LogConfig::from_env());
}

pub fn init_with(config: &LogConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.with_target);

    let _ = match config.format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    ::tracing::debug!(format = ?config.format, filter = %config.default_filter, "logging initialized");
}

/// Human-readable output captured by the test harness, `warn` unless
/// `RUST_LOG` says otherwise.
pub fn init_for_tests() {
    let config = LogConfig {
        format: LogFormat::Pretty,
        default_filter: "warn".to_string(),
        with_target: true,
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_target(config.with_target)
        .with_test_writer()
        .try_init();
}
