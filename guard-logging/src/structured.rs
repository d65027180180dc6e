//! Tracing subscriber configuration
//!
//! Output is either human-readable (`pretty`) or one JSON object per line
//! (`json`). The level accepts anything [`EnvFilter`] understands, so both
//! `info` and `aixgo_guard_auth=debug,info` are valid.

use crate::{LoggingError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Environment variable for the log level / filter directive
pub const ENV_LOG_LEVEL: &str = "AIXGO_LOG_LEVEL";

/// Environment variable for the output format
pub const ENV_LOG_FORMAT: &str = "AIXGO_LOG_FORMAT";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// Newline-delimited JSON
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(LoggingError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `aixgo_guard_audit=debug,warn`
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Include the event target (module path) in output
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            include_target: true,
        }
    }
}

impl LoggingConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// Unknown formats fall back to the default with a warning on stderr,
    /// since the subscriber is not installed yet.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.trim().is_empty()) {
            config.level = level.trim().to_string();
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            match format.parse() {
                Ok(format) => config.format = format,
                Err(e) => eprintln!("ignoring {ENV_LOG_FORMAT}: {e}"),
            }
        }

        config
    }

    /// Builder: set the filter directive
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Builder: set the output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Parse the configured level into an [`EnvFilter`]
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.level)
            .map_err(|e| LoggingError::Config(format!("invalid log level '{}': {e}", self.level)))
    }
}

/// Install the global tracing subscriber.
///
/// Fails if the level cannot be parsed or a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target);

    let installed = match config.format {
        LogFormat::Json => builder
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    installed.map_err(|e| LoggingError::Tracing(e.to_string()))
}

#[cfg(test)]
#[path = "structured_tests.rs"]
mod structured_tests;
