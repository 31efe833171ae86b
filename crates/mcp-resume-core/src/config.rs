//! Retention and expiry settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-stream event cap.
pub const DEFAULT_MAX_EVENTS_PER_STREAM: usize = 500;

/// Default number of streams tracked at once.
pub const DEFAULT_MAX_STREAMS: usize = 100;

/// Tokens expiring within this many seconds get a warning.
pub const DEFAULT_EXPIRY_WARNING_SECS: i64 = 300;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Settings shared by the event store and the auth context store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Events kept per stream before the oldest are dropped.
    pub max_events_per_stream: usize,
    /// Streams kept before the oldest stream is dropped wholesale.
    pub max_streams: usize,
    /// Advisory window for the "token expires soon" warning.
    pub expiry_warning_secs: i64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            max_events_per_stream: DEFAULT_MAX_EVENTS_PER_STREAM,
            max_streams: DEFAULT_MAX_STREAMS,
            expiry_warning_secs: DEFAULT_EXPIRY_WARNING_SECS,
        }
    }
}

impl ResumeConfig {
    /// Read overrides from `MCP_MAX_EVENTS_PER_STREAM`, `MCP_MAX_STREAMS`
    /// and `MCP_EXPIRY_WARNING_SECS`.
    ///
    /// # Errors
    /// Returns error if a variable is set but not a valid number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ResumeConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    /// Returns error if a value is set but not a valid number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("MCP_MAX_EVENTS_PER_STREAM") {
            config.max_events_per_stream = parse_limit("MCP_MAX_EVENTS_PER_STREAM", &raw)?;
        }
        if let Some(raw) = lookup("MCP_MAX_STREAMS") {
            config.max_streams = parse_limit("MCP_MAX_STREAMS", &raw)?;
        }
        if let Some(raw) = lookup("MCP_EXPIRY_WARNING_SECS") {
            config.expiry_warning_secs = raw.trim().parse().map_err(
                |e: std::num::ParseIntError| ConfigError::Invalid {
                    key: "MCP_EXPIRY_WARNING_SECS",
                    value: raw.clone(),
                    reason: e.to_string(),
                },
            )?;
        }

        Ok(config)
    }
}

fn parse_limit(key: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason,
    };
    let value: usize = raw.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    if value == 0 {
        return Err(invalid("must be at least 1".to_string()));
    }
    Ok(value)
}
