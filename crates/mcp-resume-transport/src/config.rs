//! HTTP server settings.

use std::net::SocketAddr;

use mcp_resume_core::{ConfigError, ResumeConfig};
use serde::{Deserialize, Serialize};

/// Default listen address.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";

/// Default path of the single protocol endpoint.
pub const DEFAULT_ENDPOINT: &str = "/mcp";

/// Settings for the Streamable HTTP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Path serving `POST`/`GET`/`DELETE`; credentials live under
    /// `{endpoint_path}/credentials/{provider}`.
    pub endpoint_path: String,
    /// Server name reported by `initialize`.
    pub server_name: String,
    pub resume: ResumeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            endpoint_path: DEFAULT_ENDPOINT.to_string(),
            server_name: env!("CARGO_PKG_NAME").to_string(),
            resume: ResumeConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read `MCP_BIND_ADDR`, `MCP_ENDPOINT` and the [`ResumeConfig`] variables.
    ///
    /// # Errors
    /// Returns error if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    /// Returns error if a value is set but malformed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            resume: ResumeConfig::from_lookup(&lookup)?,
            ..Self::default()
        };

        if let Some(raw) = lookup("MCP_BIND_ADDR") {
            config.bind_addr = raw.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    key: "MCP_BIND_ADDR",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(raw) = lookup("MCP_ENDPOINT") {
            config.endpoint_path = normalize_path(&raw).ok_or_else(|| ConfigError::Invalid {
                key: "MCP_ENDPOINT",
                value: raw.clone(),
                reason: "must be a non-root path".to_string(),
            })?;
        }

        Ok(config)
    }
}

fn normalize_path(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.endpoint_path, "/mcp");
        assert_eq!(config.resume, ResumeConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("MCP_BIND_ADDR", "0.0.0.0:8080"),
            ("MCP_ENDPOINT", "rpc/"),
            ("MCP_MAX_STREAMS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.endpoint_path, "/rpc");
        assert_eq!(config.resume.max_streams, 5);
    }

    #[test]
    fn test_rejects_bad_values() {
        tokio_test::assert_err!(ServerConfig::from_lookup(lookup(&[("MCP_BIND_ADDR", "nope")])));
        tokio_test::assert_err!(ServerConfig::from_lookup(lookup(&[("MCP_ENDPOINT", "/")])));
    }
}
