//! Boundary to the upstream provider APIs (ticket tracker, design tool,
//! document store). Concrete API clients live outside this crate.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Upstream error.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The provider rejected the access token.
    #[error("Upstream rejected credentials")]
    Unauthorized,
    #[error("Upstream call failed: {0}")]
    Failed(String),
}

/// One call against a provider API.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamRequest<'a> {
    pub provider: &'a str,
    pub operation: &'a str,
    pub access_token: &'a str,
    pub arguments: &'a Value,
}

/// Client for the upstream provider APIs.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Perform `request.operation` against `request.provider`.
    async fn invoke(&self, request: UpstreamRequest<'_>) -> Result<Value, UpstreamError>;
}
