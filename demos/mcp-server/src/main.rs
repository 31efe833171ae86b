//! Resumable tool server with a stub upstream.
//!
//! Run with: cargo run -p mcp-server-demo
//!
//! Then point a Streamable HTTP client at http://localhost:3000/mcp. Attach
//! provider credentials with
//! `PUT /mcp/credentials/{provider}` and a body like
//! `{"access_token": "...", "refresh_token": "...", "expires_at": 1900000000}`.

use std::sync::Arc;

use async_trait::async_trait;
use mcp_resume_session::{UpstreamClient, UpstreamError, UpstreamRequest};
use mcp_resume_transport::{McpService, ServerConfig, router};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Answers every upstream call with what it was asked.
struct EchoUpstream;

#[async_trait]
impl UpstreamClient for EchoUpstream {
    async fn invoke(&self, request: UpstreamRequest<'_>) -> Result<Value, UpstreamError> {
        if request.access_token.is_empty() {
            return Err(UpstreamError::Unauthorized);
        }
        tracing::debug!(
            provider = request.provider,
            operation = request.operation,
            "Upstream call"
        );
        Ok(json!({
            "provider": request.provider,
            "operation": request.operation,
            "arguments": request.arguments,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.bind_addr;
    let endpoint = config.endpoint_path.clone();

    let service = Arc::new(McpService::new(config, Arc::new(EchoUpstream)));
    let app = router(service).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{addr}{endpoint}");
    axum::serve(listener, app).await?;
    Ok(())
}
