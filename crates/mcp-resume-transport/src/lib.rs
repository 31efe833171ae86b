//! Streamable HTTP transport with resumable SSE streams.
//!
//! Provides:
//! - JSON-RPC wire types
//! - Per-session stream registry and the stale-registration reconciler
//! - Axum router serving `POST`/`GET`/`DELETE` on one endpoint

pub mod config;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod streams;

pub use config::ServerConfig;
pub use error::TransportError;
pub use protocol::{JsonRpcMessage, LAST_EVENT_ID_HEADER, SESSION_ID_HEADER};
pub use reconcile::cleanup_stale_stream_mappings;
pub use registry::{OutboundEvent, RegistryError, StreamRegistry};
pub use server::{McpService, router};
pub use streams::{ResumeError, SessionStreams};
