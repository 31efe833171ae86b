//! Session state for resumable tool servers.
//!
//! Provides:
//! - `AuthContextStore` - Per-session, multi-provider OAuth credentials
//! - `CapabilityBuilder` - Session-scoped tool servers gated on provider presence
//! - `SessionManager` - Session lifecycle and capability refresh
//! - Built-in tool groups (utility, jira, figma, confluence, jira+figma)

pub mod auth;
pub mod capabilities;
pub mod groups;
pub mod manager;
pub mod server;
pub mod tools;
pub mod upstream;

pub use auth::{AuthContext, AuthContextStore, AuthError, AuthSource, ProviderAuthInfo, is_token_expired};
pub use capabilities::{CapabilityBuilder, ToolGroup};
pub use manager::{ManagerError, SessionId, SessionManager};
pub use server::ToolServer;
pub use tools::{Tool, ToolContext, ToolDescriptor, ToolError};
pub use upstream::{UpstreamClient, UpstreamError, UpstreamRequest};
