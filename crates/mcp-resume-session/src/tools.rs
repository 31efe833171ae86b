//! Tool model shared by every tool group.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::{
    auth::{AuthContext, AuthContextStore, AuthError, AuthSource, ProviderAuthInfo, now},
    upstream::UpstreamError,
};

/// Tool error.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Provider {0} is not connected for this session")]
    MissingProvider(String),
    #[error("Re-authentication required for provider {provider}")]
    ReauthRequired { provider: String },
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl ToolError {
    /// Map an upstream failure for `provider`.
    #[must_use]
    pub fn from_upstream(provider: &str, err: UpstreamError) -> Self {
        match err {
            UpstreamError::Unauthorized => Self::ReauthRequired {
                provider: provider.to_string(),
            },
            UpstreamError::Failed(message) => Self::Upstream(message),
        }
    }

    /// Whether the client has to re-run authorization to recover.
    #[must_use]
    pub const fn requires_reauth(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::ReauthRequired { .. })
    }
}

/// Tool metadata as advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Descriptor whose input is an object of string properties.
    #[must_use]
    pub fn with_string_args(
        name: &str,
        description: &str,
        required: &[&str],
        optional: &[&str],
    ) -> Self {
        let properties: Map<String, Value> = required
            .iter()
            .chain(optional)
            .map(|arg| ((*arg).to_string(), json!({ "type": "string" })))
            .collect();
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Per-call context handed to tools.
#[derive(Clone)]
pub struct ToolContext {
    session_id: String,
    auth_store: Arc<AuthContextStore>,
}

impl ToolContext {
    /// Create a context for `session_id`.
    #[must_use]
    pub fn new(session_id: String, auth_store: Arc<AuthContextStore>) -> Self {
        Self {
            session_id,
            auth_store,
        }
    }

    /// Session the call belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stored context without expiry enforcement (for status reporting).
    #[must_use]
    pub fn auth_snapshot(&self) -> Option<Arc<AuthContext>> {
        self.auth_store.get_auth_context(&self.session_id)
    }

    /// Session-level credentials, enforcing session expiry.
    ///
    /// # Errors
    /// Returns [`ToolError::Auth`] if every provider token has expired.
    pub fn auth(&self) -> Result<Option<Arc<AuthContext>>, ToolError> {
        self.auth_store
            .get_auth_info(AuthSource::Session(&self.session_id))
            .map_err(ToolError::from)
    }

    /// Credentials for one provider, enforcing provider-level expiry.
    ///
    /// # Errors
    /// Returns error if the provider is missing or its token expired.
    pub fn provider_credentials(&self, provider: &str) -> Result<ProviderAuthInfo, ToolError> {
        let context = self
            .auth()?
            .ok_or_else(|| ToolError::MissingProvider(provider.to_string()))?;
        let info = context
            .provider(provider)
            .ok_or_else(|| ToolError::MissingProvider(provider.to_string()))?;
        if info.is_expired_at(now()) {
            return Err(ToolError::ReauthRequired {
                provider: provider.to_string(),
            });
        }
        Ok(info.clone())
    }
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Metadata advertised to clients.
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Pull a required string argument out of a tool call.
///
/// # Errors
/// Returns [`ToolError::InvalidArguments`] if it is missing or not a string.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string argument `{key}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with(store: AuthContextStore) -> ToolContext {
        ToolContext::new("s1".into(), Arc::new(store))
    }

    #[test]
    fn test_descriptor_schema() {
        let d = ToolDescriptor::with_string_args("t", "desc", &["a"], &["b"]);
        assert_eq!(d.input_schema["required"], json!(["a"]));
        assert_eq!(d.input_schema["properties"]["b"]["type"], "string");

        let wire = serde_json::to_value(&d).unwrap();
        assert!(wire.get("inputSchema").is_some());
    }

    #[test]
    fn test_provider_credentials_two_tier() {
        let store = AuthContextStore::new();
        let now = now();
        store.set_provider("s1", "jira", ProviderAuthInfo::new("a", "r", now - 1));
        store.set_provider("s1", "figma", ProviderAuthInfo::new("b", "r", now + 600));
        let ctx = ctx_with(store);

        assert_eq!(ctx.provider_credentials("figma").unwrap().access_token, "b");
        let err = ctx.provider_credentials("jira").unwrap_err();
        assert!(matches!(err, ToolError::ReauthRequired { ref provider } if provider == "jira"));
        assert!(err.requires_reauth());
        assert!(matches!(
            ctx.provider_credentials("confluence"),
            Err(ToolError::MissingProvider(_))
        ));
    }

    #[test]
    fn test_session_expiry_surfaces_invalid_token() {
        let store = AuthContextStore::new();
        store.set_provider("s1", "jira", ProviderAuthInfo::new("a", "r", now() - 1));
        let ctx = ctx_with(store);

        let err = ctx.provider_credentials("jira").unwrap_err();
        assert!(matches!(err, ToolError::Auth(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_required_str() {
        let args = json!({ "key": "ABC-1", "empty": "", "num": 3 });
        assert_eq!(required_str(&args, "key").unwrap(), "ABC-1");
        tokio_test::assert_err!(required_str(&args, "empty"));
        tokio_test::assert_err!(required_str(&args, "num"));
        tokio_test::assert_err!(required_str(&args, "missing"));
    }
}
