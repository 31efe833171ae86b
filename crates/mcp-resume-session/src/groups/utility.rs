//! Provider-independent tools, available to every session.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    auth::{AuthContext, now},
    capabilities::ToolGroup,
    server::ToolServer,
    tools::{Tool, ToolContext, ToolDescriptor, ToolError},
};

/// `ping` and `whoami`.
pub struct UtilityGroup;

impl ToolGroup for UtilityGroup {
    fn name(&self) -> &str {
        "utility"
    }

    fn required_providers(&self) -> &[&'static str] {
        &[]
    }

    fn register_tools(&self, server: &mut ToolServer, _auth: &AuthContext) {
        server.register(Arc::new(Ping));
        server.register(Arc::new(WhoAmI));
    }
}

struct Ping;

#[async_trait]
impl Tool for Ping {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::with_string_args("ping", "Check that the server is reachable", &[], &[])
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(json!({ "pong": true, "timestamp": now() }))
    }
}

struct WhoAmI;

#[async_trait]
impl Tool for WhoAmI {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::with_string_args(
            "whoami",
            "Show the session id and which providers are connected",
            &[],
            &[],
        )
    }

    async fn call(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let now = now();
        let snapshot = ctx.auth_snapshot();

        let providers: Vec<Value> = snapshot
            .as_deref()
            .map(|auth| {
                auth.providers
                    .iter()
                    .map(|(name, info)| {
                        json!({
                            "provider": name,
                            "expired": info.is_expired_at(now),
                            "expires_in_secs": info.remaining_secs(now).max(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "session_id": ctx.session_id(),
            "subject": snapshot.as_deref().and_then(|auth| auth.subject.clone()),
            "providers": providers,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthContextStore, ProviderAuthInfo};

    #[tokio::test]
    async fn test_whoami_reports_expired_providers_without_failing() {
        let store = Arc::new(AuthContextStore::new());
        store.set_provider("s1", "jira", ProviderAuthInfo::new("a", "r", now() - 10));
        let ctx = ToolContext::new("s1".into(), Arc::clone(&store));

        let mut server = ToolServer::new();
        UtilityGroup.register_tools(&mut server, &AuthContext::default());

        let out = server.call_tool("whoami", json!({}), &ctx).await.unwrap();
        assert_eq!(out["session_id"], "s1");
        assert_eq!(out["providers"][0]["provider"], "jira");
        assert_eq!(out["providers"][0]["expired"], true);
        assert_eq!(out["providers"][0]["expires_in_secs"], 0);
    }

    #[tokio::test]
    async fn test_ping_without_credentials() {
        let ctx = ToolContext::new("anon".into(), Arc::new(AuthContextStore::new()));
        let out = Ping.call(json!({}), &ctx).await.unwrap();
        assert_eq!(out["pong"], true);
    }
}
