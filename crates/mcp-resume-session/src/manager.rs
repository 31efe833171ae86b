//! Session manager: owns each session's tool server and credentials.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    auth::{AuthContext, AuthContextStore, ProviderAuthInfo},
    capabilities::CapabilityBuilder,
    server::ToolServer,
    tools::ToolContext,
};

/// Session identifier.
pub type SessionId = String;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Tracks live sessions and rebuilds their capabilities when credentials change.
pub struct SessionManager {
    auth_store: Arc<AuthContextStore>,
    builder: CapabilityBuilder,
    sessions: RwLock<HashMap<SessionId, Arc<ToolServer>>>,
}

impl SessionManager {
    /// Create a new session manager.
    #[must_use]
    pub fn new(auth_store: Arc<AuthContextStore>, builder: CapabilityBuilder) -> Self {
        Self {
            auth_store,
            builder,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The shared credential store.
    #[must_use]
    pub const fn auth_store(&self) -> &Arc<AuthContextStore> {
        &self.auth_store
    }

    /// Start a new session with whatever credentials are already known for it.
    pub async fn create_session(&self) -> SessionId {
        let session_id = Uuid::new_v4().to_string();
        let auth = self.auth_store.get_auth_context(&session_id);
        let server = Arc::new(self.builder.create_server(auth.as_deref()));

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), server);
        tracing::info!(session_id = %session_id, "Session created");
        session_id
    }

    /// Whether `session_id` is live.
    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether there are no live sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// The session's current tool server.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn server(&self, session_id: &str) -> Result<Arc<ToolServer>, ManagerError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))
    }

    /// Context handed to tool calls for `session_id`.
    #[must_use]
    pub fn tool_context(&self, session_id: &str) -> ToolContext {
        ToolContext::new(session_id.to_string(), Arc::clone(&self.auth_store))
    }

    /// Attach or refresh one provider's credentials and rebuild the session's tools.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn attach_provider(
        &self,
        session_id: &str,
        provider: &str,
        info: ProviderAuthInfo,
    ) -> Result<Arc<ToolServer>, ManagerError> {
        // Held through the rebuild; teardown clears credentials under the same lock.
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))?;
        let auth = self.auth_store.set_provider(session_id, provider, info);
        let server = Arc::new(self.builder.create_server(Some(&*auth)));
        *slot = Arc::clone(&server);
        Ok(server)
    }

    /// Replace the whole credential set and rebuild the session's tools.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn set_auth_context(
        &self,
        session_id: &str,
        mut context: AuthContext,
    ) -> Result<Arc<ToolServer>, ManagerError> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))?;
        context.session_id = Some(session_id.to_string());
        let auth = self.auth_store.set_auth_context(session_id, context);
        let server = Arc::new(self.builder.create_server(Some(&*auth)));
        *slot = Arc::clone(&server);
        Ok(server)
    }

    /// Rebuild the session's tool server from its current credentials.
    ///
    /// # Errors
    /// Returns error if the session does not exist.
    pub async fn refresh_capabilities(
        &self,
        session_id: &str,
    ) -> Result<Arc<ToolServer>, ManagerError> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.to_string()))?;
        let auth = self.auth_store.get_auth_context(session_id);
        let server = Arc::new(self.builder.create_server(auth.as_deref()));
        *slot = Arc::clone(&server);
        Ok(server)
    }

    /// Tear a session down and forget its credentials.
    ///
    /// Returns whether the session existed.
    pub async fn teardown(&self, session_id: &str) -> bool {
        let existed = {
            let mut sessions = self.sessions.write().await;
            let existed = sessions.remove(session_id).is_some();
            self.auth_store.clear_auth_context(session_id);
            existed
        };
        if existed {
            tracing::info!(session_id, "Session torn down");
        }
        existed
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        auth::now,
        groups::{FIGMA, JIRA},
        upstream::{UpstreamClient, UpstreamError, UpstreamRequest},
    };

    struct Echo;

    #[async_trait]
    impl UpstreamClient for Echo {
        async fn invoke(&self, request: UpstreamRequest<'_>) -> Result<Value, UpstreamError> {
            Ok(json!({ "provider": request.provider }))
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(AuthContextStore::new()),
            CapabilityBuilder::new(Arc::new(Echo)),
        )
    }

    fn live() -> ProviderAuthInfo {
        ProviderAuthInfo::new("a", "r", now() + 3600)
    }

    #[tokio::test]
    async fn test_new_session_has_utility_tools() {
        let manager = manager();
        let id = manager.create_session().await;

        let server = manager.server(&id).await.unwrap();
        assert!(server.has_tool("ping"));
        assert!(!server.has_group(JIRA));
    }

    #[tokio::test]
    async fn test_attach_provider_rebuilds_capabilities() {
        let manager = manager();
        let id = manager.create_session().await;

        manager.attach_provider(&id, JIRA, live()).await.unwrap();
        let server = manager.attach_provider(&id, FIGMA, live()).await.unwrap();
        assert!(server.has_group("jira_figma"));

        // The stored server is the rebuilt one.
        let current = manager.server(&id).await.unwrap();
        assert!(Arc::ptr_eq(&server, &current));

        let out = current
            .call_tool(
                "figma_get_file",
                json!({ "file_key": "k" }),
                &manager.tool_context(&id),
            )
            .await
            .unwrap();
        assert_eq!(out["provider"], "figma");
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = manager();
        assert!(matches!(
            manager.attach_provider("nope", JIRA, live()).await,
            Err(ManagerError::NotFound(_))
        ));
        assert!(manager.auth_store().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_clears_credentials() {
        let manager = manager();
        let id = manager.create_session().await;
        manager
            .set_auth_context(&id, AuthContext::default().with_provider(JIRA, live()))
            .await
            .unwrap();
        assert_eq!(
            manager.auth_store().get_auth_context(&id).unwrap().session_id.as_deref(),
            Some(id.as_str())
        );

        assert!(manager.teardown(&id).await);
        assert!(!manager.teardown(&id).await);
        assert!(manager.auth_store().get_auth_context(&id).is_none());
        assert!(manager.server(&id).await.is_err());
        assert!(manager.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_attach_racing_teardown_leaves_no_credentials() {
        let manager = Arc::new(manager());
        for _ in 0..100 {
            let id = manager.create_session().await;

            let attach = tokio::spawn({
                let manager = Arc::clone(&manager);
                let id = id.clone();
                async move { manager.attach_provider(&id, JIRA, live()).await.is_ok() }
            });
            let teardown = tokio::spawn({
                let manager = Arc::clone(&manager);
                let id = id.clone();
                async move { manager.teardown(&id).await }
            });
            attach.await.unwrap();
            assert!(teardown.await.unwrap());

            assert!(manager.auth_store().get_auth_context(&id).is_none());
            assert!(!manager.contains(&id).await);
        }
        assert!(manager.auth_store().is_empty());
    }
}
