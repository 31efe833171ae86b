//! Authorization seam. OAuth mechanics live outside this crate.

use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

use crate::error::ClientError;

/// Bearer credentials for one server.
#[derive(Clone, PartialEq, Eq)]
pub struct Grant {
    pub access_token: String,
}

impl Grant {
    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("access_token", &"[redacted]")
            .finish()
    }
}

/// Result of an authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(Grant),
    /// The user has to visit this URL; `connect` can be retried afterwards.
    Redirect(String),
}

/// Produces grants for servers.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// A previously obtained grant, if still usable.
    fn stored_grant(&self, server_url: &str) -> Option<Grant>;

    /// Start or finish authorization for `server_url`.
    ///
    /// # Errors
    /// Returns error if authorization fails outright.
    async fn authorize(&self, server_url: &str) -> Result<Authorization, ClientError>;

    /// Forget the grant for `server_url`.
    fn clear(&self, server_url: &str);
}

/// Hands out fixed grants. For servers without real authorization, and tests.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    grants: Mutex<HashMap<String, Grant>>,
    token: String,
}

impl StaticAuthorizer {
    /// Authorize every server with `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            grants: Mutex::new(HashMap::new()),
            token: token.into(),
        }
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    fn stored_grant(&self, server_url: &str) -> Option<Grant> {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_url)
            .cloned()
    }

    async fn authorize(&self, server_url: &str) -> Result<Authorization, ClientError> {
        let grant = Grant::bearer(self.token.clone());
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server_url.to_string(), grant.clone());
        Ok(Authorization::Authorized(grant))
    }

    fn clear(&self, server_url: &str) {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server_url);
    }
}
