//! Per-session, multi-provider credential store.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use mcp_resume_core::{ResumeConfig, config::DEFAULT_EXPIRY_WARNING_SECS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Current time as Unix epoch seconds.
#[must_use]
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Auth error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Every provider token on the session has expired.
    #[error("Invalid token: all provider credentials for session {0} have expired")]
    InvalidToken(String),
}

/// OAuth credentials for one upstream provider.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderAuthInfo {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch seconds.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Provider-specific fields (cloud id, team id, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProviderAuthInfo {
    /// Create credentials without provider-specific fields.
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            scope: None,
            extra: Map::new(),
        }
    }

    /// Whether the access token is expired at `now`.
    #[must_use]
    pub const fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    /// Seconds of validity left at `now` (negative once expired).
    #[must_use]
    pub const fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at - now
    }
}

impl fmt::Debug for ProviderAuthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderAuthInfo")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Credentials attached to one session, keyed by provider name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderAuthInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

impl AuthContext {
    /// Create an empty context for a session.
    #[must_use]
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// Builder-style provider insertion.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>, info: ProviderAuthInfo) -> Self {
        self.providers.insert(provider.into(), info);
        self
    }

    /// Credentials for `provider`, if attached.
    #[must_use]
    pub fn provider(&self, provider: &str) -> Option<&ProviderAuthInfo> {
        self.providers.get(provider)
    }

    /// Whether `provider` is attached and its token is live at `now`.
    #[must_use]
    pub fn has_live_provider(&self, provider: &str, now: i64) -> bool {
        self.provider(provider)
            .is_some_and(|info| !info.is_expired_at(now))
    }

    /// Session-level expiry: true only if every provider token is expired.
    ///
    /// One live provider keeps the session usable; tools bound to the expired
    /// providers fail individually at call time.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.providers.values().all(|info| info.is_expired_at(now))
    }
}

/// Session-level expiry check.
///
/// Returns true if the context is absent or every provider token is expired.
#[must_use]
pub fn is_token_expired(context: Option<&AuthContext>) -> bool {
    context.is_none_or(|ctx| ctx.is_expired_at(now()))
}

/// Where [`AuthContextStore::get_auth_info`] should find the context.
#[derive(Debug, Clone)]
pub enum AuthSource<'a> {
    /// A context the caller already holds.
    Inline(Arc<AuthContext>),
    /// Look the context up by session id.
    Session(&'a str),
}

/// Process-wide `session id -> AuthContext` table.
///
/// Entries are replaced wholesale, never patched in place, so readers holding
/// an `Arc<AuthContext>` always see a consistent snapshot. Data is lost on
/// restart.
pub struct AuthContextStore {
    contexts: RwLock<HashMap<String, Arc<AuthContext>>>,
    expiry_warning_secs: i64,
}

impl Default for AuthContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthContextStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            expiry_warning_secs: DEFAULT_EXPIRY_WARNING_SECS,
        }
    }

    /// Create an empty store using the configured warning window.
    #[must_use]
    pub fn from_config(config: &ResumeConfig) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            expiry_warning_secs: config.expiry_warning_secs,
        }
    }

    /// Replace the context for `session_id`.
    ///
    /// Logs how long each provider token stays valid and warns about tokens
    /// that are expired or close to expiry. The warning is advisory only.
    pub fn set_auth_context(&self, session_id: &str, context: AuthContext) -> Arc<AuthContext> {
        self.log_validity(session_id, &context);
        let context = Arc::new(context);
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), Arc::clone(&context));
        context
    }

    /// Replace one provider's credentials, keeping the others.
    ///
    /// Creates the context if the session has none yet.
    pub fn set_provider(
        &self,
        session_id: &str,
        provider: &str,
        info: ProviderAuthInfo,
    ) -> Arc<AuthContext> {
        let context = {
            let mut contexts = self.contexts.write().unwrap_or_else(PoisonError::into_inner);
            let mut context = contexts
                .get(session_id)
                .map_or_else(|| AuthContext::for_session(session_id), |ctx| (**ctx).clone());
            context.providers.insert(provider.to_string(), info);
            let context = Arc::new(context);
            contexts.insert(session_id.to_string(), Arc::clone(&context));
            context
        };
        self.log_validity(session_id, &context);
        context
    }

    /// Stored context for `session_id`, without any expiry check.
    #[must_use]
    pub fn get_auth_context(&self, session_id: &str) -> Option<Arc<AuthContext>> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Resolve a context and enforce session-level expiry.
    ///
    /// This is the single enforcement point; callers must not re-check
    /// expiry themselves.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] if every provider token is expired.
    pub fn get_auth_info(
        &self,
        source: AuthSource<'_>,
    ) -> Result<Option<Arc<AuthContext>>, AuthError> {
        let context = match source {
            AuthSource::Inline(ctx) => Some(ctx),
            AuthSource::Session(session_id) => self.get_auth_context(session_id),
        };

        let Some(context) = context else {
            return Ok(None);
        };

        if is_token_expired(Some(&context)) {
            let session_id = context.session_id.clone().unwrap_or_default();
            tracing::info!(session_id = %session_id, "Rejecting expired auth context");
            return Err(AuthError::InvalidToken(session_id));
        }

        Ok(Some(context))
    }

    /// Remove the context for `session_id`. Idempotent.
    pub fn clear_auth_context(&self, session_id: &str) {
        let removed = self
            .contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if removed.is_some() {
            tracing::debug!(session_id, "Cleared auth context");
        }
    }

    /// Number of sessions with credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session has credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn log_validity(&self, session_id: &str, context: &AuthContext) {
        let now = now();
        for (provider, info) in &context.providers {
            let remaining = info.remaining_secs(now);
            if remaining <= 0 {
                tracing::warn!(
                    session_id,
                    provider = %provider,
                    expired_secs_ago = -remaining,
                    "Provider token already expired"
                );
            } else if remaining <= self.expiry_warning_secs {
                tracing::warn!(
                    session_id,
                    provider = %provider,
                    expires_in_secs = remaining,
                    "Provider token expires soon"
                );
            } else {
                tracing::debug!(
                    session_id,
                    provider = %provider,
                    expires_in_secs = remaining,
                    "Provider token valid"
                );
            }
        }
        tracing::info!(
            session_id,
            providers = ?context.providers.keys().collect::<Vec<_>>(),
            "Storing auth context"
        );
    }
}
