//! Builds the tool server for one session from its attached providers.

use std::sync::Arc;

use crate::{
    auth::{AuthContext, now},
    groups::{CombinedGroup, ProviderGroup, UtilityGroup},
    server::ToolServer,
    upstream::UpstreamClient,
};

/// A set of tools that is registered as a unit.
///
/// Provider modules implement this to plug their tools into a session.
pub trait ToolGroup: Send + Sync {
    /// Group name, e.g. `"jira"`.
    fn name(&self) -> &str;

    /// Providers that must all be connected for this group to be offered.
    /// Empty for provider-independent groups.
    fn required_providers(&self) -> &[&'static str];

    /// Add this group's tools to `server`.
    fn register_tools(&self, server: &mut ToolServer, auth: &AuthContext);
}

/// Decides, per session, which tool groups are exposed.
pub struct CapabilityBuilder {
    groups: Vec<Arc<dyn ToolGroup>>,
}

impl CapabilityBuilder {
    /// The standard groups: utility, one per provider, and jira+figma combined.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self::with_groups(vec![
            Arc::new(UtilityGroup),
            Arc::new(ProviderGroup::jira(Arc::clone(&upstream))),
            Arc::new(ProviderGroup::figma(Arc::clone(&upstream))),
            Arc::new(ProviderGroup::confluence(Arc::clone(&upstream))),
            Arc::new(CombinedGroup::jira_figma(upstream)),
        ])
    }

    /// Use an explicit list of groups.
    #[must_use]
    pub fn with_groups(groups: Vec<Arc<dyn ToolGroup>>) -> Self {
        Self { groups }
    }

    /// Build a fresh server for a session.
    ///
    /// A group is registered when every provider it requires is attached with
    /// a token that is live right now. Groups without requirements are always
    /// registered, so a session without credentials still gets a working
    /// server. Nothing is cached: each call re-evaluates from `auth`.
    #[must_use]
    pub fn create_server(&self, auth: Option<&AuthContext>) -> ToolServer {
        let empty = AuthContext::default();
        let auth = auth.unwrap_or(&empty);
        let now = now();

        let mut server = ToolServer::new();
        for group in &self.groups {
            let available = group
                .required_providers()
                .iter()
                .all(|provider| auth.has_live_provider(provider, now));
            if available {
                group.register_tools(&mut server, auth);
                server.mark_group(group.name());
            }
        }

        tracing::debug!(
            session_id = auth.session_id.as_deref().unwrap_or_default(),
            groups = ?server.groups(),
            "Built session capabilities"
        );
        server
    }
}
