//! One tool group per upstream provider.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{CONFLUENCE, FIGMA, JIRA};
use crate::{
    auth::AuthContext,
    capabilities::ToolGroup,
    server::ToolServer,
    tools::{Tool, ToolContext, ToolDescriptor, ToolError, required_str},
    upstream::{UpstreamClient, UpstreamRequest},
};

/// Static description of a provider tool.
struct ToolSpec {
    name: &'static str,
    operation: &'static str,
    description: &'static str,
    required: &'static [&'static str],
    optional: &'static [&'static str],
}

const JIRA_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "jira_get_issue",
        operation: "get_issue",
        description: "Fetch a Jira issue by key",
        required: &["issue_key"],
        optional: &[],
    },
];

const FIGMA_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "figma_get_file",
        operation: "get_file",
        description: "Fetch a Figma file or a node within it",
        required: &["file_key"],
        optional: &["node_id"],
    },
];

const CONFLUENCE_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "confluence_get_page",
        operation: "get_page",
        description: "Fetch a Confluence page by id",
        required: &["page_id"],
        optional: &[],
    },
];

/// A tool that forwards its arguments to one upstream operation.
pub struct UpstreamTool {
    provider: &'static str,
    operation: &'static str,
    descriptor: ToolDescriptor,
    required: &'static [&'static str],
    upstream: Arc<dyn UpstreamClient>,
}

impl UpstreamTool {
    fn from_spec(
        provider: &'static str,
        spec: &ToolSpec,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            provider,
            operation: spec.operation,
            descriptor: ToolDescriptor::with_string_args(
                spec.name,
                spec.description,
                spec.required,
                spec.optional,
            ),
            required: spec.required,
            upstream,
        }
    }
}

#[async_trait]
impl Tool for UpstreamTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        for key in self.required {
            required_str(&args, key)?;
        }

        let creds = ctx.provider_credentials(self.provider)?;
        self.upstream
            .invoke(UpstreamRequest {
                provider: self.provider,
                operation: self.operation,
                access_token: &creds.access_token,
                arguments: &args,
            })
            .await
            .map_err(|e| ToolError::from_upstream(self.provider, e))
    }
}

/// Tools backed by a single provider.
pub struct ProviderGroup {
    provider: &'static str,
    specs: &'static [ToolSpec],
    upstream: Arc<dyn UpstreamClient>,
}

impl ProviderGroup {
    /// Ticket tracker tools.
    #[must_use]
    pub fn jira(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            provider: JIRA,
            specs: JIRA_TOOLS,
            upstream,
        }
    }

    /// Design tool tools.
    #[must_use]
    pub fn figma(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            provider: FIGMA,
            specs: FIGMA_TOOLS,
            upstream,
        }
    }

    /// Document store tools.
    #[must_use]
    pub fn confluence(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            provider: CONFLUENCE,
            specs: CONFLUENCE_TOOLS,
            upstream,
        }
    }
}

impl ToolGroup for ProviderGroup {
    fn name(&self) -> &str {
        self.provider
    }

    fn required_providers(&self) -> &[&'static str] {
        std::slice::from_ref(&self.provider)
    }

    fn register_tools(&self, server: &mut ToolServer, _auth: &AuthContext) {
        for spec in self.specs {
            server.register(Arc::new(UpstreamTool::from_spec(
                self.provider,
                spec,
                Arc::clone(&self.upstream),
            )));
        }
    }
}
