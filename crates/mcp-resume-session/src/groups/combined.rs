//! Tools that need more than one provider at once.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{FIGMA, JIRA};
use crate::{
    auth::AuthContext,
    capabilities::ToolGroup,
    server::ToolServer,
    tools::{Tool, ToolContext, ToolDescriptor, ToolError, required_str},
    upstream::{UpstreamClient, UpstreamRequest},
};

const JIRA_FIGMA: &[&str] = &[JIRA, FIGMA];

/// Offered only when both the ticket tracker and the design tool are connected.
pub struct CombinedGroup {
    name: &'static str,
    providers: &'static [&'static str],
    upstream: Arc<dyn UpstreamClient>,
}

impl CombinedGroup {
    /// Jira + Figma cross-linking.
    #[must_use]
    pub fn jira_figma(upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            name: "jira_figma",
            providers: JIRA_FIGMA,
            upstream,
        }
    }
}

impl ToolGroup for CombinedGroup {
    fn name(&self) -> &str {
        self.name
    }

    fn required_providers(&self) -> &[&'static str] {
        self.providers
    }

    fn register_tools(&self, server: &mut ToolServer, _auth: &AuthContext) {
        server.register(Arc::new(LinkDesignToIssue {
            upstream: Arc::clone(&self.upstream),
        }));
    }
}

/// Looks up a Figma file and posts a link to it on a Jira issue.
struct LinkDesignToIssue {
    upstream: Arc<dyn UpstreamClient>,
}

#[async_trait]
impl Tool for LinkDesignToIssue {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::with_string_args(
            "link_design_to_issue",
            "Attach a link to a Figma design as a comment on a Jira issue",
            &["issue_key", "file_key"],
            &["node_id"],
        )
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let issue_key = required_str(&args, "issue_key")?;
        let file_key = required_str(&args, "file_key")?;
        let node_id = args.get("node_id").and_then(Value::as_str);

        // Resolve both credentials up front so a half-done link never happens.
        let figma = ctx.provider_credentials(FIGMA)?;
        let jira = ctx.provider_credentials(JIRA)?;

        let file_args = json!({ "file_key": file_key, "node_id": node_id });
        let file = self
            .upstream
            .invoke(UpstreamRequest {
                provider: FIGMA,
                operation: "get_file",
                access_token: &figma.access_token,
                arguments: &file_args,
            })
            .await
            .map_err(|e| ToolError::from_upstream(FIGMA, e))?;

        let name = file.get("name").and_then(Value::as_str).unwrap_or(file_key);
        let mut url = format!("https://www.figma.com/file/{file_key}");
        if let Some(node_id) = node_id {
            url.push_str("?node-id=");
            url.push_str(node_id);
        }

        let comment_args = json!({
            "issue_key": issue_key,
            "body": format!("Design: [{name}|{url}]"),
        });
        let comment = self
            .upstream
            .invoke(UpstreamRequest {
                provider: JIRA,
                operation: "add_comment",
                access_token: &jira.access_token,
                arguments: &comment_args,
            })
            .await
            .map_err(|e| ToolError::from_upstream(JIRA, e))?;

        Ok(json!({
            "issue_key": issue_key,
            "design_url": url,
            "comment": comment,
        }))
    }
}
