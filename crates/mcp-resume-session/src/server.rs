//! Session-scoped tool server.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value;

use crate::tools::{Tool, ToolContext, ToolDescriptor, ToolError};

/// The set of tools one session can call.
///
/// Built fresh per session by [`crate::CapabilityBuilder`]; never shared
/// between sessions.
#[derive(Default)]
pub struct ToolServer {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    groups: Vec<String>,
}

impl ToolServer {
    /// Create a server with no tools.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Tool registered twice, keeping the latest");
        }
    }

    /// Record that a tool group was registered.
    pub fn mark_group(&mut self, group: &str) {
        if !self.groups.iter().any(|g| g == group) {
            self.groups.push(group.to_string());
        }
    }

    /// Names of the registered tool groups, in registration order.
    #[must_use]
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Whether a group was registered.
    #[must_use]
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Whether a tool is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Descriptors for `tools/list`, sorted by name.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }

    /// Invoke a tool by name.
    ///
    /// # Errors
    /// Returns [`ToolError::NotFound`] for unknown tools, otherwise whatever
    /// the tool returns.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tracing::debug!(session_id = ctx.session_id(), tool = name, "Calling tool");
        let result = tool.call(args, ctx).await;
        if let Err(e) = &result {
            tracing::info!(session_id = ctx.session_id(), tool = name, error = %e, "Tool call failed");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::auth::AuthContextStore;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::with_string_args(self.0, "echo", &[], &[])
        }

        async fn call(&self, args: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(json!({ "tool": self.0, "args": args }))
        }
    }

    #[tokio::test]
    async fn test_register_and_call() {
        let mut server = ToolServer::new();
        server.register(Arc::new(Echo("b")));
        server.register(Arc::new(Echo("a")));
        server.mark_group("echo");
        server.mark_group("echo");

        let names: Vec<_> = server.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(server.groups(), ["echo".to_string()]);

        let ctx = ToolContext::new("s".into(), Arc::new(AuthContextStore::new()));
        let out = server.call_tool("a", json!({ "x": 1 }), &ctx).await.unwrap();
        assert_eq!(out["args"]["x"], 1);

        let err = server.call_tool("zzz", json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "zzz"));
    }
}
