//! Tool registry for name-based dispatch.

use crate::{Tool, ToolDefinition, ToolError, ToolOutput};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available tools.
///
/// Keeps registration order so the catalog presented to the model matches
/// the order tools were advertised in.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool. Re-registering a name replaces the handler in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Some(slot) = self.index.get(&name).copied() {
            self.tools[slot] = tool;
        } else {
            self.index.insert(name, self.tools.len());
            self.tools.push(tool);
        }
    }

    /// Tool definitions for the model, in registration order.
    pub fn catalog(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name with the given arguments.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
        })?;
        tool.execute(input).await
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::ToolFuture;

    struct Echo {
        name: &'static str,
        reply: &'static str,
    }

    impl Tool for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: format!("echoes {}", self.reply),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        fn execute(&self, _input: serde_json::Value) -> ToolFuture<'_> {
            Box::pin(async move { Ok(ToolOutput::text(self.reply)) })
        }
    }

    #[test]
    fn catalog_keeps_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.register(Arc::new(Echo { name, reply: "x" }));
        }
        let names: Vec<String> = registry.catalog().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn reregistering_replaces_handler_in_place() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo {
            name: "a",
            reply: "first",
        }));
        registry.register(Arc::new(Echo {
            name: "b",
            reply: "b",
        }));
        registry.register(Arc::new(Echo {
            name: "a",
            reply: "second",
        }));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a", "b"]);
        let out = registry.execute("a", serde_json::json!({})).await.unwrap();
        assert_eq!(out.text, "second");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { ref name } if name == "missing"));
        assert!(registry.is_empty());
    }
}
