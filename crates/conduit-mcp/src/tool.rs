//! McpTool: exposes one server tool through the `conduit_types::Tool` trait.

use crate::normalize::normalize;
use crate::session::{McpSession, McpToolInfo};
use conduit_types::{ToolDefinition, ToolFuture, ToolOutput};
use std::sync::Arc;

/// A tool backed by an MCP session.
///
/// The tool keeps the name the server advertised. Executing it sends
/// `tools/call` through the session and normalizes the reply to text.
pub struct McpTool {
    info: McpToolInfo,
    session: Arc<McpSession>,
}

impl McpTool {
    pub fn new(info: McpToolInfo, session: Arc<McpSession>) -> Self {
        Self { info, session }
    }

    /// Name of the server this tool runs on.
    pub fn server_name(&self) -> &str {
        self.session.name()
    }
}

impl conduit_types::Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.info.name.clone(),
            description: self.info.description.clone(),
            input_schema: self.info.input_schema.clone(),
        }
    }

    fn execute(&self, input: serde_json::Value) -> ToolFuture<'_> {
        Box::pin(async move {
            let result = self
                .session
                .invoke(&self.info.name, input)
                .await
                .map_err(|e| e.into_tool_error(self.session.name(), &self.info.name))?;
            Ok(ToolOutput::text(normalize(&result)))
        })
    }
}
