//! Tool trait and related types.

use std::future::Future;
use std::pin::Pin;

use crate::ToolDefinition;
use crate::error::ToolError;

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// Normalized result of executing a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Text inserted into the transcript as the tool result.
    pub text: String,
    /// Whether the tool reported the output as an error.
    pub is_error: bool,
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// A named, schema-described operation the model can invoke.
///
/// Tools are registered explicitly into a [`crate::ToolRegistry`]; the
/// registry hands `definition()` to the model and dispatches `execute()` by
/// name when the model asks for it.
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// The definition presented to the model (name, description, input schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON arguments.
    ///
    /// Arguments are forwarded as-is; schema validation is the executor's job.
    fn execute(&self, input: serde_json::Value) -> ToolFuture<'_>;
}
