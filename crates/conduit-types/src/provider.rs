//! Provider trait for the model-call collaborator.

use crate::{ApiError, Completion, Message, ToolDefinition};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider::complete`].
pub type CompletionFuture<'a> = Pin<Box<dyn Future<Output = Result<Completion, ApiError>> + Send + 'a>>;

/// A language-model endpoint.
///
/// Given the transcript so far and the tool catalog, returns either a final
/// answer or an ordered list of tool calls. Dyn-compatible so the agent can
/// hold an `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    fn complete<'a>(
        &'a self,
        transcript: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> CompletionFuture<'a>;

    /// Provider name for logging/display (e.g., "azure-openai").
    fn name(&self) -> &str;
}
