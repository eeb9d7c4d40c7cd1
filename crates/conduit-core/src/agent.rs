//! The orchestration loop that interleaves model calls with tool calls.

use crate::transcript::Transcript;
use conduit_types::{
    ConduitError, Message, ToolOutput, ToolRegistry, Usage, provider::Provider,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Model calls allowed per user message unless configured otherwise.
pub const DEFAULT_MAX_TURNS: usize = 25;

/// Events emitted by the agent during execution.
#[derive(Debug)]
pub enum AgentEvent {
    /// A tool is about to be executed.
    ToolStart { name: String, input: String },
    /// A tool has finished executing.
    ToolEnd {
        name: String,
        output: String,
        is_error: bool,
    },
    /// Usage accumulated over the turn.
    Usage(Usage),
    /// The model produced a final answer.
    Done,
    /// The turn was cancelled (e.g. Ctrl+C).
    Cancelled,
    /// The turn was aborted by an error.
    Error(String),
}

/// Drives one conversation turn: query the model, run the tools it asks
/// for, feed their results back, until it answers without tool calls.
pub struct Agent {
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    max_turns: usize,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, registry: ToolRegistry) -> Self {
        Self {
            provider,
            registry,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Cap the number of model calls per `run`. Zero is treated as one.
    pub fn set_max_turns(&mut self, max_turns: usize) {
        self.max_turns = max_turns.max(1);
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Append `user_message` and run the loop until the model answers.
    ///
    /// Returns the final answer text. Tool calls run one at a time in the
    /// order the model returned them. Recoverable tool errors are written
    /// into the transcript as error results; fatal ones abort the turn. On
    /// any error, cancellation included, the transcript is rolled back to
    /// where it was before the user message.
    pub async fn run<F>(
        &self,
        transcript: &mut Transcript,
        user_message: &str,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<String, ConduitError>
    where
        F: FnMut(AgentEvent),
    {
        let checkpoint = transcript.len();
        transcript.push_user(user_message);

        let result = self.drive(transcript, &cancel, &mut on_event).await;

        if let Err(e) = &result {
            transcript.rollback(checkpoint);
            match e {
                ConduitError::Cancelled => on_event(AgentEvent::Cancelled),
                other => on_event(AgentEvent::Error(other.to_string())),
            }
        }
        result
    }

    async fn drive<F>(
        &self,
        transcript: &mut Transcript,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<String, ConduitError>
    where
        F: FnMut(AgentEvent),
    {
        let tools = self.registry.catalog();
        let mut total_usage = Usage::default();

        for turn in 1..=self.max_turns {
            tracing::debug!(
                turn,
                max_turns = self.max_turns,
                messages = transcript.len(),
                "querying {}",
                self.provider.name()
            );

            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConduitError::Cancelled),
                reply = self.provider.complete(transcript.messages(), &tools) => reply?,
            };
            total_usage.add(&completion.usage);

            if completion.is_final() {
                let answer = completion.text.unwrap_or_default();
                transcript.push_assistant(Some(answer.clone()), Vec::new());
                on_event(AgentEvent::Done);
                on_event(AgentEvent::Usage(total_usage));
                return Ok(answer);
            }

            let calls = completion.tool_calls;
            transcript.push(Message::Assistant {
                content: completion.text,
                tool_calls: calls.clone(),
            });

            for call in &calls {
                on_event(AgentEvent::ToolStart {
                    name: call.name.clone(),
                    input: call.arguments.to_string(),
                });

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ConduitError::Cancelled),
                    result = self.registry.execute(&call.name, call.arguments.clone()) => result,
                };

                let output = match outcome {
                    Ok(output) => output,
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(tool = %call.name, "tool call failed: {e}");
                        ToolOutput::error(format!("Error: {e}"))
                    }
                    Err(e) => return Err(ConduitError::Tool(e)),
                };

                on_event(AgentEvent::ToolEnd {
                    name: call.name.clone(),
                    output: truncate_for_display(&output.text, 200),
                    is_error: output.is_error,
                });

                transcript.push_tool_result(call.id.clone(), output.text, output.is_error);
            }
        }

        Err(ConduitError::TurnLimit {
            limit: self.max_turns,
        })
    }
}

fn truncate_for_display(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", conduit_types::truncate_str(s, max_len))
    }
}
