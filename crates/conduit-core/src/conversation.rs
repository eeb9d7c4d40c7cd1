//! A conversation: one agent plus the transcript it extends.

use crate::agent::{Agent, AgentEvent};
use crate::transcript::Transcript;
use conduit_types::ConduitError;
use tokio_util::sync::CancellationToken;

/// Owns the transcript of a single conversation.
///
/// Turns take `&mut self`, so two turns of the same conversation can never
/// run at once.
pub struct Conversation {
    agent: Agent,
    transcript: Transcript,
}

impl Conversation {
    pub fn new(agent: Agent, system_prompt: Option<String>) -> Self {
        let transcript = match system_prompt {
            Some(prompt) => Transcript::with_system(prompt),
            None => Transcript::new(),
        };
        Self { agent, transcript }
    }

    /// Run one turn without cancellation or event reporting.
    pub async fn run(&mut self, user_message: &str) -> Result<String, ConduitError> {
        self.run_with(user_message, CancellationToken::new(), |_| {})
            .await
    }

    pub async fn run_with<F>(
        &mut self,
        user_message: &str,
        cancel: CancellationToken,
        on_event: F,
    ) -> Result<String, ConduitError>
    where
        F: FnMut(AgentEvent),
    {
        self.agent
            .run(&mut self.transcript, user_message, cancel, on_event)
            .await
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Start over, keeping the system prompt.
    pub fn clear(&mut self) {
        self.transcript.reset();
    }
}
