//! Tool-calling orchestration loop and conversation management for Conduit.

mod agent;
mod conversation;
pub mod transcript;

pub use agent::{Agent, AgentEvent, DEFAULT_MAX_TURNS};
pub use conversation::Conversation;
pub use transcript::{Transcript, TranscriptError};
