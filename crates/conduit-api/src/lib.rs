//! OpenAI / Azure OpenAI chat-completions client with tool calling for Conduit.

mod client;
mod provider;
mod retry;
pub mod wire;

pub use client::{ChatClient, Endpoint};
pub use provider::OpenAiProvider;
pub use retry::RetryConfig;
