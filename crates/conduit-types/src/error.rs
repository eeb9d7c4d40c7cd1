//! Error hierarchy for Conduit.

use thiserror::Error;

/// Top-level error type surfaced to callers of a conversation turn.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Turn limit reached after {limit} model calls")]
    TurnLimit { limit: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

/// Errors from the chat-completions endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,
}

/// Outcome of a failed tool execution, as seen by the orchestration loop.
///
/// Recoverable errors are turned into tool results so the model can react;
/// the rest abort the turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Tool '{tool}' reported an error: {message}")]
    RemoteFault { tool: String, message: String },

    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Tool server '{server}' is not connected")]
    NotConnected { server: String },

    #[error("Connection to tool server '{server}' failed: {reason}")]
    ConnectionFailure { server: String, reason: String },
}

impl ToolError {
    /// Whether the loop may absorb this error into the transcript and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool { .. } | ToolError::RemoteFault { .. } | ToolError::Timeout { .. }
        )
    }
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
