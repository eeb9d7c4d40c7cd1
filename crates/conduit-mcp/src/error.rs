//! Error types for MCP operations.

use conduit_types::ToolError;
use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Connection to MCP server '{server}' failed: {reason}")]
    ConnectionFailure { server: String, reason: String },

    #[error("MCP server '{server}' is already connected")]
    AlreadyConnected { server: String },

    #[error("MCP server '{server}' is not connected")]
    NotConnected { server: String },

    #[error("Tool '{tool}' on MCP server '{server}' failed: {message}")]
    RemoteFault {
        server: String,
        tool: String,
        code: Option<i64>,
        message: String,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP server '{name}' timed out after {timeout_ms}ms waiting for '{method}'")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("Transport to MCP server '{name}' is closed")]
    TransportClosed { name: String },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error ends the session (a reconnect is required).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::ConnectionFailure { .. }
                | McpError::NotConnected { .. }
                | McpError::TransportClosed { .. }
                | McpError::Io(_)
        )
    }

    /// Map onto the loop-facing error for a call of `tool` on `server`.
    ///
    /// Remote faults, timeouts and malformed replies stay recoverable;
    /// lifecycle and transport failures become fatal connection errors.
    pub fn into_tool_error(self, server: &str, tool: &str) -> ToolError {
        match self {
            McpError::RemoteFault { message, .. } | McpError::JsonRpc { message, .. } => {
                ToolError::RemoteFault {
                    tool: tool.to_string(),
                    message,
                }
            }
            McpError::Protocol(message) => ToolError::RemoteFault {
                tool: tool.to_string(),
                message,
            },
            McpError::Json(e) => ToolError::RemoteFault {
                tool: tool.to_string(),
                message: e.to_string(),
            },
            McpError::Timeout { timeout_ms, .. } => ToolError::Timeout {
                tool: tool.to_string(),
                timeout_ms,
            },
            McpError::NotConnected { server } => ToolError::NotConnected { server },
            McpError::ConnectionFailure { server, reason } => {
                ToolError::ConnectionFailure { server, reason }
            }
            other => ToolError::ConnectionFailure {
                server: server.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
