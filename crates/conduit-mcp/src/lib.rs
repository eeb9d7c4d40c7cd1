//! MCP (Model Context Protocol) client for Conduit.
//!
//! Speaks newline-delimited JSON-RPC 2.0 to a tool server spawned as a child
//! process. A [`McpSession`] owns one transport, performs the initialization
//! handshake, caches the server's tool catalog and invokes tools on behalf of
//! the orchestration loop. Invocation results are collapsed into transcript
//! text by [`normalize`].

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod normalize;
pub mod result;
pub mod session;
pub mod tool;
pub mod transport;

pub use config::{McpConfig, McpServerConfig};
pub use error::McpError;
pub use manager::McpManager;
pub use normalize::normalize;
pub use result::{ContentSegment, InvocationResult};
pub use session::{ConnectionState, McpSession, McpToolInfo, ServerInfo};
pub use tool::McpTool;
pub use transport::{StdioTransport, Transport};
