//! MCP session: one server connection and its lifecycle.
//!
//! A session starts disconnected. `connect()` spawns the server, runs the
//! `initialize` / `notifications/initialized` handshake and fetches the tool
//! catalog once; the catalog is assumed stable until `disconnect()`.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::METHOD_NOT_FOUND;
use crate::normalize::normalize;
use crate::result::InvocationResult;
use crate::tool::McpTool;
use crate::transport::{StdioTransport, Transport};
use conduit_types::ToolRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Protocol version offered in `initialize`.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Versions a server may answer with.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

const CLIENT_NAME: &str = "conduit";

/// Upper bound on `tools/list` pages followed during the handshake.
const MAX_TOOL_PAGES: usize = 64;

const DISCONNECTED_DURING_HANDSHAKE: &str = "disconnected during handshake";

/// Observable connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Identity reported by the server in its `initialize` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    #[serde(default)]
    capabilities: Value,
    #[serde(default)]
    server_info: Option<ServerInfo>,
    #[serde(default)]
    instructions: Option<String>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

struct Handshake {
    protocol_version: String,
    server_info: Option<ServerInfo>,
    capabilities: Value,
    instructions: Option<String>,
}

struct Live {
    transport: Arc<dyn Transport>,
    handshake: Handshake,
    tools: Vec<McpToolInfo>,
}

enum State {
    Disconnected,
    /// Handshake in progress; `attempt` tells overlapping attempts apart and
    /// `cancel` aborts it.
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    Connected(Box<Live>),
}

/// A connection to one MCP server.
pub struct McpSession {
    name: String,
    config: McpServerConfig,
    state: Mutex<State>,
    attempts: AtomicU64,
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Puts a session that is still `Connecting` back to `Disconnected` when a
/// connect attempt fails or its future is dropped.
struct ConnectingGuard<'a> {
    session: &'a McpSession,
    attempt: u64,
    cancel: CancellationToken,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.session.lock_state();
            if matches!(*state, State::Connecting { attempt, .. } if attempt == self.attempt) {
                *state = State::Disconnected;
            }
        }
    }
}

impl McpSession {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State::Disconnected),
            attempts: AtomicU64::new(0),
        }
    }

    /// Spawn the configured server and perform the handshake.
    ///
    /// Fails with [`McpError::AlreadyConnected`] while a connection exists
    /// or is being established, and with [`McpError::ConnectionFailure`] if
    /// the process cannot be spawned, the handshake fails or times out, or
    /// the server picks an unsupported protocol version.
    pub async fn connect(&self) -> Result<(), McpError> {
        let guard = self.begin_connect()?;
        let transport: Arc<dyn Transport> = match StdioTransport::spawn(&self.name, &self.config)
        {
            Ok(transport) => Arc::new(transport),
            Err(e) => {
                drop(guard);
                return Err(McpError::ConnectionFailure {
                    server: self.name.clone(),
                    reason: e.to_string(),
                });
            }
        };
        self.finish_connect(guard, transport).await
    }

    /// Perform the handshake over an already-open transport.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        let guard = self.begin_connect()?;
        self.finish_connect(guard, transport).await
    }

    fn begin_connect(&self) -> Result<ConnectingGuard<'_>, McpError> {
        let mut state = self.lock_state();
        match *state {
            State::Disconnected => {
                let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                let cancel = CancellationToken::new();
                *state = State::Connecting {
                    attempt,
                    cancel: cancel.clone(),
                };
                Ok(ConnectingGuard {
                    session: self,
                    attempt,
                    cancel,
                    armed: true,
                })
            }
            State::Connecting { .. } | State::Connected(_) => Err(McpError::AlreadyConnected {
                server: self.name.clone(),
            }),
        }
    }

    async fn finish_connect(
        &self,
        mut guard: ConnectingGuard<'_>,
        transport: Arc<dyn Transport>,
    ) -> Result<(), McpError> {
        let limit = Duration::from_millis(self.config.init_timeout_ms);
        let outcome = tokio::select! {
            biased;
            _ = guard.cancel.cancelled() => Err(DISCONNECTED_DURING_HANDSHAKE.to_string()),
            result = tokio::time::timeout(limit, self.handshake(transport.as_ref())) => match result {
                Ok(Ok(done)) => Ok(done),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "handshake timed out after {}ms",
                    self.config.init_timeout_ms
                )),
            },
        };

        let (handshake, tools) = match outcome {
            Ok(done) => done,
            Err(reason) => {
                transport.shutdown().await;
                if guard.cancel.is_cancelled() {
                    tracing::debug!(server = %self.name, "MCP handshake abandoned");
                } else {
                    tracing::warn!(server = %self.name, "MCP handshake failed: {reason}");
                }
                drop(guard);
                return Err(McpError::ConnectionFailure {
                    server: self.name.clone(),
                    reason,
                });
            }
        };

        let tool_count = tools.len();
        let version = handshake.protocol_version.clone();
        let live = Live {
            transport,
            handshake,
            tools,
        };

        match self.install(guard.attempt, live) {
            Ok(()) => {
                guard.armed = false;
                tracing::info!(
                    server = %self.name,
                    protocol = %version,
                    "MCP server '{}' connected with {} tools",
                    self.name,
                    tool_count
                );
                Ok(())
            }
            Err(live) => {
                live.transport.shutdown().await;
                Err(McpError::ConnectionFailure {
                    server: self.name.clone(),
                    reason: DISCONNECTED_DURING_HANDSHAKE.to_string(),
                })
            }
        }
    }

    /// Store a finished connection, unless a disconnect raced the handshake.
    fn install(&self, attempt: u64, live: Live) -> Result<(), Live> {
        let mut state = self.lock_state();
        if matches!(*state, State::Connecting { attempt: current, .. } if current == attempt) {
            *state = State::Connected(Box::new(live));
            Ok(())
        } else {
            Err(live)
        }
    }

    async fn handshake(
        &self,
        transport: &dyn Transport,
    ) -> Result<(Handshake, Vec<McpToolInfo>), McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let resp = transport
            .send_request("initialize", Some(init_params))
            .await?;
        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }
        let result = resp
            .result
            .ok_or_else(|| McpError::Protocol("initialize response has no result".to_string()))?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse initialize result: {e}")))?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&init.protocol_version.as_str()) {
            return Err(McpError::Protocol(format!(
                "unsupported protocol version '{}' (supported: {})",
                init.protocol_version,
                SUPPORTED_PROTOCOL_VERSIONS.join(", ")
            )));
        }

        transport
            .send_notification("notifications/initialized", None)
            .await?;

        let tools = self.list_tools(transport).await?;

        Ok((
            Handshake {
                protocol_version: init.protocol_version,
                server_info: init.server_info,
                capabilities: init.capabilities,
                instructions: init.instructions,
            },
            tools,
        ))
    }

    async fn list_tools(&self, transport: &dyn Transport) -> Result<Vec<McpToolInfo>, McpError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for page in 0.. {
            if page == MAX_TOOL_PAGES {
                tracing::warn!(
                    server = %self.name,
                    "tools/list still paginating after {MAX_TOOL_PAGES} pages, keeping {} tools",
                    tools.len()
                );
                break;
            }

            let params = cursor
                .take()
                .map(|c| serde_json::json!({ "cursor": c }));
            let resp = transport.send_request("tools/list", params).await?;

            if let Some(err) = resp.error {
                if err.code == METHOD_NOT_FOUND && page == 0 {
                    tracing::debug!(server = %self.name, "server does not list tools");
                    break;
                }
                return Err(McpError::JsonRpc {
                    server: self.name.clone(),
                    code: err.code,
                    message: err.message,
                });
            }

            let Some(result) = resp.result.filter(|r| !r.is_null()) else {
                break;
            };
            let list: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            for tool in list.tools {
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                } else {
                    tracing::warn!(
                        server = %self.name,
                        "ignoring duplicate tool '{}' in tools/list",
                        tool.name
                    );
                }
            }

            match list.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(tools)
    }

    /// Call `tool` with `arguments` and wait for its result.
    ///
    /// Arguments are forwarded unvalidated. A JSON-RPC error reply or a
    /// result flagged `isError` becomes [`McpError::RemoteFault`].
    pub async fn invoke(&self, tool: &str, arguments: Value) -> Result<InvocationResult, McpError> {
        let transport = self.live_transport()?;
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments,
        });

        let resp = transport.send_request("tools/call", Some(params)).await?;
        let request_id = resp.id.unwrap_or_default();

        if let Some(err) = resp.error {
            return Err(McpError::RemoteFault {
                server: self.name.clone(),
                tool: tool.to_string(),
                code: Some(err.code),
                message: err.message,
            });
        }

        let raw = resp.result.ok_or_else(|| {
            McpError::Protocol("tools/call response has neither result nor error".to_string())
        })?;
        let result = InvocationResult::from_raw(request_id, raw);

        if result.is_error {
            return Err(McpError::RemoteFault {
                server: self.name.clone(),
                tool: tool.to_string(),
                code: None,
                message: normalize(&result),
            });
        }

        Ok(result)
    }

    /// Close the channel and stop the server process.
    ///
    /// Safe to call repeatedly and after a failed `connect()`. Waiters still
    /// blocked in `invoke` are released with an error. During a handshake the
    /// pending `connect()` is aborted; it stops the server and fails with
    /// [`McpError::ConnectionFailure`].
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), State::Disconnected);
        match previous {
            State::Connected(live) => {
                let Live {
                    transport,
                    handshake,
                    tools,
                } = *live;
                drop(tools);
                drop(handshake);
                transport.shutdown().await;
                tracing::info!(server = %self.name, "MCP server disconnected");
            }
            State::Connecting { cancel, .. } => {
                tracing::debug!(server = %self.name, "disconnect requested during handshake");
                cancel.cancel();
            }
            State::Disconnected => {}
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        match *self.lock_state() {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting { .. } => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.with_live(|live| live.handshake.server_info.clone())
            .flatten()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.with_live(|live| live.handshake.protocol_version.clone())
    }

    pub fn instructions(&self) -> Option<String> {
        self.with_live(|live| live.handshake.instructions.clone())
            .flatten()
    }

    /// Whether the server advertised `capability` (e.g. "tools") at connect.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.with_live(|live| live.handshake.capabilities.get(capability).is_some())
            .unwrap_or(false)
    }

    /// The tool catalog fetched at connect, in advertised order.
    ///
    /// Empty when not connected.
    pub fn catalog(&self) -> Vec<McpToolInfo> {
        self.with_live(|live| live.tools.clone())
            .unwrap_or_default()
    }

    /// Register every catalog entry into `registry`, returning how many.
    pub fn register_tools(self: &Arc<Self>, registry: &mut ToolRegistry) -> Result<usize, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected {
                server: self.name.clone(),
            });
        }
        let catalog = self.catalog();
        let count = catalog.len();
        for info in catalog {
            registry.register(Arc::new(McpTool::new(info, Arc::clone(self))));
        }
        Ok(count)
    }

    fn live_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        self.with_live(|live| Arc::clone(&live.transport))
            .ok_or_else(|| McpError::NotConnected {
                server: self.name.clone(),
            })
    }

    fn with_live<T>(&self, f: impl FnOnce(&Live) -> T) -> Option<T> {
        match &*self.lock_state() {
            State::Connected(live) => Some(f(live)),
            _ => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
