//! MCP manager: owns the sessions for every configured server.

use crate::config::{McpConfig, McpServerConfig};
use crate::error::McpError;
use crate::session::{ConnectionState, McpSession};
use conduit_types::ToolRegistry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Manages connections to multiple MCP servers.
#[derive(Default)]
pub struct McpManager {
    sessions: Vec<Arc<McpSession>>,
}

impl McpManager {
    /// Connect every configured server, in name order, until `cancel` fires.
    ///
    /// Servers that fail to connect are logged and skipped; the conversation
    /// continues with whatever servers are available. Once cancelled, the
    /// handshake in progress is aborted and the remaining servers are not
    /// started; the sessions connected so far are kept for `shutdown`.
    pub async fn start(config: &McpConfig, cancel: &CancellationToken) -> Self {
        let mut manager = Self::default();

        for (name, server_config) in &config.servers {
            match manager.start_one(name, server_config.clone(), cancel).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => tracing::warn!("Failed to start MCP server '{}': {}", name, e),
            }
        }

        manager
    }

    /// Connect one server; a failure is returned to the caller.
    ///
    /// Returns `Ok(None)` when `cancel` fires first. The aborted attempt has
    /// stopped its server by then.
    pub async fn start_one(
        &mut self,
        name: &str,
        config: McpServerConfig,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<McpSession>>, McpError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let session = Arc::new(McpSession::new(name, config));

        {
            let connect = session.connect();
            tokio::pin!(connect);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = &mut connect => Some(result),
            };
            match outcome {
                Some(result) => result?,
                None => {
                    tracing::debug!("startup interrupted while connecting '{name}'");
                    // An attempt that never got polled has nothing to stop.
                    let in_flight = session.state() == ConnectionState::Connecting;
                    session.disconnect().await;
                    if in_flight {
                        let _ = connect.await;
                    }
                    return Ok(None);
                }
            }
        }

        tracing::info!(
            "MCP server '{}' started ({} tools)",
            name,
            session.catalog().len()
        );
        self.sessions.push(Arc::clone(&session));
        Ok(Some(session))
    }

    /// Register the tools of every connected session, returning the total.
    ///
    /// A later session's tool replaces an earlier one with the same name.
    pub fn register_tools(&self, registry: &mut ToolRegistry) -> usize {
        let mut total = 0;
        for session in &self.sessions {
            match session.register_tools(registry) {
                Ok(count) => total += count,
                Err(e) => tracing::warn!("Skipping tools of '{}': {}", session.name(), e),
            }
        }
        total
    }

    pub fn sessions(&self) -> &[Arc<McpSession>] {
        &self.sessions
    }

    /// Number of connected servers.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Get a summary of connected servers and their tool counts.
    pub fn server_summary(&self) -> Vec<(&str, usize)> {
        self.sessions
            .iter()
            .map(|s| (s.name(), s.catalog().len()))
            .collect()
    }

    /// Disconnect every session. Safe to call more than once.
    pub async fn shutdown(&self) {
        for session in &self.sessions {
            session.disconnect().await;
        }
    }
}
