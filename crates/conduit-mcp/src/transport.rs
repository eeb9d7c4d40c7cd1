//! Transport channel for MCP server communication.
//!
//! [`StdioTransport`] spawns a child process and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. Writes go through a channel drained by a
//! writer task; a reader task routes replies to waiting requests by id, so a
//! pending request never blocks other traffic and out-of-order replies are
//! matched correctly.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::{
    Inbound, JsonRpcNotification, JsonRpcReply, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND,
    parse_inbound,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, McpError>> + Send + 'a>>;

/// A bidirectional JSON-RPC channel to one MCP server.
///
/// Owned exclusively by a session. `shutdown` must be idempotent and must
/// release every waiter still blocked in `send_request`.
pub trait Transport: Send + Sync {
    /// Send a request and wait for the reply carrying the same id.
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> TransportFuture<'a, JsonRpcResponse>;

    /// Send a notification (fire-and-forget, no response expected).
    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> TransportFuture<'a, ()>;

    /// Close the channel and release the underlying process.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mark the channel dead and release every waiter.
///
/// The flag is set before the map is cleared, so a request registered after
/// the clear still sees it.
fn fail_pending(closed: &AtomicBool, pending: &PendingMap) {
    closed.store(true, Ordering::SeqCst);
    lock(pending).clear();
}

/// Removes a pending entry when its request future finishes or is dropped,
/// so a reply arriving after cancellation is discarded.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    fn register(
        pending: &'a PendingMap,
        id: u64,
        tx: oneshot::Sender<JsonRpcResponse>,
    ) -> PendingGuard<'a> {
        lock(pending).insert(id, tx);
        PendingGuard { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    label: String,
    next_id: AtomicU64,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    child: tokio::sync::Mutex<Option<Child>>,
    timeout_ms: u64,
    shutdown_grace_ms: u64,
}

impl StdioTransport {
    /// Spawn the configured server and start the background reader/writer tasks.
    ///
    /// `label` names the server in logs and errors. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(label: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: config.command.clone(),
            source: e,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Protocol("child stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Protocol("child stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        tracing::debug!(
            server = label,
            pid = child.id(),
            "spawned MCP server: {} {}",
            config.command,
            config.args.join(" ")
        );

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let mut tasks = Vec::with_capacity(3);

        // Writer: drains the channel into the child's stdin. Ends (closing
        // stdin) once every strong sender is gone, or on the first failed
        // write, which means the server is gone.
        {
            let label = label.to_string();
            let pending = Arc::clone(&pending);
            let closed = Arc::clone(&closed);
            tasks.push(tokio::spawn(async move {
                let mut stdin = stdin;
                while let Some(msg) = write_rx.recv().await {
                    if let Err(e) = write_line(&mut stdin, &msg).await {
                        tracing::debug!(server = %label, "write to MCP server failed: {e}");
                        fail_pending(&closed, &pending);
                        break;
                    }
                }
            }));
        }

        tasks.push(tokio::spawn(read_loop(
            label.to_string(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&closed),
            write_tx.downgrade(),
        )));

        if let Some(stderr) = stderr {
            let label = label.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %label, "stderr: {line}");
                }
            }));
        }

        Ok(Self {
            label: label.to_string(),
            next_id: AtomicU64::new(1),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            closed,
            tasks: Mutex::new(tasks),
            child: tokio::sync::Mutex::new(Some(child)),
            timeout_ms: config.timeout_ms,
            shutdown_grace_ms: config.shutdown_grace_ms,
        })
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Whether the server side of the channel is known to be gone.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> McpError {
        McpError::TransportClosed {
            name: self.label.clone(),
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<String>, McpError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        lock(&self.write_tx)
            .clone()
            .ok_or_else(|| self.closed_error())
    }

    async fn write(&self, line: String) -> Result<(), McpError> {
        self.sender()?
            .send(line)
            .await
            .map_err(|_| self.closed_error())
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        let _guard = PendingGuard::register(&self.pending, id, tx);
        // Checked after registering: a close that cleared the map before the
        // insert would otherwise leave this waiter to time out.
        if self.is_closed() {
            return Err(self.closed_error());
        }

        self.write(serialized).await?;
        tracing::debug!(server = %self.label, id, "-> {method}");

        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => Err(McpError::Timeout {
                name: self.label.clone(),
                method: method.to_string(),
                timeout_ms: self.timeout_ms,
            }),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.write(serialized).await?;
        tracing::debug!(server = %self.label, "-> {method} (notification)");
        Ok(())
    }

    async fn close(&self) {
        // Dropping the last strong sender lets the writer finish, which
        // closes the child's stdin.
        let sender = lock(&self.write_tx).take();
        drop(sender);

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            let grace = Duration::from_millis(self.shutdown_grace_ms);
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(server = %self.label, "MCP server exited: {status}");
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %self.label, "failed to wait for MCP server: {e}");
                }
                Err(_) => {
                    tracing::debug!(
                        server = %self.label,
                        "MCP server still running after {}ms, killing",
                        self.shutdown_grace_ms
                    );
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server = %self.label, "failed to kill MCP server: {e}");
                    }
                }
            }
        }

        self.abort_tasks();
        fail_pending(&self.closed, &self.pending);
    }

    fn abort_tasks(&self) {
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
    }
}

impl Transport for StdioTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        Box::pin(self.request(method, params))
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> TransportFuture<'a, ()> {
        Box::pin(self.notify(method, params))
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(self.close())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The child itself is killed on drop (`kill_on_drop`).
        self.abort_tasks();
    }
}

async fn write_line<W>(stdin: &mut W, msg: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stdin.write_all(msg.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Read server output line by line and route each message.
///
/// On EOF the transport is marked closed and every waiter is released.
async fn read_loop<R>(
    label: String,
    stdout: R,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    replies: mpsc::WeakSender<String>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_inbound(line) {
            Ok(Inbound::Response(resp)) => dispatch_response(&label, &pending, resp),
            Ok(Inbound::Request { id, method }) => {
                let reply = answer_server_request(id, &method);
                let Some(tx) = replies.upgrade() else {
                    continue;
                };
                match serde_json::to_string(&reply) {
                    Ok(serialized) => {
                        let _ = tx.send(serialized).await;
                    }
                    Err(e) => tracing::warn!(server = %label, "failed to encode reply: {e}"),
                }
            }
            Ok(Inbound::Notification { method, params }) => {
                log_notification(&label, &method, params.as_ref());
            }
            Err(e) => {
                tracing::warn!(server = %label, "Failed to parse MCP message: {e}: {line}");
            }
        }
    }

    tracing::debug!(server = %label, "MCP server closed its output");
    fail_pending(&closed, &pending);
}

fn dispatch_response(label: &str, pending: &PendingMap, resp: JsonRpcResponse) {
    let Some(id) = resp.id else {
        tracing::warn!(server = label, "dropping response without id");
        return;
    };
    let waiter = lock(pending).remove(&id);
    match waiter {
        Some(tx) => {
            let _ = tx.send(resp);
        }
        None => tracing::debug!(server = label, id, "discarding reply nobody is waiting for"),
    }
}

fn answer_server_request(id: Value, method: &str) -> JsonRpcReply {
    match method {
        "ping" => JsonRpcReply::result(id, serde_json::json!({})),
        _ => JsonRpcReply::error(
            id,
            METHOD_NOT_FOUND,
            format!("client does not support '{method}'"),
        ),
    }
}

fn log_notification(label: &str, method: &str, params: Option<&Value>) {
    match method {
        "notifications/message" => {
            let data = params.and_then(|p| p.get("data")).cloned().unwrap_or(Value::Null);
            tracing::info!(server = label, "server log: {data}");
        }
        "notifications/tools/list_changed" => {
            tracing::info!(
                server = label,
                "server reported a changed tool list; keeping the catalog fetched at connect"
            );
        }
        _ => tracing::debug!(server = label, "<- {method} (notification)"),
    }
}
