//! End-to-end tests for `Agent::run()`.
//!
//! The model is a scripted provider. Tools are either local mocks or MCP
//! tools served by an `McpSession` over an in-memory transport, so the
//! session, normalizer and registry are exercised together with the loop.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use conduit_core::{Agent, AgentEvent, Conversation, Transcript};
use conduit_mcp::jsonrpc::JsonRpcResponse;
use conduit_mcp::transport::TransportFuture;
use conduit_mcp::{McpServerConfig, McpSession, Transport};
use conduit_types::provider::{CompletionFuture, Provider};
use conduit_types::{
    ApiError, Completion, ConduitError, Message, Role, Tool, ToolCall, ToolDefinition, ToolError,
    ToolFuture, ToolOutput, ToolRegistry, Usage,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Replays canned replies and records every transcript it was shown.
struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<Completion, ApiError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
    catalogs: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<Completion, ApiError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
            catalogs: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn transcript_at(&self, call: usize) -> Vec<Message> {
        self.seen.lock().unwrap()[call].clone()
    }
}

impl Provider for ScriptedProvider {
    fn complete<'a>(
        &'a self,
        transcript: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> CompletionFuture<'a> {
        self.seen.lock().unwrap().push(transcript.to_vec());
        self.catalogs
            .lock()
            .unwrap()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("script exhausted".into())));
        Box::pin(async move { reply })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Always asks for another tool call.
struct InsistentProvider {
    calls: AtomicUsize,
}

impl Provider for InsistentProvider {
    fn complete<'a>(
        &'a self,
        _transcript: &'a [Message],
        _tools: &'a [ToolDefinition],
    ) -> CompletionFuture<'a> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(Completion::tool_calls(vec![call(
                &format!("call_{n}"),
                "Echo",
                json!({"n": n}),
            )]))
        })
    }

    fn name(&self) -> &str {
        "insistent"
    }
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

// ---------------------------------------------------------------------------
// Local tools
// ---------------------------------------------------------------------------

/// Echoes its input and records the order it was called in.
struct Echo {
    log: Arc<Mutex<Vec<String>>>,
}

impl Tool for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "Echo".to_string(),
            description: "Echo the input back".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn execute(&self, input: Value) -> ToolFuture<'_> {
        Box::pin(async move {
            self.log.lock().unwrap().push(input.to_string());
            Ok(ToolOutput::text(input.to_string()))
        })
    }
}

/// Sleeps long enough to be cancelled.
struct SlowTool;

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "SlowTool"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "SlowTool".to_string(),
            description: "Sleeps for ten seconds".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn execute(&self, _input: Value) -> ToolFuture<'_> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(ToolOutput::text("woke up"))
        })
    }
}

/// Fails as if its server had gone away.
struct Unplugged;

impl Tool for Unplugged {
    fn name(&self) -> &str {
        "Unplugged"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "Unplugged".to_string(),
            description: "Always loses its connection".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn execute(&self, _input: Value) -> ToolFuture<'_> {
        Box::pin(async {
            Err(ToolError::ConnectionFailure {
                server: "research".to_string(),
                reason: "child exited".to_string(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory MCP server
// ---------------------------------------------------------------------------

/// Serves `lookup_weight`, which knows a single breed.
struct KennelServer {
    next_id: AtomicU64,
}

impl KennelServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
        })
    }
}

impl Transport for KennelServer {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2025-06-18",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "kennel", "version": "1.0.0"}
            }),
            "tools/list" => json!({
                "tools": [{
                    "name": "lookup_weight",
                    "description": "Typical weight of a dog breed",
                    "inputSchema": {
                        "type": "object",
                        "properties": {"breed": {"type": "string"}},
                        "required": ["breed"]
                    }
                }]
            }),
            "tools/call" => {
                let breed = params
                    .as_ref()
                    .and_then(|p| p.pointer("/arguments/breed"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if breed == "Collie" {
                    json!({"content": [{"type": "text", "text": "37 lbs"}]})
                } else {
                    json!({
                        "content": [{"type": "text", "text": format!("unknown breed: {breed}")}],
                        "isError": true
                    })
                }
            }
            other => {
                let resp = JsonRpcResponse::failure(id, -32601, format!("no {other}"));
                return Box::pin(async move { Ok(resp) });
            }
        };
        Box::pin(async move { Ok(JsonRpcResponse::success(id, result)) })
    }

    fn send_notification<'a>(
        &'a self,
        _method: &'a str,
        _params: Option<Value>,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async {})
    }
}

async fn kennel_session() -> Arc<McpSession> {
    let session = Arc::new(McpSession::new("kennel", McpServerConfig::new("unused")));
    session.connect_with(KennelServer::new()).await.unwrap();
    session
}

async fn kennel_registry(session: &Arc<McpSession>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    session.register_tools(&mut registry).unwrap();
    registry
}

fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(Message::role).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn weigh_two_dogs_multi_turn() {
    let session = kennel_session().await;
    let provider = ScriptedProvider::new(vec![
        Ok(Completion::tool_calls(vec![call(
            "call_1",
            "lookup_weight",
            json!({"breed": "Collie"}),
        )])),
        Ok(Completion::answer("Combined weight depends on the second dog")),
    ]);
    let agent = Agent::new(provider.clone(), kennel_registry(&session).await);

    let mut transcript = Transcript::new();
    let answer = agent
        .run(&mut transcript, "weigh 2 dogs", CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(answer, "Combined weight depends on the second dog");
    assert_eq!(
        roles(transcript.messages()),
        vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
    );
    assert_eq!(transcript.messages()[1].tool_calls()[0].name, "lookup_weight");
    assert_eq!(
        transcript.messages()[2],
        Message::ToolResult {
            tool_call_id: "call_1".into(),
            content: "37 lbs".into(),
            is_error: false,
        }
    );
    assert!(transcript.validate().is_ok());

    // the second model call saw the tool result
    assert_eq!(provider.calls(), 2);
    let second = provider.transcript_at(1);
    assert_eq!(second.last().and_then(Message::text), Some("37 lbs"));
    assert_eq!(
        provider.catalogs.lock().unwrap()[0],
        vec!["lookup_weight".to_string()]
    );
}

#[tokio::test]
async fn empty_tool_call_list_ends_on_first_call() {
    let provider = ScriptedProvider::new(vec![
        Ok(Completion::answer("done")),
        Ok(Completion::answer("never requested")),
    ]);
    let agent = Agent::new(provider.clone(), ToolRegistry::new());

    let mut transcript = Transcript::with_system("You are terse.");
    for i in 0..40 {
        transcript.push_user(format!("question {i}"));
        transcript.push_assistant(Some(format!("answer {i}")), Vec::new());
    }

    let answer = agent
        .run(&mut transcript, "last one", CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(answer, "done");
    assert_eq!(provider.calls(), 1);
    assert_eq!(transcript.len(), 83);
}

#[tokio::test]
async fn remote_fault_is_fed_back_to_the_model() {
    let session = kennel_session().await;
    let provider = ScriptedProvider::new(vec![
        Ok(Completion::tool_calls(vec![call(
            "call_1",
            "lookup_weight",
            json!({"breed": "Wolf"}),
        )])),
        Ok(Completion::answer("That breed is unknown.")),
    ]);
    let agent = Agent::new(provider.clone(), kennel_registry(&session).await);

    let mut transcript = Transcript::new();
    let mut events = Vec::new();
    let answer = agent
        .run(&mut transcript, "weigh a wolf", CancellationToken::new(), |e| {
            events.push(e)
        })
        .await
        .unwrap();
    assert_eq!(answer, "That breed is unknown.");

    match &transcript.messages()[2] {
        Message::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_call_id, "call_1");
            assert!(*is_error);
            assert_eq!(
                content,
                "Error: Tool 'lookup_weight' reported an error: unknown breed: Wolf"
            );
        }
        other => panic!("Expected ToolResult, got {other:?}"),
    }
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ToolEnd { is_error: true, .. }
    )));
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let provider = ScriptedProvider::new(vec![
        Ok(Completion::tool_calls(vec![call("call_1", "Teleport", json!({}))])),
        Ok(Completion::answer("I cannot teleport.")),
    ]);
    let agent = Agent::new(provider, ToolRegistry::new());

    let mut transcript = Transcript::new();
    agent
        .run(&mut transcript, "beam me up", CancellationToken::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(
        transcript.messages()[2].text(),
        Some("Error: Unknown tool: Teleport")
    );
}

#[tokio::test]
async fn tool_calls_run_sequentially_in_model_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo {
        log: Arc::clone(&log),
    }));

    let provider = ScriptedProvider::new(vec![
        Ok(Completion::tool_calls(vec![
            call("c", "Echo", json!({"n": 3})),
            call("a", "Echo", json!({"n": 1})),
            call("b", "Echo", json!({"n": 2})),
        ])),
        Ok(Completion::answer("echoed")),
    ]);
    let agent = Agent::new(provider, registry);

    let mut transcript = Transcript::new();
    agent
        .run(&mut transcript, "echo", CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![r#"{"n":3}"#, r#"{"n":1}"#, r#"{"n":2}"#]
    );
    let ids: Vec<&str> = transcript
        .messages()
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn fatal_tool_error_aborts_and_rolls_back() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Unplugged));
    let provider = ScriptedProvider::new(vec![Ok(Completion::tool_calls(vec![call(
        "call_1",
        "Unplugged",
        json!({}),
    )]))]);
    let agent = Agent::new(provider, registry);

    let mut transcript = Transcript::with_system("sys");
    let before = transcript.clone();
    let mut events = Vec::new();
    let err = agent
        .run(&mut transcript, "search", CancellationToken::new(), |e| {
            events.push(e)
        })
        .await
        .unwrap_err();

    assert!(
        matches!(err, ConduitError::Tool(ToolError::ConnectionFailure { .. })),
        "got {err:?}"
    );
    assert_eq!(transcript, before);
    assert!(matches!(events.last(), Some(AgentEvent::Error(_))));
}

#[tokio::test]
async fn disconnected_session_aborts_the_turn() {
    let session = kennel_session().await;
    let registry = kennel_registry(&session).await;
    session.disconnect().await;

    let provider = ScriptedProvider::new(vec![Ok(Completion::tool_calls(vec![call(
        "call_1",
        "lookup_weight",
        json!({"breed": "Collie"}),
    )]))]);
    let mut conversation = Conversation::new(Agent::new(provider, registry), None);

    let err = conversation.run("weigh 2 dogs").await.unwrap_err();
    assert!(
        matches!(err, ConduitError::Tool(ToolError::NotConnected { ref server }) if server == "kennel"),
        "got {err:?}"
    );
    assert!(conversation.transcript().is_empty());
}

#[tokio::test]
async fn turn_limit_stops_a_model_that_never_answers() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo {
        log: Arc::new(Mutex::new(Vec::new())),
    }));
    let provider = Arc::new(InsistentProvider {
        calls: AtomicUsize::new(0),
    });
    let mut agent = Agent::new(provider.clone(), registry);
    agent.set_max_turns(3);

    let mut transcript = Transcript::new();
    let err = agent
        .run(&mut transcript, "loop forever", CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::TurnLimit { limit: 3 }), "got {err:?}");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert!(transcript.is_empty());
}

#[tokio::test]
async fn api_error_surfaces_and_rolls_back() {
    let provider = ScriptedProvider::new(vec![Err(ApiError::Auth {
        message: "bad key".into(),
    })]);
    let agent = Agent::new(provider, ToolRegistry::new());

    let mut transcript = Transcript::new();
    transcript.push_user("earlier");
    transcript.push_assistant(Some("reply".into()), Vec::new());
    let err = agent
        .run(&mut transcript, "hello", CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::Api(ApiError::Auth { .. })));
    assert_eq!(transcript.len(), 2);
}

#[tokio::test]
async fn cancel_during_tool_execution() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SlowTool));
    let provider = ScriptedProvider::new(vec![Ok(Completion::tool_calls(vec![call(
        "call_1",
        "SlowTool",
        json!({}),
    )]))]);
    let agent = Agent::new(provider, registry);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let mut transcript = Transcript::new();
    let mut events = Vec::new();
    let started = Instant::now();
    let err = agent
        .run(&mut transcript, "nap", cancel, |e| events.push(e))
        .await
        .unwrap_err();

    assert!(matches!(err, ConduitError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(transcript.is_empty());
    assert!(matches!(events.first(), Some(AgentEvent::ToolStart { .. })));
    assert!(matches!(events.last(), Some(AgentEvent::Cancelled)));
}

#[tokio::test]
async fn events_report_tools_and_usage() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo { log }));

    let mut first = Completion::tool_calls(vec![call("c1", "Echo", json!({"x": 1}))]);
    first.usage = Usage {
        input_tokens: 10,
        output_tokens: 5,
    };
    let mut second = Completion::answer("ok");
    second.usage = Usage {
        input_tokens: 20,
        output_tokens: 2,
    };
    let agent = Agent::new(ScriptedProvider::new(vec![Ok(first), Ok(second)]), registry);

    let mut events = Vec::new();
    let mut transcript = Transcript::new();
    agent
        .run(&mut transcript, "go", CancellationToken::new(), |e| events.push(e))
        .await
        .unwrap();

    assert!(matches!(
        events.as_slice(),
        [
            AgentEvent::ToolStart { .. },
            AgentEvent::ToolEnd { is_error: false, .. },
            AgentEvent::Done,
            AgentEvent::Usage(Usage {
                input_tokens: 30,
                output_tokens: 7
            }),
        ]
    ));
}
