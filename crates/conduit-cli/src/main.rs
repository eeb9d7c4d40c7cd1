//! Conduit CLI: chat with a tool-calling model backed by MCP tool servers.

mod repl;

use anyhow::{Context, Result, bail};
use clap::Parser;
use conduit_api::OpenAiProvider;
use conduit_config::{ConduitConfig, CliOverrides};
use conduit_core::{Agent, AgentEvent, Conversation};
use conduit_mcp::McpManager;
use conduit_types::{ConduitError, ToolRegistry, Usage};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Conventional exit status after SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
    Use the available tools whenever they help answer the user, \
    and answer directly when they do not.";

#[derive(Parser)]
#[command(
    name = "conduit",
    version,
    about = "Chat with a tool-calling model backed by MCP tool servers"
)]
struct Cli {
    /// Send a single prompt and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Model (or Azure deployment) to use
    #[arg(long)]
    model: Option<String>,

    /// Connect only this configured server; failing to connect is fatal
    #[arg(long)]
    server: Option<String>,

    /// JSON file with an `mcpServers` object
    #[arg(long, value_name = "PATH")]
    mcp_config: Option<PathBuf>,

    /// Maximum model calls per message
    #[arg(long)]
    max_turns: Option<usize>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Finished,
    Interrupted,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ConduitConfig::load(CliOverrides {
        model: cli.model.clone(),
        max_turns: cli.max_turns,
        mcp_config: cli.mcp_config.clone(),
    })
    .context("Failed to load configuration")?;

    let interrupt = CancellationToken::new();
    watch_for_interrupt(interrupt.clone());

    // An interrupt during startup aborts the handshake in progress and skips
    // the remaining servers; the ones already connected are shut down below.
    let manager = start_servers(&config, cli.server.as_deref(), &interrupt).await?;

    // Every path below ends in exactly one shutdown.
    let outcome = if interrupt.is_cancelled() {
        Ok(Outcome::Interrupted)
    } else {
        converse(&cli, &config, &manager, &interrupt).await
    };
    manager.shutdown().await;

    match outcome? {
        Outcome::Finished => Ok(ExitCode::SUCCESS),
        Outcome::Interrupted => {
            eprintln!("\nInterrupted.");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

/// Cancel `token` on the first Ctrl+C.
fn watch_for_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::debug!("interrupt received");
                token.cancel();
            }
            Err(e) => tracing::warn!("cannot listen for Ctrl+C: {e}"),
        }
    });
}

async fn start_servers(
    config: &ConduitConfig,
    only: Option<&str>,
    interrupt: &CancellationToken,
) -> Result<McpManager> {
    match only {
        Some(name) => {
            let Some(server) = config.mcp.servers.get(name) else {
                bail!("Unknown server '{name}' (not in config.toml or --mcp-config)");
            };
            let mut manager = McpManager::default();
            manager
                .start_one(name, server.clone(), interrupt)
                .await
                .with_context(|| format!("Failed to start MCP server '{name}'"))?;
            Ok(manager)
        }
        None => Ok(McpManager::start(&config.mcp, interrupt).await),
    }
}

async fn converse(
    cli: &Cli,
    config: &ConduitConfig,
    manager: &McpManager,
    interrupt: &CancellationToken,
) -> Result<Outcome> {
    let mut conversation = create_conversation(config, manager)?;

    match &cli.print {
        Some(prompt) => one_shot(&mut conversation, prompt, interrupt).await,
        None => {
            eprintln!(
                "conduit v{} (model: {}, provider: {}, tools: {})",
                env!("CARGO_PKG_VERSION"),
                config.model,
                conversation.agent().provider_name(),
                conversation.agent().registry().len()
            );
            for (server, tools) in manager.server_summary() {
                eprintln!("  {server}: {tools} tools");
            }
            eprintln!("Type your message. /help for commands, Ctrl+D to exit.\n");
            repl::run(&mut conversation, interrupt).await
        }
    }
}

fn create_conversation(config: &ConduitConfig, manager: &McpManager) -> Result<Conversation> {
    let mut provider =
        OpenAiProvider::new(&config.api_key, config.endpoint.clone(), &config.model)
            .context("Failed to create API client")?;
    if let Some(max_tokens) = config.max_tokens {
        provider = provider.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = config.temperature {
        provider = provider.with_temperature(temperature);
    }

    let mut registry = ToolRegistry::new();
    let registered = manager.register_tools(&mut registry);
    tracing::debug!("{registered} tools registered");

    let mut agent = Agent::new(Arc::new(provider), registry);
    if let Some(max_turns) = config.max_turns {
        agent.set_max_turns(max_turns);
    }

    Ok(Conversation::new(agent, Some(system_prompt(config, manager))))
}

/// The configured prompt followed by any instructions the servers sent.
fn system_prompt(config: &ConduitConfig, manager: &McpManager) -> String {
    let mut prompt = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    for session in manager.sessions() {
        if let Some(instructions) = session.instructions() {
            prompt.push_str(&format!("\n\n[{}] {}", session.name(), instructions.trim()));
        }
    }
    prompt
}

async fn one_shot(
    conversation: &mut Conversation,
    prompt: &str,
    interrupt: &CancellationToken,
) -> Result<Outcome> {
    let mut usage = Usage::default();
    match conversation
        .run_with(prompt, interrupt.clone(), |event| report(event, &mut usage))
        .await
    {
        Ok(answer) => {
            let mut out = io::stdout().lock();
            writeln!(out, "{answer}")?;
            out.flush()?;
            print_usage(&usage);
            Ok(Outcome::Finished)
        }
        Err(ConduitError::Cancelled) => Ok(Outcome::Interrupted),
        Err(e) => Err(e.into()),
    }
}

/// Render agent progress on stderr so stdout carries only answers.
pub(crate) fn report(event: AgentEvent, usage: &mut Usage) {
    let mut err = io::stderr().lock();
    match event {
        AgentEvent::ToolStart { name, input } => {
            let _ = writeln!(err, "  [tool: {name} {input}]");
        }
        AgentEvent::ToolEnd {
            name,
            output,
            is_error,
        } => {
            if is_error {
                let _ = writeln!(err, "  [tool {name} error: {output}]");
            } else {
                let _ = writeln!(err, "  [tool {name} done: {output}]");
            }
        }
        AgentEvent::Usage(total) => *usage = total,
        AgentEvent::Done | AgentEvent::Cancelled | AgentEvent::Error(_) => {}
    }
}

pub(crate) fn print_usage(usage: &Usage) {
    eprintln!(
        "Tokens: input {}, output {}",
        usage.input_tokens, usage.output_tokens
    );
}
