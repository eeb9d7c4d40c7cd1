//! Interactive read-eval-print loop.

use crate::{Outcome, print_usage, report};
use anyhow::Result;
use conduit_core::Conversation;
use conduit_types::{ConduitError, Usage};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A line of user input, classified.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Tools,
    Clear,
    Help,
    Unknown(&'a str),
    Message(&'a str),
}

fn parse_command(input: &str) -> Option<Command<'_>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let command = match input {
        "exit" | "quit" | "/quit" | "/exit" => Command::Quit,
        "/tools" => Command::Tools,
        "/clear" => Command::Clear,
        "/help" => Command::Help,
        other if other.starts_with('/') => Command::Unknown(other),
        other => Command::Message(other),
    };
    Some(command)
}

/// Run the loop until EOF, a quit command or an interrupt.
pub async fn run(conversation: &mut Conversation, interrupt: &CancellationToken) -> Result<Outcome> {
    let mut lines = spawn_stdin_reader();

    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let line = tokio::select! {
            biased;
            _ = interrupt.cancelled() => return Ok(Outcome::Interrupted),
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            eprintln!();
            return Ok(Outcome::Finished);
        };

        match parse_command(&line) {
            None => continue,
            Some(Command::Quit) => return Ok(Outcome::Finished),
            Some(Command::Tools) => print_tools(conversation),
            Some(Command::Clear) => {
                conversation.clear();
                eprintln!("Conversation cleared.");
            }
            Some(Command::Help) => print_help(),
            Some(Command::Unknown(cmd)) => {
                eprintln!("Unknown command: {cmd}. Type /help for available commands.");
            }
            Some(Command::Message(text)) => {
                let mut usage = Usage::default();
                let result = conversation
                    .run_with(text, interrupt.clone(), |event| report(event, &mut usage))
                    .await;
                match result {
                    Ok(answer) => {
                        println!("{answer}\n");
                        print_usage(&usage);
                    }
                    Err(ConduitError::Cancelled) => return Ok(Outcome::Interrupted),
                    Err(e) => eprintln!("\nError: {e}"),
                }
            }
        }
    }
}

/// Read stdin lines on a plain thread so a pending read never blocks shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_tools(conversation: &Conversation) {
    let catalog = conversation.agent().registry().catalog();
    if catalog.is_empty() {
        eprintln!("No tools available.");
        return;
    }
    for def in &catalog {
        eprintln!("{}", tool_line(&def.name, &def.description));
    }
}

fn tool_line(name: &str, description: &str) -> String {
    match description.lines().next().map(str::trim) {
        Some(first) if !first.is_empty() => format!("  {name}: {first}"),
        _ => format!("  {name}"),
    }
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /tools  Show the tool catalog");
    eprintln!("  /clear  Clear the conversation (keeps the system prompt)");
    eprintln!("  /help   Show this help");
    eprintln!("  /quit   Exit (also: exit, Ctrl+D)");
}
