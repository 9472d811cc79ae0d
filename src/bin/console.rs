//! Headless console front end for the assistant bridge.
//!
//! Reads lines from stdin. Lines starting with `/` are console commands:
//!
//! | Line | Effect |
//! |------|--------|
//! | `/voice` | toggle voice capture |
//! | `/status` | print a status snapshot |
//! | `/clear` | clear the conversation |
//! | `/export [dir]` | write the transcript (default: current directory) |
//! | `/quit` | stop the backend and exit |
//!
//! Anything else is sent as a chat message. Every UI update, backend event
//! and command outcome is written to stdout as one JSON line; diagnostics go
//! to stderr.

use std::path::PathBuf;

use anyhow::Context;
use assistant_bridge::backend::scripted::ScriptedConnector;
use assistant_bridge::{Assistant, BridgeConfig, CommandOutcome, HttpConnector, logging};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Chat with the assistant backend from a terminal or another process.
#[derive(Parser)]
#[command(name = "assistant-console", version, about)]
struct Cli {
    /// Path to TOML configuration file (defaults to the platform config dir).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Attach to an already running backend instead of spawning one.
    #[arg(long)]
    no_spawn: bool,

    /// Override `backend.base_url`.
    #[arg(long)]
    base_url: Option<String>,

    /// Use the in-memory scripted backend instead of the API server.
    #[arg(long)]
    scripted: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = BridgeConfig::default_config_path();
            if path.is_file() {
                BridgeConfig::from_file(&path)?
            } else {
                BridgeConfig::default()
            }
        }
    };
    if cli.no_spawn {
        config.backend.spawn_process = false;
    }
    if let Some(url) = cli.base_url {
        config.backend.base_url = url;
    }
    config.validate().context("invalid configuration")?;

    let _log_guard = logging::init_tracing(&config.logging)?;
    tracing::info!(base_url = %config.backend.base_url, "assistant-console starting");

    let assistant = if cli.scripted {
        Assistant::new(ScriptedConnector::new().with_echo_replies(), &config)
    } else {
        Assistant::new(HttpConnector::new(config.backend.clone())?, &config)
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let writer = tokio::spawn(write_lines(out_rx));

    let ui_tx = out_tx.clone();
    assistant.subscribe_updates(move |update| {
        let _ = ui_tx.send(json!({ "kind": "ui", "update": update }));
    });
    let event_tx = out_tx.clone();
    assistant.subscribe_events(move |event| {
        let _ = event_tx.send(json!({ "kind": "event", "event": event }));
    });

    let state = assistant.start().await;
    tracing::info!(%state, "backend start finished");

    let result = tokio::select! {
        result = run_input(&assistant, &out_tx) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted; shutting down");
            Ok(())
        }
    };

    assistant.stop().await;
    drop(assistant);
    drop(out_tx);
    // Subscriber closures keep senders alive; give the writer a moment to drain.
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), writer).await;

    tracing::info!("assistant-console shut down cleanly");
    result
}

async fn run_input(
    assistant: &Assistant,
    out: &mpsc::UnboundedSender<serde_json::Value>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) => break,
            ("/voice", _) => match assistant.toggle_voice().await {
                Ok(voice) => json!({ "kind": "voice", "voice": voice }),
                Err(e) => json!({ "kind": "voice", "error": e.to_string() }),
            },
            ("/status", _) => json!({ "kind": "status", "status": assistant.status() }),
            ("/clear", _) => {
                assistant.clear_conversation();
                continue;
            }
            ("/export", dir) => {
                let dir = if dir.trim().is_empty() { "." } else { dir.trim() };
                match assistant.export_transcript(&PathBuf::from(dir)) {
                    Ok(path) => json!({ "kind": "export", "path": path }),
                    Err(e) => json!({ "kind": "export", "error": e.to_string() }),
                }
            }
            _ => outcome_json(&assistant.send_message(line).await),
        };
        let _ = out.send(reply);
    }

    tracing::info!("input closed");
    Ok(())
}

fn outcome_json(outcome: &CommandOutcome) -> serde_json::Value {
    match outcome {
        CommandOutcome::Sent => json!({ "kind": "outcome", "outcome": "sent" }),
        CommandOutcome::FallbackHandled(text) => {
            json!({ "kind": "outcome", "outcome": "fallback", "text": text })
        }
        CommandOutcome::LocalHandled(action) => {
            json!({ "kind": "outcome", "outcome": "local", "text": action.describe() })
        }
        CommandOutcome::Rejected(reason) => {
            json!({ "kind": "outcome", "outcome": "rejected", "reason": reason })
        }
    }
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<serde_json::Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let mut line = value.to_string();
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to write to stdout; stopping output");
            break;
        }
        let _ = stdout.flush().await;
    }
}
