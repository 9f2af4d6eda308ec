// Copyright 2026 The Chatstream Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use chatstream::config::{self, Config};
use chatstream::context::ContextTelemetry;
use chatstream::error::ChatError;
use chatstream::keystore::{self, StoredKey};
use chatstream::render::{ArtifactBody, ArtifactCard};
use chatstream::session::{Renderer, SendOutcome, SessionController, SessionOptions};
use chatstream::transport::ReqwestTransport;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatstream", about = "Streaming chat client")]
struct Cli {
    /// Path to the chatstream.yaml config file
    #[arg(long, env = "CHATSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL; overrides the config file
    #[arg(long, env = "CHATSTREAM_BASE_URL")]
    base_url: Option<String>,

    /// API key sent with each message
    #[arg(long, env = "CHATSTREAM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Sealed key store (JSON) to read the API key from
    #[arg(long)]
    key_file: Option<PathBuf>,

    #[arg(long, env = "CHATSTREAM_KEY_PASSPHRASE", default_value = "chatstream", hide_env_values = true)]
    key_passphrase: String,

    /// Validate the API key with the server before sending; with
    /// --key-file, store a valid key there
    #[arg(long)]
    validate_key: bool,

    /// Poll context-window usage after each response
    #[arg(long)]
    context: bool,

    /// Messages to send in order; read one per line from stdin when absent
    message: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("CHATSTREAM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        base_url = %config.transport.base_url,
        contract_hash = %config.contract_hash,
        "config loaded"
    );

    let mut options = SessionOptions::from(&config);
    if let Some(key) = resolve_api_key(&cli) {
        options.api_key = Some(key);
    }

    let transport = match ReqwestTransport::from_config(config.transport.clone()) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            tracing::error!("failed to build transport: {e}");
            std::process::exit(1);
        }
    };
    let controller = Arc::new(SessionController::new(
        transport,
        Arc::new(TerminalRenderer::default()),
        options,
    ));
    tracing::info!(session_id = %controller.session_id(), "session started");

    if cli.validate_key && !validate(&cli, &controller).await {
        std::process::exit(1);
    }

    // Ctrl-C cancels the in-flight request rather than killing the process.
    let canceller = controller.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !canceller.cancel() {
                std::process::exit(130);
            }
        }
    });

    let mut failed = false;
    if cli.message.is_empty() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(8);
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines().map_while(Result::ok) {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        while let Some(line) = rx.recv().await {
            let ok = match parse_input(&line) {
                InputCommand::Retry => run_retry(&controller, cli.context).await,
                InputCommand::Send(message) => run_one(&controller, message, cli.context).await,
            };
            failed |= !ok;
        }
    } else {
        for message in &cli.message {
            failed |= !run_one(&controller, message, cli.context).await;
        }
    }

    if failed {
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> Result<Config, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(&config::FileSource::new(path))?,
        None => Config::with_base_url(config::DEFAULT_BASE_URL),
    };
    if let Some(base_url) = &cli.base_url {
        config.transport.base_url = base_url.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn resolve_api_key(cli: &Cli) -> Option<String> {
    if let Some(key) = &cli.api_key {
        return Some(key.clone());
    }
    let path = cli.key_file.as_ref()?;
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read key file");
            return None;
        }
    };
    let stored: StoredKey = match serde_json::from_str(&raw) {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "key file is not a stored key");
            return None;
        }
    };
    match stored.open(&cli.key_passphrase, chrono::Utc::now()) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "stored key unusable");
            None
        }
    }
}

async fn validate(cli: &Cli, controller: &SessionController) -> bool {
    let Some(key) = cli.api_key.clone().or_else(|| resolve_api_key(cli)) else {
        eprintln!("No API key to validate.");
        return false;
    };
    let validation = match controller.validate_api_key(&key).await {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return false;
        }
    };
    if !validation.valid {
        eprintln!(
            "API key rejected: {}",
            validation.error.as_deref().unwrap_or("unknown reason")
        );
        return false;
    }

    match validation.tools_count {
        Some(n) => eprintln!("API key valid ({n} tools available)."),
        None => eprintln!("API key valid."),
    }
    if let Some(path) = &cli.key_file {
        let written = StoredKey::seal(
            &key,
            &cli.key_passphrase,
            chrono::Duration::days(keystore::DEFAULT_KEY_TTL_DAYS),
            chrono::Utc::now(),
        )
        .map_err(|e| e.to_string())
        .and_then(|sealed| serde_json::to_string_pretty(&sealed).map_err(|e| e.to_string()))
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), error = %e, "could not store key");
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

const RETRY_COMMAND: &str = "/retry";

#[derive(Debug, PartialEq, Eq)]
enum InputCommand<'a> {
    /// Resend the last message after a retryable failure.
    Retry,
    Send(&'a str),
}

fn parse_input(line: &str) -> InputCommand<'_> {
    if line.trim() == RETRY_COMMAND {
        InputCommand::Retry
    } else {
        InputCommand::Send(line)
    }
}

/// Send one message; returns false when it failed.
async fn run_one(controller: &SessionController, message: &str, poll_context: bool) -> bool {
    let outcome = controller.send(message).await;
    finish(controller, outcome, poll_context).await
}

/// Replay the last message; returns false when the replay failed.
async fn run_retry(controller: &SessionController, poll_context: bool) -> bool {
    let outcome = controller.retry().await;
    if matches!(outcome, Ok(SendOutcome::Empty)) {
        eprintln!("[nothing to retry]");
    }
    finish(controller, outcome, poll_context).await
}

async fn finish(
    controller: &SessionController,
    outcome: Result<SendOutcome, ChatError>,
    poll_context: bool,
) -> bool {
    let ok = match outcome {
        Ok(SendOutcome::Completed(summary)) => {
            println!();
            tracing::info!(
                request_id = %summary.request_id,
                tool_uses = summary.tool_uses,
                artifacts = summary.artifact_count,
                "response finished"
            );
            true
        }
        Ok(SendOutcome::Cancelled) | Ok(SendOutcome::Empty) | Ok(SendOutcome::Busy) => true,
        Err(_) => false,
    };

    if ok && poll_context {
        if let Err(e) = controller.poll_context().await {
            tracing::warn!(error = %e, "context poll failed");
        }
    }
    ok
}

// ---------------------------------------------------------------------------
// Terminal renderer
// ---------------------------------------------------------------------------

/// Prints assistant text as it streams and status lines to stderr.
#[derive(Default)]
struct TerminalRenderer {
    printed: Mutex<String>,
}

impl TerminalRenderer {
    fn status(&self, line: &str) {
        eprintln!("[{line}]");
    }
}

impl Renderer for TerminalRenderer {
    fn user_message(&self, _entry: &chatstream::render::TranscriptEntry) {
        if let Ok(mut printed) = self.printed.lock() {
            printed.clear();
        }
    }

    fn assistant_text(&self, text: &str) {
        let Ok(mut printed) = self.printed.lock() else {
            return;
        };
        let mut out = std::io::stdout().lock();
        // Display text only grows, except when a tool span opens and hides
        // its tail; print nothing until it grows past the old text again.
        if let Some(delta) = text.strip_prefix(printed.as_str()) {
            let _ = out.write_all(delta.as_bytes());
            let _ = out.flush();
            printed.push_str(delta);
        }
    }

    fn artifacts_changed(&self, cards: &[ArtifactCard]) {
        for card in cards.iter().filter(|c| !c.collapsed) {
            let state = if card.building { "Building..." } else { "ready" };
            self.status(&format!("{} {} ({state})", card.type_label, card.title));
            if let ArtifactBody::Code { language, .. } = &card.body {
                if language != "text" {
                    self.status(&format!("  language: {language}"));
                }
            }
        }
    }

    fn timeout_warning(&self, soft: bool) {
        if soft {
            self.status("still building artifacts...");
        } else {
            self.status("response is taking longer than usual; Ctrl-C to cancel");
        }
    }

    fn timeout_warning_cleared(&self) {}

    fn timeout_extended(&self, grace: Duration) {
        self.status(&format!("extending wait by {}s for artifacts", grace.as_secs()));
    }

    fn context_changed(&self, telemetry: &ContextTelemetry) {
        if let Some(text) = &telemetry.status_text {
            self.status(text);
        } else if let Some(percentage) = telemetry.percentage {
            self.status(&format!("context {percentage:.1}% used"));
        }
    }

    fn request_cancelled(&self) {
        self.status("cancelled");
    }

    fn request_failed(&self, error: &ChatError, retryable: bool) {
        self.status(&error.user_message());
        if retryable {
            self.status(&format!("type {RETRY_COMMAND} to resend"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_command_is_recognised() {
        assert_eq!(parse_input("/retry"), InputCommand::Retry);
        assert_eq!(parse_input("  /retry \r"), InputCommand::Retry);
    }

    #[test]
    fn other_lines_are_sent_verbatim() {
        assert_eq!(parse_input("hello"), InputCommand::Send("hello"));
        assert_eq!(parse_input("/retry now"), InputCommand::Send("/retry now"));
        assert_eq!(parse_input(""), InputCommand::Send(""));
    }
}
