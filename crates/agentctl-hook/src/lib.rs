//! Shared client library for the hook programs. Each of the three
//! binaries — one per tool-call lifecycle kind — reads a single JSON record
//! from stdin, turns it into an `Event`, and posts it to the daemon's hook
//! ingestion endpoint. The original stdin record is always echoed to stdout
//! so the programs compose in a shell pipeline; all diagnostics go to
//! stderr.

pub mod breaker;

use std::env;
use std::io::{self, Read, Write};

use agentctl_core::{Event, EventType, RunId};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use breaker::CircuitBreaker;

/// Which tool-call lifecycle point a hook binary reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Started,
    Finished,
    Error,
}

impl Kind {
    fn event_type(self) -> EventType {
        match self {
            Kind::Started => EventType::ToolCallStarted,
            Kind::Finished => EventType::ToolCallFinished,
            Kind::Error => EventType::ToolCallError,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "agentctl-hook", about = "tool-call telemetry hook")]
struct Cli {
    /// Run this tool call belongs to.
    #[arg(long, env = "AGENTCTL_RUN_ID")]
    run_id: String,

    /// Base URL of the daemon's hook ingestion endpoint.
    #[arg(long, env = "AGENTCTL_HOOK_ENDPOINT", default_value = "http://127.0.0.1:4170")]
    endpoint: String,

    /// Bearer token for the hook ingestion endpoint.
    #[arg(long, env = "AGENTCTL_AUTH_TOKEN")]
    auth_token: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct HookInput {
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Entry point shared by the three hook binaries.
pub fn main_for(kind: Kind) {
    let verbose = env::var("HOOK_VERBOSE").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" })))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut raw = String::new();
    if let Err(e) = io::stdin().read_to_string(&mut raw) {
        tracing::warn!(error = %e, "failed to read hook input from stdin");
        std::process::exit(0);
    }

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("failed to create tokio runtime");
    runtime.block_on(run(kind, &cli, &raw));

    // Pass the original record through unchanged for pipeline composition.
    let _ = io::stdout().write_all(raw.as_bytes());
}

async fn run(kind: Kind, cli: &Cli, raw: &str) {
    let mut breaker = CircuitBreaker::load(app_name());
    if breaker.is_open() {
        tracing::debug!("circuit breaker open, skipping hook post");
        return;
    }

    let input: HookInput = serde_json::from_str(raw).unwrap_or_default();
    let run_id = RunId::from_string(&cli.run_id);
    let event = build_event(kind.event_type(), run_id, &input);

    let client = reqwest::Client::new();
    let url = format!("{}/runs/{}/hooks/events", cli.endpoint.trim_end_matches('/'), cli.run_id);
    let mut request = client.post(&url).json(&event);
    if let Some(token) = &cli.auth_token {
        request = request.bearer_auth(token);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(status = %response.status(), "hook event delivered");
            breaker.record_success();
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), "hook event rejected");
            breaker.record_failure();
        }
        Err(e) => {
            tracing::warn!(error = %e, "hook event delivery failed");
            breaker.record_failure();
        }
    }
    breaker.save();
}

fn build_event(event_type: EventType, run_id: RunId, input: &HookInput) -> Event {
    let mut ev = Event::tool_call(
        event_type,
        run_id,
        input.tool_call_id.clone().unwrap_or_default(),
        input.tool_name.clone().unwrap_or_default(),
    );
    if event_type == EventType::ToolCallError {
        if let (Some(error), Some(data)) = (&input.error, ev.data.as_mut()) {
            data.insert("error".to_string(), serde_json::Value::String(error.clone()));
        }
    }
    ev
}

fn app_name() -> String {
    env::var("AGENTCTL_HOOK_APP").unwrap_or_else(|_| "agentctl".to_string())
}
