//! agentctld - AI agent workflow control plane daemon.
//!
//! Main entry point for the daemon binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentctl_core::DaemonConfig;
use agentctld::driver::ProcessDriver;
use agentctld::engine::Engine;
use agentctld::server::{create_router, AppState};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(name = "agentctld", about = "AI agent workflow control plane daemon")]
struct Cli {
    /// Path to a key=value config file.
    #[arg(long, env = "AGENTCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long)]
    bind_addr: Option<String>,

    /// Bearer token required on the hook ingestion endpoint.
    #[arg(long, env = "AGENTCTL_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Model passed to the sub-process driver.
    #[arg(long, default_value = "opus")]
    model: String,
}

fn main() {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let cli = Cli::parse();

    let config_path = cli.config.or_else(default_config_path);
    let mut config = match &config_path {
        Some(path) if path.exists() => DaemonConfig::from_file(path).unwrap_or_else(|e| {
            error!("failed to read config file {}: {e}", path.display());
            std::process::exit(1);
        }),
        _ => DaemonConfig::default(),
    };
    config.apply_env(|name| std::env::var(name).ok());
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if cli.auth_token.is_some() {
        config.auth_token = cli.auth_token;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().expect("failed to create tokio runtime");

    runtime.block_on(async {
        if let Err(e) = run(config, cli.model).await {
            error!("daemon error: {e}");
            std::process::exit(1);
        }
    });
}

/// Default config file location: `<config dir>/agentctl/config`, used when
/// `--config`/`AGENTCTL_CONFIG` is not given.
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentctl").join("config"))
}

async fn run(config: DaemonConfig, model: String) -> agentctld::AppResult<()> {
    let bind_addr = config.bind_addr.clone();
    let auth_token = config.auth_token.clone();
    let keepalive = Duration::from_secs(config.keepalive_interval_secs);

    let driver = Arc::new(ProcessDriver::new(model, config.driver_timeout_secs as u32, 0, 5));
    let engine = Engine::new(config, driver);

    let shutdown = tokio_util::sync::CancellationToken::new();
    let flush_engine = engine.clone();
    let flush_shutdown = shutdown.clone();
    let flusher = tokio::spawn(async move {
        flush_engine.ingestor().run(flush_engine.hub(), flush_shutdown).await;
    });

    let state = Arc::new(AppState { engine, auth_token, keepalive });
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind_addr = %bind_addr, "agentctld listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
    }

    // Let the flusher run its final drain before the process exits.
    shutdown.cancel();
    let _ = tokio::time::timeout(agentctld::SHUTDOWN_GRACE_PERIOD, flusher).await;

    Ok(())
}
