//! agentctl - CLI client for agentctld.
//!
//! Talks to the daemon exclusively over its public HTTP contract; it holds
//! no engine state of its own.

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, StartRunRequest};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI client for the agentctld workflow control plane.
#[derive(Parser)]
#[command(name = "agentctl")]
#[command(about = "Control plane client for agentctld")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:4170)
    #[arg(long, global = true, env = "AGENTCTL_BIND_ADDR")]
    addr: Option<String>,

    /// Auth token for the daemon API
    #[arg(long, global = true, env = "AGENTCTL_AUTH_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a new workflow run
    Start {
        /// Identifier for the agent driving this run
        #[arg(long)]
        agent_id: String,

        /// Source repository (URL or local path) to clone/checkout
        #[arg(long)]
        source: String,

        /// Short task description used to derive the branch slug
        #[arg(long)]
        task_name: String,

        /// Initial prompt for the first iteration
        #[arg(long, default_value = "")]
        prompt: String,

        /// Start in plan mode: the first iteration drafts a plan for approval
        #[arg(long)]
        plan: bool,
    },

    /// Show a run's current state
    Status {
        /// Run ID
        run_id: String,
    },

    /// List known runs
    List,

    /// Cancel a run
    Cancel {
        /// Run ID
        run_id: String,
    },

    /// Approve a run's pending plan
    ApprovePlan {
        /// Run ID
        run_id: String,
    },

    /// Stream live events from a run
    Tail {
        /// Run ID
        run_id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli.addr.unwrap_or_else(|| "http://127.0.0.1:4170".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::Start { agent_id, source, task_name, prompt, plan } => run_start(&client, agent_id, source, task_name, prompt, plan).await,
        Command::Status { run_id } => run_status(&client, &run_id).await,
        Command::List => run_list(&client).await,
        Command::Cancel { run_id } => run_cancel(&client, &run_id).await,
        Command::ApprovePlan { run_id } => run_approve_plan(&client, &run_id).await,
        Command::Tail { run_id } => run_tail(&client, &run_id).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_start(client: &Client, agent_id: String, source: String, task_name: String, prompt: String, plan_mode: bool) -> Result<(), ClientError> {
    let created = client.start_run(StartRunRequest { agent_id, source, task_name, prompt, plan_mode }).await?;
    render::print_run_created(&created.id, &created.workdir);
    Ok(())
}

async fn run_status(client: &Client, run_id: &str) -> Result<(), ClientError> {
    let run = client.get_run(run_id).await?;
    render::print_run(&run);
    Ok(())
}

async fn run_list(client: &Client) -> Result<(), ClientError> {
    let runs = client.list_runs().await?;
    render::print_run_list(&runs);
    Ok(())
}

async fn run_cancel(client: &Client, run_id: &str) -> Result<(), ClientError> {
    client.cancel_run(run_id).await?;
    println!("Run {run_id} cancelled");
    Ok(())
}

async fn run_approve_plan(client: &Client, run_id: &str) -> Result<(), ClientError> {
    client.approve_plan(run_id).await?;
    println!("Plan approved for run {run_id}");
    Ok(())
}

async fn run_tail(client: &Client, run_id: &str) -> Result<(), ClientError> {
    client.tail_events(run_id, |event| render::print_event(&event)).await
}
