//! Output rendering for the agentctl CLI.
//!
//! Formats runs and streamed events for terminal display.

use agentctl_core::{Event, EventType, Run, RunStatus};

/// Print confirmation after creating a run.
pub fn print_run_created(run_id: &str, workdir: &str) {
    println!("Created run: {run_id}");
    println!("Workdir:     {workdir}");
}

/// Print a single run's details.
pub fn print_run(run: &Run) {
    println!("Run:       {}", run.id);
    println!("  Agent:   {}", run.agent_id);
    println!("  Source:  {}", run.source);
    println!("  Status:  {}", format_status(run.status));
    if let Some(ref workdir) = run.workdir {
        println!("  Workdir: {workdir}");
    }
    println!("  Created: {}", format_time(&run.created_at));
    println!("  Updated: {}", format_time(&run.updated_at));
}

/// Print a list of runs in tabular format.
pub fn print_run_list(runs: &[Run]) {
    if runs.is_empty() {
        println!("No runs found.");
        return;
    }

    println!("{:<24}  {:<20}  {:<10}  {:<20}", "ID", "AGENT", "STATUS", "CREATED");
    println!("{}", "-".repeat(80));

    for run in runs {
        println!(
            "{:<24}  {:<20}  {:<10}  {:<20}",
            truncate(&run.id.to_string(), 24),
            truncate(&run.agent_id, 20),
            format_status(run.status),
            format_time(&run.created_at),
        );
    }

    println!();
    println!("{} run(s)", runs.len());
}

/// Render one streamed event for `tail`.
pub fn print_event(event: &Event) {
    match event.event_type {
        EventType::TextMessageContent => {
            if let Some(content) = &event.content {
                print!("{content}");
                use std::io::Write;
                let _ = std::io::stdout().flush();
                return;
            }
        }
        EventType::Connected => {
            println!("[connected]");
        }
        EventType::RunStarted => {
            println!("[run started]");
        }
        EventType::StateChanged => {
            let description = event.data_field("current_step_description").and_then(|v| v.as_str()).unwrap_or("");
            if !description.is_empty() {
                println!("\n[state] {description}");
            }
        }
        EventType::ToolCallStarted => {
            let tool = event.data_field("toolName").and_then(|v| v.as_str()).unwrap_or("tool");
            println!("\n[tool started] {tool}");
        }
        EventType::ToolCallFinished => {
            let tool = event.data_field("toolName").and_then(|v| v.as_str()).unwrap_or("tool");
            println!("[tool finished] {tool}");
        }
        EventType::ToolCallError => {
            let tool = event.data_field("toolName").and_then(|v| v.as_str()).unwrap_or("tool");
            let error = event.data_field("error").and_then(|v| v.as_str()).unwrap_or("");
            println!("[tool error] {tool}: {error}");
        }
        EventType::PlanApproved => {
            println!("\n[plan approved]");
        }
        EventType::RunFinished => {
            println!("\n[run finished]");
        }
        EventType::WorkflowCancelled => {
            println!("\n[run cancelled]");
        }
        EventType::RunError => {
            let error = event.data_field("error").and_then(|v| v.as_str()).unwrap_or("");
            println!("\n[run error] {error}");
        }
        EventType::TextMessageStart | EventType::TextMessageEnd => {}
    }
}

fn format_status(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Running => "RUNNING",
        RunStatus::Completed => "COMPLETED",
        RunStatus::Failed => "FAILED",
        RunStatus::Cancelled => "CANCELLED",
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len.saturating_sub(3)])
    }
}
