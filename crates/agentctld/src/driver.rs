//! The sub-process driver: the narrow seam between the workflow engine
//! and whatever actually runs an iteration of agent work. The default
//! [`ProcessDriver`] spawns the configured CLI with a per-attempt timeout
//! and retry/backoff. [`NoopDriver`] is a test double used anywhere a
//! real sub-process would be overkill; it writes a completed state
//! document the way the real agent would, so the full loop terminates
//! without an external binary present.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use agentctl_core::StateDocument;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("driver executable not found")]
    ExecutableNotFound,
    #[error("timed out after {0} seconds")]
    Timeout(u32),
    #[error("process exited with code {0}")]
    ExitCode(i32),
    #[error("all retries exhausted")]
    RetriesExhausted,
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// The output of one completed driver invocation.
#[derive(Debug, Clone)]
pub struct DriverOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub attempts: u32,
}

pub type DriverFuture<'a> = Pin<Box<dyn Future<Output = Result<DriverOutput>> + Send + 'a>>;

/// Runs one loop iteration's prompt against a working directory.
pub trait Driver: Send + Sync {
    fn execute<'a>(&'a self, workdir: &'a Path, prompt: &'a str) -> DriverFuture<'a>;
}

/// Spawns the configured CLI (default `claude`) with a timeout per attempt
/// and a fixed backoff between retries.
pub struct ProcessDriver {
    pub executable: String,
    pub model: String,
    pub timeout_secs: u32,
    pub retries: u32,
    pub retry_backoff_secs: u32,
}

impl ProcessDriver {
    pub fn new(model: impl Into<String>, timeout_secs: u32, retries: u32, retry_backoff_secs: u32) -> Self {
        Self { executable: "claude".to_string(), model: model.into(), timeout_secs, retries, retry_backoff_secs }
    }

    async fn execute_once(&self, workdir: &Path, prompt: &str) -> Result<DriverOutput> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("-p")
            .arg("--dangerously-skip-permissions")
            .arg("--model")
            .arg(&self.model)
            .arg(prompt)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DriverError::ExecutableNotFound
            } else {
                DriverError::Io(e)
            }
        })?;

        let output = if self.timeout_secs > 0 {
            match timeout(Duration::from_secs(self.timeout_secs as u64), child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => return Err(DriverError::Timeout(self.timeout_secs)),
            }
        } else {
            child.wait_with_output().await?
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if exit_code != 0 {
            return Err(DriverError::ExitCode(exit_code));
        }

        Ok(DriverOutput { exit_code, stdout, attempts: 1 })
    }
}

impl Driver for ProcessDriver {
    fn execute<'a>(&'a self, workdir: &'a Path, prompt: &'a str) -> DriverFuture<'a> {
        Box::pin(async move {
            let max_attempts = self.retries + 1;
            let mut last_error = None;

            for attempt in 1..=max_attempts {
                info!(attempt, max_attempts, "executing driver step");
                match self.execute_once(workdir, prompt).await {
                    Ok(mut result) => {
                        result.attempts = attempt;
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "driver step failed");
                        last_error = Some(e);
                        if attempt < max_attempts {
                            tokio::time::sleep(Duration::from_secs(self.retry_backoff_secs as u64)).await;
                        }
                    }
                }
            }

            Err(last_error.unwrap_or(DriverError::RetriesExhausted))
        })
    }
}

/// Returns fixed output without spawning anything, optionally writing a
/// completed state document so the loop observes a terminal state on its
/// next poll. Used by the clone-disabled fallback scenario and by engine
/// tests that don't need a real sub-process.
pub struct NoopDriver {
    pub output: String,
    pub write_done_state: bool,
}

impl Default for NoopDriver {
    fn default() -> Self {
        Self { output: String::new(), write_done_state: true }
    }
}

impl NoopDriver {
    /// A double that never touches the state file, for tests that drive the
    /// state document themselves or want the run to stay in flight.
    pub fn inert() -> Self {
        Self { output: String::new(), write_done_state: false }
    }
}

impl Driver for NoopDriver {
    fn execute<'a>(&'a self, workdir: &'a Path, _prompt: &'a str) -> DriverFuture<'a> {
        let output = self.output.clone();
        let write_done_state = self.write_done_state;
        Box::pin(async move {
            if write_done_state {
                let doc = StateDocument {
                    current_step_description: "done".to_string(),
                    next_step_prompt: String::new(),
                    status: "completed".to_string(),
                };
                let path = workdir.join("agent_state").join("agent_state.json");
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, serde_json::to_string(&doc).unwrap_or_default())?;
            }
            Ok(DriverOutput { exit_code: 0, stdout: output, attempts: 1 })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn noop_driver_returns_output_and_writes_a_completed_state() {
        let driver = NoopDriver { output: "done".to_string(), write_done_state: true };
        let dir = TempDir::new().unwrap();
        let result = driver.execute(dir.path(), "do the thing").await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "done");

        let written = std::fs::read_to_string(dir.path().join("agent_state").join("agent_state.json")).unwrap();
        let doc: StateDocument = serde_json::from_str(&written).unwrap();
        assert_eq!(doc.status, "completed");
    }

    #[tokio::test]
    async fn inert_noop_driver_leaves_the_state_file_alone() {
        let driver = NoopDriver::inert();
        let dir = TempDir::new().unwrap();
        driver.execute(dir.path(), "prompt").await.unwrap();
        assert!(!dir.path().join("agent_state").exists());
    }

    #[tokio::test]
    async fn process_driver_reports_executable_not_found() {
        let mut driver = ProcessDriver::new("opus", 0, 0, 1);
        driver.executable = "agentctl-nonexistent-binary".to_string();
        let dir = TempDir::new().unwrap();
        let err = driver.execute(dir.path(), "prompt").await.unwrap_err();
        assert!(matches!(err, DriverError::ExecutableNotFound));
    }
}
