//! Worktree provisioning: derives a branch slug, clones a source
//! repository when it recognizes a hosted-issue URL, and creates + publishes
//! the run's feature branch. Falls back to a plain empty directory whenever
//! cloning is disabled, the source isn't a recognized hosted-issue URL, or a
//! non-fatal clone step fails; authentication failures (including a failed
//! branch publish) are fatal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agentctl_core::slug::{resolve_collision, slug};
use agentctl_core::{DaemonConfig, Worktree};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const CREDENTIAL_SENTINEL: &str = "***";

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    Execution(#[from] std::io::Error),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("clone timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, GitError>;

/// The outcome of provisioning: the worktree itself plus a warning when the
/// run asked for a clone it didn't get.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub worktree: Worktree,
    pub warning: Option<String>,
}

/// A hosted-issue URL recognized for clone-backed provisioning, e.g.
/// `https://github.com/<org>/<repo>/issues/<n>`.
struct HostedIssue {
    clone_url: String,
}

fn recognize_hosted_issue(source_descriptor: &str) -> Option<HostedIssue> {
    let rest = source_descriptor
        .strip_prefix("https://github.com/")
        .or_else(|| source_descriptor.strip_prefix("https://gitlab.com/"))?;
    let host = if source_descriptor.starts_with("https://github.com/") {
        "https://github.com"
    } else {
        "https://gitlab.com"
    };
    let mut parts = rest.splitn(4, '/');
    let org = parts.next()?;
    let repo = parts.next()?;
    let kind = parts.next()?;
    let issue_num = parts.next()?;
    if kind != "issues" || issue_num.parse::<u64>().is_err() || org.is_empty() || repo.is_empty() {
        return None;
    }
    Some(HostedIssue { clone_url: format!("{host}/{org}/{repo}.git") })
}

/// Injects a credential into a clone URL (`https://<token>@host/...`), if one is configured.
fn inject_credential(clone_url: &str, credential: Option<&str>) -> String {
    match credential {
        Some(cred) if !cred.is_empty() => {
            clone_url.replacen("https://", &format!("https://{cred}@"), 1)
        }
        _ => clone_url.to_string(),
    }
}

/// Replaces a credential with a fixed sentinel wherever it would appear in a log line.
pub fn redact(line: &str, credential: Option<&str>) -> String {
    match credential {
        Some(cred) if !cred.is_empty() => line.replace(cred, CREDENTIAL_SENTINEL),
        _ => line.to_string(),
    }
}

async fn run_git(args: &[&str], cwd: &Path, credential: Option<&str>) -> Result<std::process::Output> {
    let output = Command::new("git").args(args).current_dir(cwd).kill_on_drop(true).output().await?;
    if !output.status.success() {
        let stderr = redact(&String::from_utf8_lossy(&output.stderr), credential);
        return Err(GitError::CommandFailed(format!("git {}: {stderr}", args.join(" "))));
    }
    Ok(output)
}

/// Snapshot of every branch name visible in the clone, local and remote,
/// taken once so collision resolution doesn't race concurrent provisioning.
async fn branch_snapshot(cwd: &Path) -> HashSet<String> {
    let Ok(output) = run_git(&["branch", "--all", "--format=%(refname:short)"], cwd, None).await else {
        return HashSet::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.strip_prefix("origin/").unwrap_or(l).to_string())
        .collect()
}

/// Provisions a worktree for a run. See the Worktree Provisioner component design.
pub async fn create(source_descriptor: &str, task_name: &str, config: &DaemonConfig) -> Result<Provisioned> {
    let credential = std::env::var("AGENTCTL_GIT_CREDENTIAL").ok();
    let branch = format!("{}/{}", config.branch_prefix, slug(task_name));

    let Some(hosted) = recognize_hosted_issue(source_descriptor) else {
        return Ok(Provisioned { worktree: plain_workdir(config, &branch)?, warning: None });
    };

    if !config.clone_enabled {
        return Ok(Provisioned {
            worktree: plain_workdir(config, &branch)?,
            warning: Some("cloning is disabled; run has no sources".to_string()),
        });
    }

    match clone_and_publish(&hosted.clone_url, &branch, config, credential.as_deref()).await {
        Ok(worktree) => Ok(Provisioned { worktree, warning: None }),
        Err(GitError::Auth(msg)) => Err(GitError::Auth(msg)),
        Err(e) => {
            debug!(error = %e, "clone failed, provisioning a plain working directory");
            Ok(Provisioned {
                worktree: plain_workdir(config, &branch)?,
                warning: Some(format!("clone failed, run has no sources: {e}")),
            })
        }
    }
}

fn plain_workdir(config: &DaemonConfig, branch: &str) -> Result<Worktree> {
    let dir = unique_dir(&config.worktree_root, "agentctl-run")?;
    std::fs::create_dir_all(&dir)?;
    Ok(Worktree { path: dir.to_string_lossy().to_string(), branch: branch.to_string(), parent_repo: None })
}

fn unique_dir(root: &Path, prefix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    for attempt in 0.. {
        let candidate = root.join(format!("{prefix}-{}", agentctl_core::ids::generate("dir")));
        if !candidate.exists() {
            return Ok(candidate);
        }
        if attempt > 100 {
            return Err(GitError::CommandFailed("could not allocate a unique directory".to_string()));
        }
    }
    unreachable!()
}

async fn clone_and_publish(
    clone_url: &str,
    base_branch: &str,
    config: &DaemonConfig,
    credential: Option<&str>,
) -> Result<Worktree> {
    let dir = unique_dir(&config.worktree_root, "agentctl-clone")?;
    let authed_url = inject_credential(clone_url, credential);
    let timeout = Duration::from_secs(config.clone_timeout_secs.max(1));

    let clone = Command::new("git")
        .args(["clone", "--depth", &config.clone_depth.to_string(), &authed_url, &dir.to_string_lossy()])
        .kill_on_drop(true)
        .output();
    let output = match tokio::time::timeout(timeout, clone).await {
        Ok(result) => result?,
        Err(_) => return Err(GitError::Timeout(timeout)),
    };

    if !output.status.success() {
        let stderr = redact(&String::from_utf8_lossy(&output.stderr), credential);
        if stderr.contains("not found") || stderr.contains("404") {
            return Err(GitError::RepoNotFound(stderr));
        }
        if stderr.contains("Authentication") || stderr.contains("403") || stderr.contains("401") {
            return Err(GitError::Auth(stderr));
        }
        return Err(GitError::CommandFailed(stderr));
    }

    let existing = branch_snapshot(&dir).await;
    let branch = resolve_collision(base_branch, |candidate| existing.contains(candidate));

    run_git(&["checkout", "-b", &branch], &dir, credential).await?;

    // A branch nobody can push to is useless to the workflow, so a failed
    // publish is fatal rather than another fallback.
    let push = Command::new("git")
        .args(["push", "-u", "origin", &branch])
        .current_dir(&dir)
        .kill_on_drop(true)
        .output();
    let push_output = match tokio::time::timeout(timeout, push).await {
        Ok(result) => result?,
        Err(_) => return Err(GitError::Timeout(timeout)),
    };
    if !push_output.status.success() {
        let stderr = redact(&String::from_utf8_lossy(&push_output.stderr), credential);
        return Err(GitError::Auth(format!("branch publish failed: {stderr}")));
    }

    Ok(Worktree { path: dir.to_string_lossy().to_string(), branch, parent_repo: Some(clone_url.to_string()) })
}

/// Removes a provisioned directory. Idempotent: a missing or partially
/// removed directory is not an error.
pub fn cleanup(worktree: &Worktree, auto_cleanup: bool) -> Result<()> {
    if !auto_cleanup {
        return Ok(());
    }
    let path = Path::new(&worktree.path);
    if !path.exists() {
        return Ok(());
    }
    std::fs::remove_dir_all(path).or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(GitError::Execution(e))
        }
    })
}
