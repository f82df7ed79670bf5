//! Core data types shared by the daemon, the CLI, and the hook programs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlanId, RunId};

/// Lifecycle status of a [`Run`]. Only `Running` may transition out, and
/// only to one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    /// Whether this run may transition to `to` under the run state-machine DAG.
    pub fn can_transition_to(self, to: RunStatus) -> bool {
        matches!(self, RunStatus::Running)
            && matches!(to, RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed)
    }
}

/// Lifecycle status of a [`Plan`]. Only `Pending` may transition out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Approved,
    Rejected,
}

impl PlanStatus {
    pub fn can_transition_to(self, to: PlanStatus) -> bool {
        matches!(self, PlanStatus::Pending)
            && matches!(to, PlanStatus::Approved | PlanStatus::Rejected)
    }
}

/// A single agent workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_id: String,
    pub status: RunStatus,
    pub source: String,
    pub workdir: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(agent_id: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::new(),
            agent_id: agent_id.into(),
            status: RunStatus::Running,
            source: source.into(),
            workdir: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts the transition, mutating `status`/`updated_at` on success.
    pub fn transition_to(&mut self, to: RunStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition { from: format!("{:?}", self.status), to: format!("{to:?}") });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A proposed plan awaiting approval, bound to its run's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub run_id: RunId,
    pub content: String,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(run_id: RunId, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PlanId::new(),
            run_id,
            content: content.into(),
            status: PlanStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, to: PlanStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition { from: format!("{:?}", self.status), to: format!("{to:?}") });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: String,
    pub to: String,
}

/// The on-disk record written by the sub-process and read every iteration.
///
/// See `<workdir>/agent_state/agent_state.json` in the external interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateDocument {
    pub current_step_description: String,
    pub next_step_prompt: String,
    pub status: String,
}

impl StateDocument {
    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }

    /// The mutated document an `ApprovePlan` call writes back to disk.
    pub fn approved() -> Self {
        Self {
            current_step_description: "Plan approved, continuing implementation".to_string(),
            next_step_prompt: "/run_implementation_loop".to_string(),
            status: "running".to_string(),
        }
    }
}

/// A provisioned working directory: a shallow clone plus its feature branch,
/// or a plain empty directory when cloning was disabled or fell back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub path: String,
    pub branch: String,
    pub parent_repo: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_can_only_leave_running_to_terminal_states() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Cancelled));
    }

    #[test]
    fn plan_can_only_leave_pending() {
        assert!(PlanStatus::Pending.can_transition_to(PlanStatus::Approved));
        assert!(PlanStatus::Pending.can_transition_to(PlanStatus::Rejected));
        assert!(!PlanStatus::Approved.can_transition_to(PlanStatus::Rejected));
    }

    #[test]
    fn run_transition_to_updates_timestamp() {
        let mut run = Run::new("agent-1", "https://example.invalid/org/repo");
        let before = run.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        run.transition_to(RunStatus::Completed).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.updated_at >= before);
    }

    #[test]
    fn run_invalid_transition_is_rejected() {
        let mut run = Run::new("agent-1", "src");
        run.transition_to(RunStatus::Completed).unwrap();
        assert!(run.transition_to(RunStatus::Failed).is_err());
    }

    #[test]
    fn state_document_approved_matches_contract() {
        let doc = StateDocument::approved();
        assert_eq!(doc.next_step_prompt, "/run_implementation_loop");
        assert_eq!(doc.status, "running");
    }
}
