//! The workflow engine: owns the run/plan registry and drives each run's
//! provisioning, iteration loop, and terminal state machine. The registry
//! is a plain in-memory map behind a mutex (nothing here survives a
//! restart) and concurrency is per-run rather than globally capped;
//! nothing in this design bounds how many runs may be in flight at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agentctl_core::{
    DaemonConfig, Event, EngineError, Plan, Run, RunId, RunStatus, StateDocument, Worktree,
};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::driver::Driver;
use crate::git;
use crate::hub::EventHub;
use crate::ingestor::Ingestor;
use crate::monitor;
use crate::streamer;
use crate::validator::Validator;

const PLAN_PROMPT: &str = "/create_plan";
const IMPLEMENTATION_PROMPT: &str = "/run_implementation_loop";

struct RunHandle {
    run: Run,
    plan: Option<Plan>,
    workdir: Option<PathBuf>,
    worktree: Option<Worktree>,
    cancel: CancellationToken,
    insertion_seq: u64,
}

struct Inner {
    config: Arc<DaemonConfig>,
    hub: EventHub,
    validator: Mutex<Validator>,
    ingestor: Ingestor,
    driver: Arc<dyn Driver>,
    runs: Mutex<HashMap<RunId, RunHandle>>,
    next_insertion_seq: AtomicU64,
}

/// The engine's public contract: `StartWorkflow`, `CancelWorkflow`,
/// `GetWorkflowState`, `ApprovePlan`, `SubscribeToEvents`, `Cleanup`.
#[derive(Clone)]
pub struct Engine(Arc<Inner>);

impl Engine {
    pub fn new(config: DaemonConfig, driver: Arc<dyn Driver>) -> Self {
        let config = Arc::new(config);
        Self(Arc::new(Inner {
            hub: EventHub::new(&config),
            validator: Mutex::new(Validator::new()),
            ingestor: Ingestor::new(&config),
            driver,
            config,
            runs: Mutex::new(HashMap::new()),
            next_insertion_seq: AtomicU64::new(0),
        }))
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.0.ingestor
    }

    pub fn hub(&self) -> &EventHub {
        &self.0.hub
    }

    async fn publish_validated(&self, event: Event) {
        let mut validator = self.0.validator.lock().await;
        if let Err(e) = validator.validate(&event) {
            warn!(run_id = %event.run_id, error = %e, "engine produced an event that fails its own grammar");
            return;
        }
        drop(validator);
        self.0.hub.publish(event);
    }

    /// Starts a new run: provisions a workdir, publishes `run_started`, then
    /// drives the iteration loop in a background task. Returns the run id
    /// and the absolute workdir path. A caller-supplied run id that is
    /// already registered is rejected with a conflict.
    pub async fn start_workflow(
        &self,
        run_id: Option<RunId>,
        agent_id: impl Into<String>,
        source: impl Into<String>,
        task_name: &str,
        initial_prompt: impl Into<String>,
        plan_mode: bool,
    ) -> Result<(RunId, String), EngineError> {
        let mut run = Run::new(agent_id, source);
        if let Some(id) = run_id {
            run.id = id;
        }
        let run_id = run.id.clone();
        let source = run.source.clone();
        let cancel = CancellationToken::new();

        {
            let mut runs = self.0.runs.lock().await;
            if runs.contains_key(&run_id) {
                return Err(EngineError::Conflict(format!("run {run_id} already exists")));
            }
            let insertion_seq = self.0.next_insertion_seq.fetch_add(1, Ordering::Relaxed);
            runs.insert(
                run_id.clone(),
                RunHandle { run, plan: None, workdir: None, worktree: None, cancel: cancel.clone(), insertion_seq },
            );
        }

        let provisioned = match git::create(&source, task_name, &self.0.config).await {
            Ok(p) => p,
            Err(e) => {
                self.publish_validated(Event::run_started(run_id.clone())).await;
                self.fail_run(&run_id, &format!("provisioning failed: {e}")).await;
                return Err(match e {
                    git::GitError::Auth(_) => EngineError::Auth,
                    other => EngineError::Provisioning(other.to_string()),
                });
            }
        };

        let workdir = PathBuf::from(&provisioned.worktree.path);
        {
            let mut runs = self.0.runs.lock().await;
            if let Some(handle) = runs.get_mut(&run_id) {
                handle.run.workdir = Some(provisioned.worktree.path.clone());
                handle.workdir = Some(workdir.clone());
                handle.worktree = Some(provisioned.worktree.clone());
            }
        }

        let started = match &provisioned.warning {
            Some(warning) => Event::run_started_with_warning(run_id.clone(), warning.clone()),
            None => Event::run_started(run_id.clone()),
        };
        self.publish_validated(started).await;

        let mut prompt = initial_prompt.into();
        if prompt.is_empty() {
            prompt = if plan_mode { PLAN_PROMPT.to_string() } else { IMPLEMENTATION_PROMPT.to_string() };
        }

        let engine = self.clone();
        let spawned_run_id = run_id.clone();
        let worktree = provisioned.worktree.clone();
        tokio::spawn(async move {
            engine.run_loop(spawned_run_id, worktree, prompt, cancel).await;
        });

        Ok((run_id, provisioned.worktree.path))
    }

    /// Cancels a run's loop. Idempotent: cancelling an already-cancelled or
    /// already-finished run is a no-op beyond the token.
    pub async fn cancel_workflow(&self, run_id: &RunId) -> Result<(), EngineError> {
        let runs = self.0.runs.lock().await;
        let handle = runs.get(run_id).ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;
        handle.cancel.cancel();
        Ok(())
    }

    pub async fn get_run(&self, run_id: &RunId) -> Option<Run> {
        self.0.runs.lock().await.get(run_id).map(|h| h.run.clone())
    }

    /// Reads a run's current state document off disk. An absent or
    /// unparseable file reads as the empty document, never an error.
    pub async fn get_workflow_state(&self, run_id: &RunId) -> Result<StateDocument, EngineError> {
        let workdir = {
            let runs = self.0.runs.lock().await;
            runs.get(run_id).ok_or_else(|| EngineError::NotFound(run_id.to_string()))?.workdir.clone()
        };
        Ok(workdir.map(|dir| read_state_document(&dir)).unwrap_or_default())
    }

    /// Lists every run the engine currently knows about, most recently
    /// started first. Cleared runs drop out once `cleanup` removes them.
    pub async fn list_workflows(&self) -> Vec<Run> {
        let mut runs: Vec<(u64, Run)> = self.0.runs.lock().await.values().map(|h| (h.insertion_seq, h.run.clone())).collect();
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        runs.into_iter().map(|(_, run)| run).collect()
    }

    pub async fn get_plan(&self, run_id: &RunId) -> Option<Plan> {
        self.0.runs.lock().await.get(run_id).and_then(|h| h.plan.clone())
    }

    /// Approves a run's plan: transitions the tracked plan if one is
    /// pending, writes the approved state document so the loop picks up the
    /// implementation prompt on its next poll, and publishes `plan_approved`.
    pub async fn approve_plan(&self, run_id: &RunId) -> Result<(), EngineError> {
        let workdir = {
            let mut runs = self.0.runs.lock().await;
            let handle = runs.get_mut(run_id).ok_or_else(|| EngineError::NotFound(run_id.to_string()))?;
            if let Some(plan) = handle.plan.as_mut() {
                plan.transition_to(agentctl_core::PlanStatus::Approved)
                    .map_err(|e| EngineError::Conflict(e.to_string()))?;
            }
            handle.workdir.clone()
        };

        if let Some(workdir) = workdir {
            let doc = StateDocument::approved();
            let path = agent_state_path(&workdir);
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap_or_default())
                .map_err(|e| EngineError::Internal(e.to_string()))?;
        }

        self.publish_validated(Event::plan_approved(run_id.clone())).await;
        Ok(())
    }

    /// Subscribes to a run's event stream. The stream leads with a
    /// synthesized `state_changed` snapshot of the current state document,
    /// then follows the hub's own discipline (`connected`, replay, live).
    pub async fn subscribe_to_events(&self, run_id: RunId) -> Result<mpsc::Receiver<Event>, EngineError> {
        let mut hub_rx = self.0.hub.subscribe(run_id.clone())?;
        let known_workdir = {
            let runs = self.0.runs.lock().await;
            runs.get(&run_id).map(|h| h.workdir.clone())
        };

        let (tx, rx) = mpsc::channel(self.0.config.stream_buffer_size.max(1));
        tokio::spawn(async move {
            if let Some(workdir) = known_workdir {
                let doc = workdir.map(|dir| read_state_document(&dir)).unwrap_or_default();
                if tx.send(Event::state_changed(run_id, &doc)).await.is_err() {
                    return;
                }
            }
            while let Some(event) = hub_rx.recv().await {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Removes a run's bookkeeping: cancels its loop, releases its tracked
    /// working directory (iff auto-cleanup is on), and drops it from the
    /// registry. Safe to call on an already absent run.
    pub async fn cleanup(&self, run_id: &RunId) {
        let handle = self.0.runs.lock().await.remove(run_id);
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Some(worktree) = &handle.worktree {
                if let Err(e) = git::cleanup(worktree, self.0.config.git_auto_cleanup) {
                    warn!(run_id = %run_id, path = %worktree.path, error = %e, "failed to remove run directory");
                }
            }
        }
        self.0.hub.cleanup(run_id);
        self.0.validator.lock().await.cleanup(run_id);
    }

    async fn run_loop(&self, run_id: RunId, worktree: Worktree, initial_prompt: String, cancel: CancellationToken) {
        let workdir = PathBuf::from(&worktree.path);

        let (state_tx, mut state_rx) = mpsc::channel(8);
        let monitor_handle = tokio::spawn(monitor::watch(
            run_id.clone(),
            agent_state_path(&workdir),
            std::time::Duration::from_millis(self.0.config.state_poll_interval_ms),
            state_tx,
            cancel.clone(),
        ));

        let mut prompt = initial_prompt;
        let mut outcome = RunStatus::Completed;
        let mut failure_reason: Option<String> = None;
        let mut awaiting_plan = false;

        loop {
            if cancel.is_cancelled() {
                outcome = RunStatus::Cancelled;
                break;
            }

            if !awaiting_plan {
                let message_id = agentctl_core::ids::generate("msg");
                let (chunk_tx, chunk_rx) = mpsc::channel(1);
                let (event_tx, mut event_rx) = mpsc::channel(8);
                let stream_task = tokio::spawn(streamer::stream_output(run_id.clone(), message_id, chunk_rx, event_tx));

                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        outcome = RunStatus::Cancelled;
                        drop(chunk_tx);
                        let _ = stream_task.await;
                        break;
                    }
                    result = self.0.driver.execute(&workdir, &prompt) => result,
                };
                match result {
                    Ok(output) => {
                        let _ = chunk_tx.send(output.stdout).await;
                    }
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "driver invocation failed");
                        outcome = RunStatus::Failed;
                        failure_reason = Some(e.to_string());
                    }
                }
                drop(chunk_tx);
                let _ = stream_task.await;
                while let Some(event) = event_rx.recv().await {
                    self.publish_validated(event).await;
                }

                if failure_reason.is_some() {
                    break;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => { outcome = RunStatus::Cancelled; break; }
                maybe_state = state_rx.recv() => {
                    let Some(state_event) = maybe_state else { break; };
                    self.publish_validated(state_event.clone()).await;
                    let Some(doc) = state_event.data.as_ref().and_then(|d| serde_json::from_value::<StateDocument>(serde_json::Value::Object(d.clone())).ok()) else { continue; };

                    if doc.status == "plan_pending" {
                        let mut runs = self.0.runs.lock().await;
                        if let Some(handle) = runs.get_mut(&run_id) {
                            if handle.plan.is_none() {
                                handle.plan = Some(Plan::new(run_id.clone(), doc.current_step_description.clone()));
                            }
                        }
                        awaiting_plan = true;
                        continue;
                    }

                    awaiting_plan = false;
                    if doc.is_completed() {
                        outcome = RunStatus::Completed;
                        break;
                    }
                    if doc.is_cancelled() {
                        outcome = RunStatus::Cancelled;
                        break;
                    }
                    prompt = doc.next_step_prompt;
                }
            }
        }

        cancel.cancel();
        let _ = monitor_handle.await;

        {
            let mut runs = self.0.runs.lock().await;
            if let Some(handle) = runs.get_mut(&run_id) {
                let _ = handle.run.transition_to(outcome);
            }
        }

        match outcome {
            RunStatus::Completed => self.publish_validated(Event::run_finished(run_id.clone())).await,
            RunStatus::Cancelled => self.publish_validated(Event::workflow_cancelled(run_id.clone())).await,
            RunStatus::Failed => {
                self.publish_validated(Event::run_error(run_id.clone(), failure_reason.unwrap_or_default())).await
            }
            RunStatus::Running => unreachable!("loop always resolves to a terminal status"),
        }

        if let Err(e) = git::cleanup(&worktree, self.0.config.git_auto_cleanup) {
            warn!(run_id = %run_id, path = %worktree.path, error = %e, "failed to remove run directory");
        }
        info!(run_id = %run_id, status = ?outcome, "run finished");
    }

    async fn fail_run(&self, run_id: &RunId, reason: &str) {
        {
            let mut runs = self.0.runs.lock().await;
            if let Some(handle) = runs.get_mut(run_id) {
                let _ = handle.run.transition_to(RunStatus::Failed);
            }
        }
        self.publish_validated(Event::run_error(run_id.clone(), reason)).await;
    }
}

fn agent_state_path(workdir: &Path) -> PathBuf {
    workdir.join("agent_state").join("agent_state.json")
}

fn read_state_document(workdir: &Path) -> StateDocument {
    std::fs::read_to_string(agent_state_path(workdir))
        .ok()
        .and_then(|content| serde_json::from_str(&content).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::NoopDriver;
    use agentctl_core::EventType;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.worktree_root = root.to_path_buf();
        config.clone_enabled = false;
        config.state_poll_interval_ms = 10;
        config
    }

    async fn next_event(rx: &mut mpsc::Receiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    async fn wait_for_terminal(rx: &mut mpsc::Receiver<Event>) -> Event {
        loop {
            let ev = next_event(rx).await;
            if ev.event_type.is_terminal() {
                return ev;
            }
        }
    }

    #[tokio::test]
    async fn run_with_noop_driver_completes_on_its_own() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));

        let (run_id, workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "do the thing", "start", false).await.unwrap();
        assert!(Path::new(&workdir).exists());

        let mut rx = engine.subscribe_to_events(run_id.clone()).await.unwrap();
        let snapshot = next_event(&mut rx).await;
        assert_eq!(snapshot.event_type, EventType::StateChanged);
        let connected = next_event(&mut rx).await;
        assert_eq!(connected.event_type, EventType::Connected);

        let terminal = wait_for_terminal(&mut rx).await;
        assert_eq!(terminal.event_type, EventType::RunFinished);
        let run = engine.get_run(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_run_id_is_rejected_with_conflict() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::inert()));
        let run_id = RunId::new();
        engine.start_workflow(Some(run_id.clone()), "agent-1", "local-checkout", "task", "start", false).await.unwrap();
        let err = engine.start_workflow(Some(run_id.clone()), "agent-1", "local-checkout", "task", "start", false).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
        engine.cancel_workflow(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn clone_disabled_hosted_issue_source_warns_on_run_started() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));
        let (run_id, _workdir) = engine
            .start_workflow(None, "agent-1", "https://github.com/acme/widgets/issues/7", "fix it", "start", false)
            .await
            .unwrap();

        let mut rx = engine.subscribe_to_events(run_id).await.unwrap();
        let started = loop {
            let ev = next_event(&mut rx).await;
            if ev.event_type == EventType::RunStarted {
                break ev;
            }
        };
        assert!(started.data_field("warning").is_some());
    }

    #[tokio::test]
    async fn cancel_workflow_on_unknown_run_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));
        let err = engine.cancel_workflow(&RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_workflow_emits_workflow_cancelled_promptly() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::inert()));
        let (run_id, _workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "task", "start", false).await.unwrap();
        let mut rx = engine.subscribe_to_events(run_id.clone()).await.unwrap();

        engine.cancel_workflow(&run_id).await.unwrap();
        let terminal = tokio::time::timeout(Duration::from_millis(200), wait_for_terminal(&mut rx)).await.unwrap();
        assert_eq!(terminal.event_type, EventType::WorkflowCancelled);
    }

    #[tokio::test]
    async fn list_workflows_returns_most_recent_first() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));
        let (first, _) = engine.start_workflow(None, "agent-1", "local-checkout", "task-a", "start", false).await.unwrap();
        let (second, _) = engine.start_workflow(None, "agent-2", "local-checkout", "task-b", "start", false).await.unwrap();
        let runs = engine.list_workflows().await;
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[1].id, first);
    }

    #[tokio::test]
    async fn approve_plan_on_unknown_run_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));
        let err = engine.approve_plan(&RunId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn approve_plan_mutates_state_and_publishes_plan_approved() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::inert()));
        let (run_id, _workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "task", "start", false).await.unwrap();
        let mut rx = engine.subscribe_to_events(run_id.clone()).await.unwrap();

        engine.approve_plan(&run_id).await.unwrap();

        let doc = engine.get_workflow_state(&run_id).await.unwrap();
        assert_eq!(doc.next_step_prompt, "/run_implementation_loop");
        assert_eq!(doc.status, "running");

        let approved = loop {
            let ev = next_event(&mut rx).await;
            if ev.event_type == EventType::PlanApproved {
                break ev;
            }
        };
        assert_eq!(approved.run_id, run_id);
        engine.cancel_workflow(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn plan_pending_state_registers_a_pending_plan() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::inert()));
        let (run_id, workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "task", "start", false).await.unwrap();

        let state_path = agent_state_path(Path::new(&workdir));
        std::fs::create_dir_all(state_path.parent().unwrap()).unwrap();
        std::fs::write(
            &state_path,
            r#"{"current_step_description":"drafted a plan","next_step_prompt":"","status":"plan_pending"}"#,
        )
        .unwrap();

        let plan = loop {
            if let Some(plan) = engine.get_plan(&run_id).await {
                break plan;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(plan.status, agentctl_core::PlanStatus::Pending);
        assert_eq!(plan.content, "drafted a plan");
        engine.cancel_workflow(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn get_workflow_state_with_no_file_reads_as_empty_document() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::inert()));
        let (run_id, _workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "task", "start", false).await.unwrap();
        let doc = engine.get_workflow_state(&run_id).await.unwrap();
        assert_eq!(doc, StateDocument::default());
        engine.cancel_workflow(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_forgets_the_run() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::new(test_config(tmp.path()), Arc::new(NoopDriver::default()));
        let (run_id, _workdir) = engine.start_workflow(None, "agent-1", "local-checkout", "task", "start", false).await.unwrap();
        engine.cleanup(&run_id).await;
        assert!(engine.get_run(&run_id).await.is_none());
    }
}
