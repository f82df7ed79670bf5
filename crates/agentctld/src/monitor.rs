//! The state monitor: one cooperative polling task per run, watching
//! the agent's on-disk state document for content changes and turning them
//! into `state_changed` events. Tolerant of the file not existing yet or
//! being mid-write — those are logged at debug level and retried on the
//! next tick, never treated as a terminal error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agentctl_core::{Event, RunId, StateDocument};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls `state_path` for changes and emits a `state_changed` event on
/// `tx` each time the parsed content differs from what was last emitted
/// (or on the first successful parse). Returns once `cancel` fires.
pub async fn watch(
    run_id: RunId,
    state_path: PathBuf,
    poll_interval: Duration,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    let mut last: Option<StateDocument> = None;
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match read_state(&state_path) {
                    Ok(doc) => {
                        if last.as_ref() != Some(&doc) {
                            last = Some(doc.clone());
                            if tx.send(Event::state_changed(run_id.clone(), &doc)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => debug!(run_id = %run_id, error = %e, "state document not readable yet"),
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

fn read_state(path: &Path) -> std::io::Result<StateDocument> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .or_else(|_| serde_yaml::from_str(&content))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn emits_once_file_becomes_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let run_id = RunId::new();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(run_id, path.clone(), StdDuration::from_millis(10), tx, cancel.clone()));

        tokio::time::sleep(StdDuration::from_millis(25)).await;
        std::fs::write(&path, r#"{"current_step_description":"a","next_step_prompt":"b","status":"running"}"#).unwrap();

        let ev = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(ev.event_type, agentctl_core::EventType::StateChanged);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_content_is_not_re_emitted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, r#"{"current_step_description":"a","next_step_prompt":"b","status":"running"}"#).unwrap();
        let run_id = RunId::new();
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(run_id, path.clone(), StdDuration::from_millis(10), tx, cancel.clone()));

        let first = tokio::time::timeout(StdDuration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.event_type, agentctl_core::EventType::StateChanged);

        // rewrite identical content; no second event should arrive quickly.
        std::fs::write(&path, r#"{"current_step_description":"a","next_step_prompt":"b","status":"running"}"#).unwrap();
        let second = tokio::time::timeout(StdDuration::from_millis(80), rx.recv()).await;
        assert!(second.is_err(), "expected no duplicate emission, got {second:?}");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rapid_rewrites_each_emit_a_matching_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let run_id = RunId::new();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(run_id, path.clone(), StdDuration::from_millis(10), tx, cancel.clone()));

        let bodies: Vec<String> = (0..5)
            .map(|i| format!(r#"{{"current_step_description":"step {i}","next_step_prompt":"p{i}","status":"running"}}"#))
            .collect();
        for body in &bodies {
            std::fs::write(&path, body).unwrap();
            tokio::time::sleep(StdDuration::from_millis(30)).await;
        }

        cancel.cancel();
        handle.await.unwrap();

        let mut seen = 0;
        while let Some(ev) = rx.recv().await {
            let desc = ev.data.as_ref().and_then(|d| d.get("current_step_description")).and_then(|v| v.as_str()).unwrap().to_string();
            assert!(bodies.iter().any(|b| b.contains(&format!(r#""{desc}""#))), "unexpected body {desc}");
            seen += 1;
        }
        assert!(seen >= 3, "expected at least 3 distinct observations, saw {seen}");
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_cleanly() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let run_id = RunId::new();
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(watch(run_id, path, StdDuration::from_millis(10), tx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(StdDuration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
