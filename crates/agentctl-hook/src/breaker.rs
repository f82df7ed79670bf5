//! Client-side circuit breaker for hook delivery, persisted at
//! `/tmp/<app>_circuit_breaker.json`. Opens after 5 consecutive failures,
//! closes again after 30 seconds without a failure.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const FAILURE_THRESHOLD: u32 = 5;
const QUIET_PERIOD_SECS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure: i64,
    is_open: bool,
}

pub struct CircuitBreaker {
    path: PathBuf,
    state: BreakerState,
}

impl CircuitBreaker {
    pub fn load(app_name: String) -> Self {
        let path = PathBuf::from(format!("/tmp/{app_name}_circuit_breaker.json"));
        let state = std::fs::read_to_string(&path).ok().and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default();
        Self { path, state }
    }

    pub fn is_open(&self) -> bool {
        if !self.state.is_open {
            return false;
        }
        now() - self.state.last_failure < QUIET_PERIOD_SECS
    }

    pub fn record_success(&mut self) {
        self.state.failure_count = 0;
        self.state.is_open = false;
    }

    pub fn record_failure(&mut self) {
        self.state.failure_count += 1;
        self.state.last_failure = now();
        if self.state.failure_count >= FAILURE_THRESHOLD {
            self.state.is_open = true;
        }
    }

    pub fn save(&self) {
        if let Ok(json) = serde_json::to_string(&self.state) {
            let _ = std::fs::write(&self.path, json);
        }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker_at(path: PathBuf) -> CircuitBreaker {
        CircuitBreaker { path, state: BreakerState::default() }
    }

    #[test]
    fn closed_breaker_with_no_failures_is_not_open() {
        let breaker = breaker_at(PathBuf::from("/tmp/does-not-matter"));
        assert!(!breaker.is_open());
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let mut breaker = breaker_at(PathBuf::from("/tmp/does-not-matter"));
        for _ in 0..4 {
            breaker.record_failure();
            assert!(!breaker.is_open());
        }
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failure_count_and_closes() {
        let mut breaker = breaker_at(PathBuf::from("/tmp/does-not-matter"));
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state.failure_count, 0);
    }

    #[test]
    fn open_breaker_past_the_quiet_period_reports_closed() {
        let mut breaker = breaker_at(PathBuf::from("/tmp/does-not-matter"));
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.state.last_failure = now() - QUIET_PERIOD_SECS - 1;
        assert!(!breaker.is_open());
    }

    #[test]
    fn persists_and_reloads_state_across_instances() {
        let path = std::env::temp_dir().join(format!("agentctl_hook_breaker_test_{}.json", std::process::id()));
        let mut breaker = breaker_at(path.clone());
        for _ in 0..5 {
            breaker.record_failure();
        }
        breaker.save();

        let reloaded_state: BreakerState = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(reloaded_state.is_open);
        assert_eq!(reloaded_state.failure_count, 5);

        let _ = std::fs::remove_file(&path);
    }
}
