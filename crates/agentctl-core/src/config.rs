//! Daemon configuration: built-in defaults, an optional key=value config
//! file, then environment knobs, then CLI flags (lowest to highest
//! precedence). This module owns the first two layers and the merge
//! primitive; `agentctld` applies the environment and CLI layers on top.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid boolean value for {key}: {value}")]
    InvalidBool { key: String, value: String },
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
}

/// Daemon configuration. Field names match the environment knobs of the
/// external interfaces section, snake_cased.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind_addr: String,
    pub auth_token: Option<String>,
    pub worktree_root: PathBuf,
    pub branch_prefix: String,
    pub clone_enabled: bool,
    pub clone_timeout_secs: u64,
    pub clone_depth: u32,
    pub driver_timeout_secs: u64,
    pub git_auto_cleanup: bool,
    pub state_poll_interval_ms: u64,
    pub keepalive_interval_secs: u64,
    pub stream_buffer_size: usize,
    pub max_clients_per_run: usize,
    pub replay_buffer_size: usize,
    pub tool_call_batch_size: usize,
    pub tool_call_sample_rate: u8,
    pub rate_limit_per_sec: u32,
    pub flush_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4170".to_string(),
            auth_token: None,
            worktree_root: PathBuf::from("."),
            branch_prefix: "run".to_string(),
            clone_enabled: true,
            clone_timeout_secs: 30,
            clone_depth: 1,
            driver_timeout_secs: 300,
            git_auto_cleanup: true,
            state_poll_interval_ms: 100,
            keepalive_interval_secs: 30,
            stream_buffer_size: 100,
            max_clients_per_run: 100,
            replay_buffer_size: 1000,
            tool_call_batch_size: 1000,
            tool_call_sample_rate: 100,
            rate_limit_per_sec: 100,
            flush_interval_ms: 1000,
        }
    }
}

impl DaemonConfig {
    /// Loads config from a file, merging on top of [`Default::default`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        Ok(config)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };
            let key = key.trim();
            let value = Self::unquote(value.trim());
            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "bind_addr" => self.bind_addr = value.to_string(),
            "auth_token" => self.auth_token = if value.is_empty() { None } else { Some(value.to_string()) },
            "worktree_root" => self.worktree_root = PathBuf::from(value),
            "branch_prefix" => self.branch_prefix = value.to_string(),
            "clone_enabled" => self.clone_enabled = Self::parse_bool(key, value)?,
            "clone_timeout_secs" => self.clone_timeout_secs = Self::parse_int(key, value)?,
            "clone_depth" => self.clone_depth = Self::parse_int(key, value)?,
            "driver_timeout_secs" => self.driver_timeout_secs = Self::parse_int(key, value)?,
            "git_auto_cleanup" => self.git_auto_cleanup = Self::parse_bool(key, value)?,
            "state_poll_interval_ms" => self.state_poll_interval_ms = Self::parse_int(key, value)?,
            "keepalive_interval_secs" => self.keepalive_interval_secs = Self::parse_int(key, value)?,
            "stream_buffer_size" => self.stream_buffer_size = Self::parse_int(key, value)?,
            "max_clients_per_run" => self.max_clients_per_run = Self::parse_int(key, value)?,
            "replay_buffer_size" => self.replay_buffer_size = Self::parse_int(key, value)?,
            "tool_call_batch_size" => self.tool_call_batch_size = Self::parse_int(key, value)?,
            "tool_call_sample_rate" => self.tool_call_sample_rate = Self::parse_int(key, value)?,
            "rate_limit_per_sec" => self.rate_limit_per_sec = Self::parse_int(key, value)?,
            "flush_interval_ms" => self.flush_interval_ms = Self::parse_int(key, value)?,
            _ => {
                eprintln!("Warning: unknown config key: {key}");
            }
        }
        Ok(())
    }

    fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
        match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(true),
            "false" | "0" | "no" | "n" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidBool { key: key.to_string(), value: value.to_string() }),
        }
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt { key: key.to_string(), value: value.to_string() })
    }

    /// Applies the environment knobs of the external interfaces section on
    /// top of the current values (config-file or defaults).
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("STREAM_BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.stream_buffer_size = v;
            self.replay_buffer_size = v;
        }
        if let Some(v) = get("MAX_CLIENTS_PER_RUN").and_then(|v| v.parse().ok()) {
            self.max_clients_per_run = v;
        }
        if let Some(v) = get("TOOL_CALL_BATCH_SIZE").and_then(|v| v.parse().ok()) {
            self.tool_call_batch_size = v;
        }
        if let Some(v) = get("TOOL_CALL_SAMPLE_RATE").and_then(|v| v.parse().ok()) {
            self.tool_call_sample_rate = v;
        }
        if let Some(v) = get("GIT_AUTO_CLEANUP").and_then(|v| Self::parse_bool("GIT_AUTO_CLEANUP", &v).ok()) {
            self.git_auto_cleanup = v;
        }
        if let Some(v) = get("AGENTCTL_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("AGENTCTL_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:4170");
        assert_eq!(config.max_clients_per_run, 100);
        assert_eq!(config.replay_buffer_size, 1000);
        assert_eq!(config.rate_limit_per_sec, 100);
    }

    #[test]
    fn parse_simple_config() {
        let mut config = DaemonConfig::default();
        let content = "bind_addr=\"0.0.0.0:8080\"\nmax_clients_per_run=5\ngit_auto_cleanup=false\n";
        config.parse_content(content).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_clients_per_run, 5);
        assert!(!config.git_auto_cleanup);
    }

    #[test]
    fn unquote_removes_quotes() {
        assert_eq!(DaemonConfig::unquote("\"hello\""), "hello");
        assert_eq!(DaemonConfig::unquote("'world'"), "world");
        assert_eq!(DaemonConfig::unquote("noquotes"), "noquotes");
    }

    #[test]
    fn parse_bool_accepts_variants() {
        assert!(DaemonConfig::parse_bool("k", "true").unwrap());
        assert!(DaemonConfig::parse_bool("k", "on").unwrap());
        assert!(!DaemonConfig::parse_bool("k", "off").unwrap());
        assert!(DaemonConfig::parse_bool("k", "nope").is_err());
    }

    #[test]
    fn env_knob_overrides_file_value() {
        let mut config = DaemonConfig::default();
        config.parse_content("max_clients_per_run=5").unwrap();
        config.apply_env(|name| if name == "MAX_CLIENTS_PER_RUN" { Some("42".to_string()) } else { None });
        assert_eq!(config.max_clients_per_run, 42);
    }

    #[test]
    fn env_knob_absent_leaves_file_value_untouched() {
        let mut config = DaemonConfig::default();
        config.parse_content("max_clients_per_run=5").unwrap();
        config.apply_env(|_| None);
        assert_eq!(config.max_clients_per_run, 5);
    }
}
