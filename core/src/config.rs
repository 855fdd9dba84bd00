//! Explicit configuration, threaded through `SessionManager`/`DurableStore`/
//! `EventLog` at construction instead of read from process-wide singletons.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration, loaded once at session open.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub session: SessionConfig,
    pub clarification: ClarificationConfig,
    pub store: StoreConfig,
    pub redaction: RedactionConfig,
    pub repl: ReplConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            session: SessionConfig::default(),
            clarification: ClarificationConfig::default(),
            store: StoreConfig::default(),
            redaction: RedactionConfig::default(),
            repl: ReplConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    #[serde(rename = "default-executor")]
    pub default_executor: String,
    #[serde(rename = "hard-timeout-ms")]
    pub hard_timeout_ms: u64,
    #[serde(rename = "grace-window-ms")]
    pub grace_window_ms: u64,
    #[serde(rename = "output-capture-bytes")]
    pub output_capture_bytes: usize,
    /// When set, selects a `StubBehavior` instead of spawning a real
    /// process; used to drive the recovery scenarios end to end without a
    /// live executor.
    #[serde(rename = "recovery-scenario")]
    pub recovery_scenario: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_executor: "process".to_string(),
            hard_timeout_ms: 120_000,
            grace_window_ms: 5_000,
            output_capture_bytes: 10 * 1024 * 1024,
            recovery_scenario: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Forces the console to treat every line as a complete command,
    /// disabling any future multi-line paste accumulation.
    #[serde(rename = "single-line")]
    pub single_line: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self { single_line: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(rename = "trace")]
    pub trace_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { trace_enabled: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(rename = "default-project-mode")]
    pub default_project_mode: String,
    #[serde(rename = "project-dir-name")]
    pub project_dir_name: String,
    #[serde(rename = "wait-for-all-on-close")]
    pub wait_for_all_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_project_mode: "cwd".to_string(),
            project_dir_name: ".claude".to_string(),
            wait_for_all_on_close: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationConfig {
    /// Repeat-clarification history bound; session-lifetime, not
    /// time-bounded — see DESIGN.md.
    #[serde(rename = "history-window")]
    pub history_window: usize,
}

impl Default for ClarificationConfig {
    fn default() -> Self {
        Self { history_window: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(rename = "state-dir")]
    pub state_dir: PathBuf,
    #[serde(rename = "default-namespace")]
    pub default_namespace: String,
    #[serde(rename = "stale-task-age-ms")]
    pub stale_task_age_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            default_namespace: "default".to_string(),
            stale_task_age_ms: 3_600_000,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("forge")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    #[serde(rename = "credential-key-patterns")]
    pub credential_key_patterns: Vec<String>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            credential_key_patterns: vec![
                "(?i)api[_-]?key".to_string(),
                "(?i)token".to_string(),
                "(?i)secret".to_string(),
                "(?i)password".to_string(),
                "(?i)authorization".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load order: explicit `path` → `.forge.yml` in the current directory →
    /// `~/.config/forge/forge.yml` → built-in defaults.
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path {
            return Self::load_from_file(path).unwrap_or_else(|| {
                warn!(?path, "failed to load explicit config path, using defaults");
                Self::default()
            });
        }

        let local = PathBuf::from(".forge.yml");
        if local.exists() {
            if let Some(cfg) = Self::load_from_file(&local) {
                return cfg;
            }
            warn!(?local, "failed to parse local config, falling through");
        }

        if let Some(config_dir) = dirs::config_dir() {
            let global = config_dir.join("forge").join("forge.yml");
            if global.exists() {
                if let Some(cfg) = Self::load_from_file(&global) {
                    return cfg;
                }
                warn!(?global, "failed to parse global config, falling through");
            }
        }

        Self::default()
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_yaml::from_str(&contents).ok()
    }

    /// Overlay environment variable overrides, read once at session open and
    /// folded into the resolved config, never polled again afterward.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("FORGE_EXECUTION_MODE") {
            self.executor.default_executor = mode;
        }
        if let Ok(ms) = std::env::var("FORGE_TIMEOUT_MS").and_then(|v| v.parse::<u64>().map_err(|_| std::env::VarError::NotPresent)) {
            self.executor.hard_timeout_ms = ms;
        }
        if let Ok(ms) = std::env::var("FORGE_GRACE_MS").and_then(|v| v.parse::<u64>().map_err(|_| std::env::VarError::NotPresent)) {
            self.executor.grace_window_ms = ms;
        }
        if let Ok(ns) = std::env::var("FORGE_NAMESPACE") {
            self.store.default_namespace = ns;
        }
        if let Ok(scenario) = std::env::var("FORGE_RECOVERY_SCENARIO") {
            self.executor.recovery_scenario = Some(scenario);
        }
        if let Ok(flag) = std::env::var("FORGE_SINGLE_LINE") {
            self.repl.single_line = flag != "0";
        }
        if let Ok(flag) = std::env::var("FORGE_TRACE") {
            self.logging.trace_enabled = flag == "1";
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let cfg = Config::default();
        assert_eq!(cfg.executor.default_executor, "process");
        assert!(cfg.executor.grace_window_ms < cfg.executor.hard_timeout_ms);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("FORGE_NAMESPACE", "test-ns");
        std::env::set_var("FORGE_RECOVERY_SCENARIO", "timeout");
        std::env::set_var("FORGE_SINGLE_LINE", "0");
        std::env::set_var("FORGE_TRACE", "1");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.store.default_namespace, "test-ns");
        assert_eq!(cfg.executor.recovery_scenario.as_deref(), Some("timeout"));
        assert!(!cfg.repl.single_line);
        assert!(cfg.logging.trace_enabled);
        std::env::remove_var("FORGE_RECOVERY_SCENARIO");
        std::env::remove_var("FORGE_SINGLE_LINE");
        std::env::remove_var("FORGE_TRACE");
        std::env::remove_var("FORGE_NAMESPACE");
    }
}
