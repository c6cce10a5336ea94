//! `SoloConfig`: per-repo session configuration loaded from
//! `.spin/config.json`. Field-level defaults mirror the knobs the spin
//! scheduler (C8) and QA orchestrator (C6) read throughout §4.6–§4.8.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_scope() -> String {
    "**".to_string()
}

fn default_pull_every_n_cycles() -> u32 {
    5
}

fn default_pull_policy() -> PullPolicy {
    PullPolicy::Warn
}

fn default_guidelines_refresh_cycles() -> u32 {
    10
}

fn default_docs_audit_interval() -> u32 {
    20
}

fn default_max_formulas() -> u32 {
    1
}

fn default_scout_concurrency() -> u32 {
    1
}

fn default_plugin_parallel() -> u32 {
    1
}

fn default_max_idle_cycles() -> u32 {
    5
}

fn default_max_artifact_age_days() -> u32 {
    14
}

fn default_max_completed_tickets() -> u32 {
    500
}

fn default_max_stale_branch_days() -> u32 {
    7
}

fn default_max_attempts() -> u32 {
    1
}

fn default_max_log_bytes() -> u64 {
    1_000_000
}

fn default_tail_bytes() -> u64 {
    4_096
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    Halt,
    #[default]
    Warn,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QaConfig {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub retry_enabled: bool,
    #[serde(default = "default_max_log_bytes")]
    pub max_log_bytes: u64,
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            max_attempts: default_max_attempts(),
            retry_enabled: false,
            max_log_bytes: default_max_log_bytes(),
            tail_bytes: default_tail_bytes(),
        }
    }
}

/// Per-repo session configuration. Every field has a default so a
/// missing or partial `config.json` still loads — unknown keys are
/// ignored by `serde_json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SoloConfig {
    pub scope: String,
    pub active_formula: Option<String>,
    pub allowed_remote: Option<String>,
    pub allow_categories: Vec<String>,
    pub block_categories: Vec<String>,
    pub include_tests: bool,
    pub parallel_formulas: bool,
    pub max_formulas: u32,
    pub scout_concurrency: u32,
    pub plugin_parallel: u32,
    pub pull_every_n_cycles: u32,
    pub pull_policy: PullPolicy,
    pub guidelines_refresh_cycles: u32,
    pub docs_audit_interval: u32,
    pub max_idle_cycles: u32,
    pub max_artifact_age_days: u32,
    pub max_completed_tickets: u32,
    pub max_stale_branch_days: u32,
    pub session_expected_wall_ms: Option<i64>,
    pub qa: QaConfig,
}

impl Default for SoloConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            active_formula: None,
            allowed_remote: None,
            allow_categories: Vec::new(),
            block_categories: Vec::new(),
            include_tests: false,
            parallel_formulas: false,
            max_formulas: default_max_formulas(),
            scout_concurrency: default_scout_concurrency(),
            plugin_parallel: default_plugin_parallel(),
            pull_every_n_cycles: default_pull_every_n_cycles(),
            pull_policy: default_pull_policy(),
            guidelines_refresh_cycles: default_guidelines_refresh_cycles(),
            docs_audit_interval: default_docs_audit_interval(),
            max_idle_cycles: default_max_idle_cycles(),
            max_artifact_age_days: default_max_artifact_age_days(),
            max_completed_tickets: default_max_completed_tickets(),
            max_stale_branch_days: default_max_stale_branch_days(),
            session_expected_wall_ms: None,
            qa: QaConfig::default(),
        }
    }
}

impl SoloConfig {
    /// Load `<appdir>/config.json`, falling back to all-default values
    /// when the file does not exist yet (fresh repo, first `spin init`).
    pub fn load(appdir: &Path) -> Result<Self, ConfigError> {
        let path = appdir.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, appdir: &Path) -> Result<(), ConfigError> {
        let path = appdir.join("config.json");
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = SoloConfig::load(dir.path()).unwrap();
        assert_eq!(config.scope, "**");
        assert_eq!(config.pull_every_n_cycles, 5);
        assert_eq!(config.pull_policy, PullPolicy::Warn);
    }

    #[test]
    fn loads_partial_config_with_defaults_for_rest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), r#"{"scope": "crates/**", "max_formulas": 3}"#).unwrap();
        let config = SoloConfig::load(dir.path()).unwrap();
        assert_eq!(config.scope, "crates/**");
        assert_eq!(config.max_formulas, 3);
        assert_eq!(config.scout_concurrency, 1);
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SoloConfig::default();
        config.active_formula = Some("deep".to_string());
        config.save(dir.path()).unwrap();

        let loaded = SoloConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.active_formula.as_deref(), Some("deep"));
    }
}
