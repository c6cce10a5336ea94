use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::formula::Measure;

/// One step of a named multi-step plan. Loaded from
/// `.spin/trajectories/<name>.yaml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrajectoryStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub scope: String,
    pub categories: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub verification_commands: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub max_retries: u32,
    #[serde(default)]
    pub measure: Option<Measure>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trajectory {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<TrajectoryStep>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StepState {
    pub status: Option<StepStatus>,
    pub cycles_attempted: u32,
    pub consecutive_failures: u32,
    pub total_failures: u32,
    pub failure_reason: Option<String>,
    pub last_verification_output: Option<String>,
    pub completed_at_ms: Option<i64>,
}

impl StepState {
    pub fn pending() -> Self {
        Self {
            status: Some(StepStatus::Pending),
            ..Default::default()
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status.unwrap_or(StepStatus::Pending)
    }

    /// A step is "stuck" when it has exhausted its retry budget without
    /// completing (§4.9 stuck detection).
    pub fn is_stuck(&self, max_retries: u32) -> bool {
        self.cycles_attempted >= max_retries || self.total_failures >= 2 * max_retries
    }
}

/// Persisted JSON (`.spin/trajectory-state.json`), written atomically via
/// tmp-then-rename. Invariant: at most one step is `Active` at a time,
/// and `current_step_id` always matches it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrajectoryState {
    pub trajectory_name: String,
    pub started_at_ms: i64,
    pub step_states: HashMap<String, StepState>,
    pub current_step_id: Option<String>,
    pub paused: bool,
}

impl TrajectoryState {
    pub fn new(trajectory_name: impl Into<String>, started_at_ms: i64) -> Self {
        Self {
            trajectory_name: trajectory_name.into(),
            started_at_ms,
            step_states: HashMap::new(),
            current_step_id: None,
            paused: false,
        }
    }
}
