//! Trajectory engine (C9): DAG validation + activation of a named
//! multi-step plan, step lifecycle, stuck detection/heal, and the
//! overlay the spin scheduler applies on top of its own cycle inputs
//! while a trajectory is active. Pre-generation analysis lives
//! alongside this module in `crate::blueprint` (grouping/conflict/
//! enabler/mergeable detection over a proposal batch) and
//! `crate::quality_gate` (post-generation ambition-scaled checks).

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Command;

use spin_core::model::{StepState, StepStatus, Trajectory, TrajectoryState};
use spin_storage::state_file;

use crate::error::EngineError;

/// Iterative DFS cycle check over `depends_on` edges, capped at 10
/// reported cycles so a pathological trajectory file can't blow up the
/// error message.
const MAX_REPORTED_CYCLES: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DagError {
    pub cycles: Vec<Vec<String>>,
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trajectory has circular depends_on: {:?}", self.cycles)
    }
}

/// Reject activation when `depends_on` edges form a cycle. Walks every
/// step as a DFS root with an explicit stack (no recursion, so a
/// malicious/huge trajectory can't blow the call stack).
pub fn validate_dag(trajectory: &Trajectory) -> Result<(), DagError> {
    let ids: HashSet<&str> = trajectory.steps.iter().map(|s| s.id.as_str()).collect();
    let edges: HashMap<&str, &Vec<String>> = trajectory.steps.iter().map(|s| (s.id.as_str(), &s.depends_on)).collect();

    let mut cycles = Vec::new();
    for start in &trajectory.steps {
        if cycles.len() >= MAX_REPORTED_CYCLES {
            break;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start.id.as_str(), 0)];
        let mut path = vec![start.id.to_string()];
        let mut on_path: HashSet<&str> = HashSet::from([start.id.as_str()]);

        while let Some((node, next_idx)) = stack.last().copied() {
            let deps = edges.get(node).map(|v| v.as_slice()).unwrap_or(&[]);
            if next_idx >= deps.len() {
                stack.pop();
                path.pop();
                on_path.remove(node);
                continue;
            }
            stack.last_mut().unwrap().1 += 1;
            let dep = deps[next_idx].as_str();
            if !ids.contains(dep) {
                continue;
            }
            if on_path.contains(dep) {
                let mut cycle = path.clone();
                cycle.push(dep.to_string());
                cycles.push(cycle);
                if cycles.len() >= MAX_REPORTED_CYCLES {
                    break;
                }
                continue;
            }
            stack.push((dep, 0));
            path.push(dep.to_string());
            on_path.insert(dep);
        }
    }

    if cycles.is_empty() {
        Ok(())
    } else {
        Err(DagError { cycles })
    }
}

fn deps_satisfied(step_id: &str, trajectory: &Trajectory, states: &HashMap<String, StepState>) -> bool {
    let Some(step) = trajectory.steps.iter().find(|s| s.id == step_id) else {
        return false;
    };
    step.depends_on.iter().all(|dep| {
        states
            .get(dep)
            .map(|s| matches!(s.status(), StepStatus::Completed | StepStatus::Skipped))
            .unwrap_or(false)
    })
}

/// Build initial `TrajectoryState`: every step `pending`, then promote
/// the first step (in file order) whose deps are vacuously satisfied to
/// `active`.
pub fn activate(trajectory: &Trajectory, started_at_ms: i64) -> Result<TrajectoryState, DagError> {
    validate_dag(trajectory)?;

    let mut state = TrajectoryState::new(trajectory.name.clone(), started_at_ms);
    for step in &trajectory.steps {
        state.step_states.insert(step.id.clone(), StepState::pending());
    }
    if let Some(first) = trajectory.steps.iter().find(|s| deps_satisfied(&s.id, trajectory, &state.step_states)) {
        state.step_states.get_mut(&first.id).unwrap().status = Some(StepStatus::Active);
        state.current_step_id = Some(first.id.clone());
    }
    Ok(state)
}

/// Persist `state` to `<appdir>/trajectory-state.json` via atomic
/// tmp+rename, recovering a stray `.tmp` from an interrupted prior
/// write first.
pub fn save_state(appdir: &Path, state: &TrajectoryState) -> Result<(), EngineError> {
    let path = appdir.join("trajectory-state.json");
    state_file::recover_tmp(&path).map_err(|e| EngineError::Invalid(e.to_string()))?;
    state_file::write_atomic(&path, state).map_err(|e| EngineError::Invalid(e.to_string()))?;
    Ok(())
}

pub fn load_state(appdir: &Path) -> Result<Option<TrajectoryState>, EngineError> {
    let path = appdir.join("trajectory-state.json");
    state_file::recover_tmp(&path).map_err(|e| EngineError::Invalid(e.to_string()))?;
    state_file::read(&path).map_err(|e| EngineError::Invalid(e.to_string()))
}

fn last_numeric_token(stdout: &str) -> Option<f64> {
    stdout.split_whitespace().rev().find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-').parse::<f64>().ok())
}

/// Run a step's `measure` command and report whether it met its target
/// in the configured direction (§4.9 measurement gate).
pub fn measure_met(cwd: &Path, measure: &spin_core::model::Measure) -> bool {
    let Ok(output) = Command::new("sh").arg("-c").arg(&measure.cmd).current_dir(cwd).output() else {
        return false;
    };
    let Some(value) = last_numeric_token(&String::from_utf8_lossy(&output.stdout)) else {
        return false;
    };
    match measure.direction {
        spin_core::model::MeasureDirection::Up => value >= measure.target,
        spin_core::model::MeasureDirection::Down => value <= measure.target,
    }
}

/// Advance `step_id` to `Completed`, clearing `current_step_id` and
/// promoting the next eligible `pending` step (in file order) if any.
pub fn complete_step(trajectory: &Trajectory, state: &mut TrajectoryState, step_id: &str) {
    if let Some(s) = state.step_states.get_mut(step_id) {
        s.status = Some(StepStatus::Completed);
        s.completed_at_ms = Some(0);
    }
    if state.current_step_id.as_deref() == Some(step_id) {
        state.current_step_id = None;
    }
    promote_next(trajectory, state);
}

/// Record a failed attempt; past `max_retries` the step is marked
/// `failed` and `skip_step` must be called to keep the trajectory
/// moving (§4.9 step lifecycle: "halt or skipStep advances").
pub fn fail_step(trajectory: &Trajectory, state: &mut TrajectoryState, step_id: &str, reason: &str) {
    let max_retries = trajectory.steps.iter().find(|s| s.id == step_id).map(|s| s.max_retries).unwrap_or(0);
    if let Some(s) = state.step_states.get_mut(step_id) {
        s.cycles_attempted += 1;
        s.consecutive_failures += 1;
        s.total_failures += 1;
        s.failure_reason = Some(reason.to_string());
        if s.cycles_attempted >= max_retries {
            s.status = Some(StepStatus::Failed);
        }
    }
}

/// `skipStep`: force a step to `Skipped` regardless of its current
/// state and promote the next eligible step.
pub fn skip_step(trajectory: &Trajectory, state: &mut TrajectoryState, step_id: &str) {
    if let Some(s) = state.step_states.get_mut(step_id) {
        s.status = Some(StepStatus::Skipped);
    }
    if state.current_step_id.as_deref() == Some(step_id) {
        state.current_step_id = None;
    }
    promote_next(trajectory, state);
}

fn promote_next(trajectory: &Trajectory, state: &mut TrajectoryState) {
    if state.current_step_id.is_some() {
        return;
    }
    let next = trajectory.steps.iter().find(|s| {
        state.step_states.get(&s.id).map(|st| st.status()) == Some(StepStatus::Pending) && deps_satisfied(&s.id, trajectory, &state.step_states)
    });
    if let Some(step) = next {
        state.step_states.get_mut(&step.id).unwrap().status = Some(StepStatus::Active);
        state.current_step_id = Some(step.id.clone());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealAction {
    Diagnose,
    Skip,
    Retry,
    ForceComplete,
}

/// The heal API (§4.9 stuck detection): `retry` resets the step's
/// attempt counters to 0 and re-activates it; `skip`/`force_complete`
/// terminate it; `diagnose` is a read-only no-op returning the current
/// failure reason.
pub fn heal(trajectory: &Trajectory, state: &mut TrajectoryState, step_id: &str, action: HealAction) -> Option<String> {
    match action {
        HealAction::Diagnose => state.step_states.get(step_id).and_then(|s| s.failure_reason.clone()),
        HealAction::Skip => {
            skip_step(trajectory, state, step_id);
            None
        }
        HealAction::ForceComplete => {
            complete_step(trajectory, state, step_id);
            None
        }
        HealAction::Retry => {
            if let Some(s) = state.step_states.get_mut(step_id) {
                s.cycles_attempted = 0;
                s.consecutive_failures = 0;
                s.status = Some(StepStatus::Active);
            }
            state.current_step_id = Some(step_id.to_string());
            None
        }
    }
}

/// A step is eligible for the heal API once it has exhausted its
/// retry budget (§4.9: `cyclesAttempted >= max_retries` or
/// `totalFailures >= 2*max_retries`).
pub fn is_stuck(trajectory: &Trajectory, state: &TrajectoryState, step_id: &str) -> bool {
    let Some(step) = trajectory.steps.iter().find(|s| s.id == step_id) else { return false };
    state.step_states.get(step_id).map(|s| s.is_stuck(step.max_retries)).unwrap_or(false)
}

/// The scheduler-facing overlay (§4.8 step 12): when a trajectory is
/// active and not paused, its current step's scope/categories/
/// verification commands replace the cycle's own, and free-proposal
/// acceptance is bypassed in favor of materializing a ticket for the
/// step directly.
pub struct StepOverlay<'a> {
    pub step_id: &'a str,
    pub scope: &'a str,
    pub categories: &'a [String],
    pub verification_commands: &'a [String],
    pub acceptance_criteria: &'a [String],
}

pub fn current_overlay<'a>(trajectory: &'a Trajectory, state: &'a TrajectoryState) -> Option<StepOverlay<'a>> {
    if state.paused {
        return None;
    }
    let step_id = state.current_step_id.as_deref()?;
    let step = trajectory.steps.iter().find(|s| s.id == step_id)?;
    Some(StepOverlay {
        step_id: &step.id,
        scope: &step.scope,
        categories: &step.categories,
        verification_commands: &step.verification_commands,
        acceptance_criteria: &step.acceptance_criteria,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin_core::model::TrajectoryStep;

    fn step(id: &str, depends_on: &[&str]) -> TrajectoryStep {
        TrajectoryStep {
            id: id.to_string(),
            title: id.to_string(),
            description: "d".to_string(),
            scope: "**".to_string(),
            categories: vec!["refactor".to_string()],
            acceptance_criteria: vec!["passes".to_string()],
            verification_commands: vec!["cargo test".to_string()],
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            max_retries: 2,
            measure: None,
        }
    }

    fn sample_trajectory() -> Trajectory {
        Trajectory {
            name: "demo".to_string(),
            description: None,
            steps: vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])],
        }
    }

    #[test]
    fn validate_dag_accepts_acyclic_chain() {
        assert!(validate_dag(&sample_trajectory()).is_ok());
    }

    #[test]
    fn validate_dag_rejects_a_cycle() {
        let trajectory = Trajectory {
            name: "cyclic".to_string(),
            description: None,
            steps: vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])],
        };
        assert!(validate_dag(&trajectory).is_err());
    }

    #[test]
    fn activate_picks_first_step_with_vacuous_deps() {
        let trajectory = sample_trajectory();
        let state = activate(&trajectory, 0).unwrap();
        assert_eq!(state.current_step_id.as_deref(), Some("a"));
        assert_eq!(state.step_states["a"].status(), StepStatus::Active);
        assert_eq!(state.step_states["b"].status(), StepStatus::Pending);
    }

    #[test]
    fn completing_a_step_promotes_the_next_eligible_one() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        complete_step(&trajectory, &mut state, "a");
        assert_eq!(state.current_step_id.as_deref(), Some("b"));
        assert_eq!(state.step_states["a"].status(), StepStatus::Completed);
    }

    #[test]
    fn skip_step_advances_past_a_blocked_step() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        skip_step(&trajectory, &mut state, "a");
        assert_eq!(state.step_states["a"].status(), StepStatus::Skipped);
        assert_eq!(state.current_step_id.as_deref(), Some("b"));
    }

    #[test]
    fn fail_step_marks_failed_once_max_retries_exhausted() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        fail_step(&trajectory, &mut state, "a", "boom");
        assert_eq!(state.step_states["a"].status(), StepStatus::Active);
        fail_step(&trajectory, &mut state, "a", "boom again");
        assert_eq!(state.step_states["a"].status(), StepStatus::Failed);
    }

    #[test]
    fn is_stuck_once_cycles_attempted_reaches_max_retries() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        fail_step(&trajectory, &mut state, "a", "x");
        fail_step(&trajectory, &mut state, "a", "x");
        assert!(is_stuck(&trajectory, &state, "a"));
    }

    #[test]
    fn heal_retry_resets_counters_and_reactivates() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        fail_step(&trajectory, &mut state, "a", "x");
        fail_step(&trajectory, &mut state, "a", "x");
        heal(&trajectory, &mut state, "a", HealAction::Retry);
        assert_eq!(state.step_states["a"].cycles_attempted, 0);
        assert_eq!(state.step_states["a"].status(), StepStatus::Active);
        assert_eq!(state.current_step_id.as_deref(), Some("a"));
    }

    #[test]
    fn overlay_is_none_when_paused() {
        let trajectory = sample_trajectory();
        let mut state = activate(&trajectory, 0).unwrap();
        state.paused = true;
        assert!(current_overlay(&trajectory, &state).is_none());
    }

    #[test]
    fn overlay_reflects_current_step() {
        let trajectory = sample_trajectory();
        let state = activate(&trajectory, 0).unwrap();
        let overlay = current_overlay(&trajectory, &state).unwrap();
        assert_eq!(overlay.step_id, "a");
        assert_eq!(overlay.categories, &["refactor".to_string()]);
    }
}
