//! Trajectory YAML loading (spec.md §6): `.spin/trajectories/<name>.yaml`,
//! a named plan of steps. DAG validation of `depends_on` is deferred to
//! the engine (activation time), per SPEC_FULL.md's component split —
//! this module only shapes the YAML into typed structs.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use spin_core::model::{Measure, MeasureDirection, Trajectory, TrajectoryStep};

use crate::error::ConfigError;
use crate::path_safety::resolve_resource_path;
use crate::yaml::{parse_list_of_mappings, parse_mapping};

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn required_str(map: &Map<String, Value>, key: &str, step_id: &str) -> Result<String, ConfigError> {
    str_field(map, key).ok_or_else(|| ConfigError::Invalid(format!("step {step_id} missing required field {key}")))
}

fn string_list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

fn step_measure(map: &Map<String, Value>, step_id: &str) -> Result<Option<Measure>, ConfigError> {
    let cmd = str_field(map, "measure_cmd");
    let target = map.get("measure_target").and_then(Value::as_f64);
    let direction = str_field(map, "measure_direction");
    match (cmd, target, direction) {
        (None, None, None) => Ok(None),
        (Some(cmd), Some(target), Some(direction)) => {
            let direction = match direction.as_str() {
                "up" => MeasureDirection::Up,
                "down" => MeasureDirection::Down,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "step {step_id}: measure_direction must be up/down, got {other}"
                    )))
                }
            };
            Ok(Some(Measure { cmd, target, direction }))
        }
        _ => Err(ConfigError::Invalid(format!(
            "step {step_id}: measure_cmd/measure_target/measure_direction must all be present together"
        ))),
    }
}

fn step_from_map(map: &Map<String, Value>) -> Result<TrajectoryStep, ConfigError> {
    let id = required_str(map, "id", "<unknown>")?;
    Ok(TrajectoryStep {
        title: required_str(map, "title", &id)?,
        description: required_str(map, "description", &id)?,
        scope: str_field(map, "scope").unwrap_or_else(|| "**".to_string()),
        categories: string_list_field(map, "categories"),
        acceptance_criteria: string_list_field(map, "acceptance_criteria"),
        verification_commands: string_list_field(map, "verification_commands"),
        depends_on: string_list_field(map, "depends_on"),
        max_retries: map.get("max_retries").and_then(Value::as_u64).unwrap_or(3) as u32,
        measure: step_measure(map, &id)?,
        id,
    })
}

/// Load `<dir>/<name>.yaml` into a `Trajectory`. Requires `name` and at
/// least one entry in `steps`.
pub fn load_trajectory(dir: &Path, name: &str) -> Result<Trajectory, ConfigError> {
    let path = resolve_resource_path(dir, name)?;
    let text = fs::read_to_string(&path)?;
    let top = parse_mapping(&text)?;
    let trajectory_name = top
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::Invalid("trajectory is missing required field name".to_string()))?;
    let description = top.get("description").and_then(Value::as_str).map(str::to_string);

    let step_maps = parse_list_of_mappings(&text, "steps")?;
    if step_maps.is_empty() {
        return Err(ConfigError::Invalid(format!("trajectory {name} has no steps")));
    }
    let steps = step_maps.iter().map(step_from_map).collect::<Result<Vec<_>, _>>()?;

    Ok(Trajectory { name: trajectory_name, description, steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_trajectory_with_two_steps() {
        let dir = tempfile::tempdir().unwrap();
        let text = "name: migrate-api\ndescription: step by step migration\nsteps:\n  \
                    - id: step1\n    title: First\n    description: do the first thing\n    \
                    scope: src/**\n    categories: [refactor]\n    acceptance_criteria: [tests pass]\n    \
                    verification_commands: [cargo test]\n    depends_on: []\n    max_retries: 2\n  \
                    - id: step2\n    title: Second\n    description: do the second thing\n    \
                    scope: src/**\n    categories: [refactor]\n    acceptance_criteria: [tests pass]\n    \
                    verification_commands: [cargo test]\n    depends_on: [step1]\n    max_retries: 3\n";
        fs::write(dir.path().join("migrate-api.yaml"), text).unwrap();

        let trajectory = load_trajectory(dir.path(), "migrate-api").unwrap();
        assert_eq!(trajectory.name, "migrate-api");
        assert_eq!(trajectory.steps.len(), 2);
        assert_eq!(trajectory.steps[1].depends_on, vec!["step1"]);
        assert_eq!(trajectory.steps[0].max_retries, 2);
    }

    #[test]
    fn rejects_trajectory_with_no_steps() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("empty.yaml"), "name: empty\n").unwrap();
        assert!(load_trajectory(dir.path(), "empty").is_err());
    }

    #[test]
    fn rejects_missing_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("noname.yaml"),
            "steps:\n  - id: a\n    title: A\n    description: d\n",
        )
        .unwrap();
        assert!(load_trajectory(dir.path(), "noname").is_err());
    }
}
