//! Goal YAML loading (spec.md §6): a formula file with a required
//! measure block (`measure_cmd`, `measure_target`, `measure_direction`).

use std::fs;
use std::path::Path;

use spin_core::model::Goal;

use crate::error::ConfigError;
use crate::formula::formula_from_map;
use crate::path_safety::resolve_resource_path;
use crate::yaml::parse_mapping;

/// Load `<dir>/<name>.yaml` into a `Goal`, erroring if the file has no
/// measure block.
pub fn load_goal(dir: &Path, name: &str) -> Result<Goal, ConfigError> {
    let path = resolve_resource_path(dir, name)?;
    let text = fs::read_to_string(&path)?;
    let map = parse_mapping(&text)?;
    let formula = formula_from_map(name, &map)?;
    Goal::try_from_formula(formula)
        .ok_or_else(|| ConfigError::Invalid(format!("goal {name} is missing measure_cmd/measure_target/measure_direction")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_goal_with_measure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("reduce-latency.yaml"),
            "scope: src/**\nmeasure_cmd: scripts/bench.sh\nmeasure_target: 100\nmeasure_direction: down\n",
        )
        .unwrap();

        let goal = load_goal(dir.path(), "reduce-latency").unwrap();
        assert_eq!(goal.formula().name, "reduce-latency");
        let measure = goal.formula().measure.as_ref().unwrap();
        assert_eq!(measure.cmd, "scripts/bench.sh");
        assert_eq!(measure.target, 100.0);
    }

    #[test]
    fn rejects_formula_without_measure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("no-measure.yaml"), "scope: src/**\n").unwrap();
        assert!(load_goal(dir.path(), "no-measure").is_err());
    }
}
