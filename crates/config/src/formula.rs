//! Formula YAML loading (spec.md §6): flat key/value file under
//! `.spin/formulas/<name>.yaml`. Unknown keys are ignored.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};
use spin_core::model::{Formula, MeasureDirection, RiskTolerance};

use crate::error::ConfigError;
use crate::path_safety::resolve_resource_path;
use crate::yaml::parse_mapping;

fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn int_field(map: &Map<String, Value>, key: &str, default: i64) -> i64 {
    map.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn bool_field(map: &Map<String, Value>, key: &str, default: bool) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn string_list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Some(Value::String(s)) => s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        _ => Vec::new(),
    }
}

fn risk_tolerance_field(map: &Map<String, Value>) -> Result<RiskTolerance, ConfigError> {
    match map.get("risk_tolerance").and_then(Value::as_str) {
        None => Ok(RiskTolerance::default()),
        Some("low") => Ok(RiskTolerance::Low),
        Some("medium") => Ok(RiskTolerance::Medium),
        Some("high") => Ok(RiskTolerance::High),
        Some(other) => Err(ConfigError::Invalid(format!("risk_tolerance must be low/medium/high, got {other}"))),
    }
}

/// Build a `Formula` from an already-parsed YAML mapping. Shared by
/// `load_formula` and `load_goal` (a goal is a formula plus a measure
/// block).
pub fn formula_from_map(name: &str, map: &Map<String, Value>) -> Result<Formula, ConfigError> {
    Ok(Formula {
        name: name.to_string(),
        version: str_field(map, "version"),
        description: str_field(map, "description"),
        scope: str_field(map, "scope").unwrap_or_else(|| "**".to_string()),
        categories: string_list_field(map, "categories"),
        min_confidence: int_field(map, "min_confidence", 0),
        max_prs: map.get("max_prs").and_then(Value::as_u64).map(|n| n as u32),
        max_time: str_field(map, "max_time"),
        custom_prompt: str_field(map, "prompt"),
        focus_areas: string_list_field(map, "focus_areas"),
        exclude: string_list_field(map, "exclude"),
        use_roadmap: bool_field(map, "use_roadmap", false),
        model: str_field(map, "model"),
        risk_tolerance: risk_tolerance_field(map)?,
        tags: string_list_field(map, "tags"),
        measure: measure_from_map(map)?,
    })
}

fn measure_from_map(map: &Map<String, Value>) -> Result<Option<spin_core::model::Measure>, ConfigError> {
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
                        "measure_direction must be up/down, got {other}"
                    )))
                }
            };
            Ok(Some(spin_core::model::Measure { cmd, target, direction }))
        }
        _ => Err(ConfigError::Invalid(
            "measure_cmd, measure_target and measure_direction must all be present together".to_string(),
        )),
    }
}

/// Load `<dir>/<name>.yaml` into a `Formula`, rejecting unsafe names
/// before the file is ever opened.
pub fn load_formula(dir: &Path, name: &str) -> Result<Formula, ConfigError> {
    let path = resolve_resource_path(dir, name)?;
    let text = fs::read_to_string(&path)?;
    let map = parse_mapping(&text)?;
    formula_from_map(name, &map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_a_minimal_formula() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf-focus.yaml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "scope: src/**\ncategories: [perf, bug]\nmin_confidence: 70\nrisk_tolerance: low\n").unwrap();

        let formula = load_formula(dir.path(), "perf-focus").unwrap();
        assert_eq!(formula.name, "perf-focus");
        assert_eq!(formula.scope, "src/**");
        assert_eq!(formula.categories, vec!["perf", "bug"]);
        assert_eq!(formula.min_confidence, 70);
        assert_eq!(formula.risk_tolerance, RiskTolerance::Low);
        assert!(formula.measure.is_none());
    }

    #[test]
    fn loads_prompt_and_focus_areas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.yaml");
        fs::write(
            &path,
            "prompt: |\n  improve docs\n  in this area\nfocus_areas: [readme, guides]\nuse_roadmap: true\n",
        )
        .unwrap();

        let formula = load_formula(dir.path(), "docs").unwrap();
        assert_eq!(formula.custom_prompt.as_deref(), Some("improve docs\nin this area"));
        assert_eq!(formula.focus_areas, vec!["readme", "guides"]);
        assert!(formula.use_roadmap);
    }

    #[test]
    fn rejects_unsafe_names_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_formula(dir.path(), "../escape").is_err());
    }

    #[test]
    fn rejects_bad_risk_tolerance() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.yaml"), "risk_tolerance: extreme\n").unwrap();
        assert!(load_formula(dir.path(), "x").is_err());
    }
}
