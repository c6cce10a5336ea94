//! Quality gate (C9, spec.md §4.9): ambition-scaled checks run against a
//! freshly generated `Trajectory`, before it is accepted, against the
//! `Blueprint` that produced it. Any failure yields a
//! `<trajectory-critique>` block meant for a single regeneration retry.

use std::collections::HashSet;

use spin_core::model::Trajectory;

use crate::blueprint::Blueprint;

const MAX_CATEGORIES_PER_STEP: usize = 3;
const RETRY_SLACK: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ambition {
    Conservative,
    Moderate,
    Ambitious,
}

impl Ambition {
    /// `(min, max)` step count, before any retry slack (§4.9).
    fn step_range(self) -> (usize, usize) {
        match self {
            Ambition::Conservative => (2, 3),
            Ambition::Moderate => (3, 5),
            Ambition::Ambitious => (5, 8),
        }
    }

    fn scope_is_bounded(self) -> bool {
        matches!(self, Ambition::Conservative | Ambition::Moderate)
    }
}

fn common_parent_dir(files: &[String]) -> String {
    let Some(first) = files.first() else { return String::new() };
    let mut common: Vec<&str> = first.split('/').collect();
    common.pop();
    for file in &files[1..] {
        let parts: Vec<&str> = file.split('/').collect();
        let mut i = 0;
        while i < common.len() && i + 1 < parts.len() && common[i] == parts[i] {
            i += 1;
        }
        common.truncate(i);
    }
    common.join("/")
}

fn scope_glob_prefix(scope: &str) -> &str {
    let cut = scope.find('*').unwrap_or(scope.len());
    scope[..cut].trim_end_matches('/')
}

fn proposal_files<'a>(blueprint: &Blueprint, files_by_proposal: &'a [Vec<String>]) -> Vec<&'a String> {
    blueprint
        .groups
        .iter()
        .flat_map(|g| g.proposal_indices.iter())
        .flat_map(|&i| files_by_proposal[i].iter())
        .collect()
}

/// One failed rule from the checklist, rendered into the
/// `<trajectory-critique>` block verbatim.
pub struct GateFailure {
    pub rule: &'static str,
    pub detail: String,
}

#[derive(Default)]
pub struct GateReport {
    pub failures: Vec<GateFailure>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Render failures as the `<trajectory-critique>` block fed back
    /// into a single regeneration retry.
    pub fn critique(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        let mut out = String::from("<trajectory-critique>\n");
        for failure in &self.failures {
            out.push_str(&format!("- [{}] {}\n", failure.rule, failure.detail));
        }
        out.push_str("</trajectory-critique>");
        Some(out)
    }
}

/// Run every §4.9 quality-gate rule. `files_by_proposal[i]` is the file
/// list of the proposal at blueprint index `i`; `lenient` widens the
/// step-count range by `RETRY_SLACK` for the one allowed regeneration
/// retry.
pub fn run_quality_gate(trajectory: &Trajectory, blueprint: &Blueprint, ambition: Ambition, files_by_proposal: &[Vec<String>], lenient: bool) -> GateReport {
    let mut report = GateReport::default();

    // (5) step count within range.
    let (min, max) = ambition.step_range();
    let max = if lenient { max + RETRY_SLACK } else { max };
    let count = trajectory.steps.len();
    if count < min || count > max {
        report.failures.push(GateFailure {
            rule: "step-count",
            detail: format!("{count} steps outside the {ambition:?} range [{min}, {max}]"),
        });
    }

    // (1) step-1 scope no broader than proposals' common parent.
    if ambition.scope_is_bounded() {
        if let Some(step1) = trajectory.steps.first() {
            let files: Vec<String> = proposal_files(blueprint, files_by_proposal).into_iter().cloned().collect();
            let common = common_parent_dir(&files);
            let prefix = scope_glob_prefix(&step1.scope);
            if !common.is_empty() && !prefix.starts_with(&common) {
                report.failures.push(GateFailure {
                    rule: "step1-scope",
                    detail: format!("step 1 scope `{}` is broader than the proposals' common parent `{common}`", step1.scope),
                });
            }
        }
    }

    // (2) enabler categories appear in earlier steps.
    let enabler_positions: Vec<usize> = blueprint.groups.iter().enumerate().filter(|(_, g)| g.is_enabler).map(|(i, _)| i).collect();
    if let Some(&last_enabler) = enabler_positions.iter().max() {
        let enabler_categories: HashSet<&str> = blueprint.groups[..=last_enabler]
            .iter()
            .filter(|g| g.is_enabler)
            .flat_map(|g| g.categories.iter().map(String::as_str))
            .collect();
        for (idx, step) in trajectory.steps.iter().enumerate().skip(last_enabler + 1) {
            for category in &step.categories {
                if !enabler_categories.contains(category.as_str()) {
                    continue;
                }
                let appeared_before = trajectory.steps[..idx].iter().any(|s| s.categories.iter().any(|c| c == category));
                if !appeared_before {
                    report.failures.push(GateFailure {
                        rule: "enabler-ordering",
                        detail: format!("step {} uses enabler category `{category}` with no earlier step producing it", step.id),
                    });
                }
            }
        }
    }

    // (3) each step <= 3 categories.
    for step in &trajectory.steps {
        if step.categories.len() > MAX_CATEGORIES_PER_STEP {
            report.failures.push(GateFailure {
                rule: "step-categories",
                detail: format!("step {} declares {} categories, max {MAX_CATEGORIES_PER_STEP}", step.id, step.categories.len()),
            });
        }
    }

    // (4) every step has >= 1 verification command.
    for step in &trajectory.steps {
        if step.verification_commands.is_empty() {
            report.failures.push(GateFailure {
                rule: "step-verification",
                detail: format!("step {} has no verification commands", step.id),
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::ProposalGroup;
    use spin_core::model::TrajectoryStep;

    fn step(id: &str, categories: &[&str], verification: &[&str]) -> TrajectoryStep {
        TrajectoryStep {
            id: id.to_string(),
            title: id.to_string(),
            description: "d".to_string(),
            scope: "src/core/**".to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            acceptance_criteria: vec!["passes".to_string()],
            verification_commands: verification.iter().map(|v| v.to_string()).collect(),
            depends_on: Vec::new(),
            max_retries: 2,
            measure: None,
        }
    }

    fn blueprint_with_groups(groups: Vec<ProposalGroup>) -> Blueprint {
        Blueprint { groups, conflicts: Vec::new(), mergeable_pairs: Vec::new() }
    }

    #[test]
    fn passes_when_every_rule_is_satisfied() {
        let trajectory = Trajectory {
            name: "t".to_string(),
            description: None,
            steps: vec![step("a", &["bug"], &["cargo test"]), step("b", &["docs"], &["cargo test"])],
        };
        let blueprint = blueprint_with_groups(vec![ProposalGroup { proposal_indices: vec![0], categories: vec!["bug".to_string()], is_enabler: false }]);
        let files = vec![vec!["src/core/a.rs".to_string()]];
        let report = run_quality_gate(&trajectory, &blueprint, Ambition::Conservative, &files, false);
        assert!(report.passed());
    }

    #[test]
    fn fails_when_step_count_outside_ambition_range() {
        let trajectory = Trajectory { name: "t".to_string(), description: None, steps: vec![step("a", &["bug"], &["cargo test"])] };
        let blueprint = blueprint_with_groups(Vec::new());
        let report = run_quality_gate(&trajectory, &blueprint, Ambition::Moderate, &[], false);
        assert!(!report.passed());
        assert!(report.critique().unwrap().contains("step-count"));
    }

    #[test]
    fn lenient_retry_widens_the_max_by_slack() {
        let steps: Vec<_> = (0..5).map(|i| step(&format!("s{i}"), &["bug"], &["cargo test"])).collect();
        let trajectory = Trajectory { name: "t".to_string(), description: None, steps };
        let blueprint = blueprint_with_groups(Vec::new());
        assert!(!run_quality_gate(&trajectory, &blueprint, Ambition::Conservative, &[], false).passed());
        assert!(run_quality_gate(&trajectory, &blueprint, Ambition::Conservative, &[], true).passed());
    }

    #[test]
    fn fails_when_a_step_has_no_verification_command() {
        let trajectory = Trajectory { name: "t".to_string(), description: None, steps: vec![step("a", &["bug"], &[]), step("b", &["docs"], &["cargo test"])] };
        let blueprint = blueprint_with_groups(Vec::new());
        let report = run_quality_gate(&trajectory, &blueprint, Ambition::Conservative, &[], false);
        assert!(report.failures.iter().any(|f| f.rule == "step-verification"));
    }

    #[test]
    fn fails_when_step_exceeds_max_categories() {
        let trajectory = Trajectory {
            name: "t".to_string(),
            description: None,
            steps: vec![step("a", &["bug", "docs", "refactor", "perf"], &["cargo test"]), step("b", &["docs"], &["cargo test"])],
        };
        let blueprint = blueprint_with_groups(Vec::new());
        let report = run_quality_gate(&trajectory, &blueprint, Ambition::Conservative, &[], false);
        assert!(report.failures.iter().any(|f| f.rule == "step-categories"));
    }
}
