//! Proposal pipeline (C2): validate, normalize, scope-gate,
//! category-gate, dedup, rank, balance, materialize. The 11-stage order
//! below is load-bearing — later stages assume earlier ones already
//! ran (e.g. rank only sees proposals that passed schema/confidence/
//! impact/category/scope/dedup).

use spin_core::model::{Proposal, RunState, Ticket, TicketStatus};
use spin_core::scope::Scope;
use spin_core::similarity::{file_sets_fully_overlap, title_similarity};

const DEDUP_TITLE_THRESHOLD: f64 = 0.7;
const MIN_FILES_FOR_FULL_OVERLAP: usize = 3;
const GRAPH_BOOST_PER_DEPENDENT: f64 = 0.05;

#[derive(Clone, Debug, PartialEq)]
pub enum RejectReason {
    SchemaInvalid,
    ConfidenceFloor,
    ImpactFloor,
    CategoryNotTrusted,
    Deferred,
    DuplicateOfExisting,
    DuplicateInBatch,
    EvictedByRank,
    EvictedByBalance,
}

pub struct PipelineConfig<'a> {
    pub scope: &'a Scope,
    pub allow_categories: &'a [String],
    pub min_impact_score: f64,
    pub max_proposals_per_scout: usize,
    pub test_category_max_ratio: f64,
}

pub struct PipelineOutcome {
    pub accepted: Vec<Proposal>,
    pub rejected: Vec<(Proposal, RejectReason)>,
}

fn dependent_boost(proposal: &Proposal, dependents_of: Option<&dyn Fn(&str) -> Vec<String>>) -> f64 {
    let Some(lookup) = dependents_of else { return 0.0 };
    let dependents: usize = proposal.files.iter().map(|f| lookup(f).len()).sum();
    dependents as f64 * GRAPH_BOOST_PER_DEPENDENT
}

fn is_test_category(category: &str) -> bool {
    category.eq_ignore_ascii_case("test")
}

/// Candidate tickets for stage 7 (dedup against existing): caller
/// narrows to `ready`/`in_progress`, or `done` updated within 24h.
pub fn dedup_candidate_tickets(tickets: &[Ticket], now_ms: i64) -> Vec<&Ticket> {
    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    tickets
        .iter()
        .filter(|t| match t.status {
            TicketStatus::Ready | TicketStatus::InProgress => true,
            TicketStatus::Done => now_ms - t.updated_at_ms <= DAY_MS,
            _ => false,
        })
        .collect()
}

/// Run the full C2 pipeline. `run_state.deferred_proposals` both feeds
/// stage 1 (re-promotion) and receives stage 6's new deferrals.
pub fn run_pipeline(
    mut incoming: Vec<Proposal>,
    run_state: &mut RunState,
    existing_tickets: &[&Ticket],
    cfg: &PipelineConfig,
    dependents_of: Option<&dyn Fn(&str) -> Vec<String>>,
) -> PipelineOutcome {
    // Stage 1: re-promote deferred proposals now inside scope. Per
    // DESIGN.md's resolution of open question (b): only when the
    // current scope strictly contains the proposal's original scope.
    let mut still_deferred = Vec::new();
    for proposal in std::mem::take(&mut run_state.deferred_proposals) {
        let all_in_scope = proposal.files.iter().all(|f| cfg.scope.contains(f));
        if all_in_scope {
            incoming.push(proposal);
        } else {
            still_deferred.push(proposal);
        }
    }
    run_state.deferred_proposals = still_deferred;

    let mut rejected = Vec::new();
    let mut surviving = Vec::new();

    for proposal in incoming {
        // Stage 2: schema validation.
        if !proposal.passes_schema_validation() {
            rejected.push((proposal, RejectReason::SchemaInvalid));
            continue;
        }
        // Stage 3: confidence floor.
        if proposal.confidence <= 0 {
            rejected.push((proposal, RejectReason::ConfidenceFloor));
            continue;
        }
        // Stage 4: impact floor.
        if proposal.impact_score.unwrap_or(0.0) < cfg.min_impact_score {
            rejected.push((proposal, RejectReason::ImpactFloor));
            continue;
        }
        // Stage 5: category trust.
        if !cfg.allow_categories.iter().any(|c| c == &proposal.category) {
            rejected.push((proposal, RejectReason::CategoryNotTrusted));
            continue;
        }
        // Stage 6: scope.
        if !cfg.scope.is_universal() && !proposal.files.iter().all(|f| cfg.scope.contains(f)) {
            run_state.push_deferred(proposal.clone());
            rejected.push((proposal, RejectReason::Deferred));
            continue;
        }
        surviving.push(proposal);
    }

    // Stage 7: dedup against existing tickets.
    let mut after_existing_dedup = Vec::new();
    for proposal in surviving {
        let is_dup = existing_tickets
            .iter()
            .any(|t| title_similarity(&proposal.title, &t.title) >= DEDUP_TITLE_THRESHOLD);
        if is_dup {
            rejected.push((proposal, RejectReason::DuplicateOfExisting));
        } else {
            after_existing_dedup.push(proposal);
        }
    }

    // Stage 8: intra-batch dedup (title similarity + full file-set overlap).
    let mut kept: Vec<Proposal> = Vec::new();
    for proposal in after_existing_dedup {
        let duplicate = kept.iter().any(|k| {
            title_similarity(&proposal.title, &k.title) >= DEDUP_TITLE_THRESHOLD
                || file_sets_fully_overlap(&proposal.files, &k.files, MIN_FILES_FOR_FULL_OVERLAP)
        });
        if duplicate {
            rejected.push((proposal, RejectReason::DuplicateInBatch));
        } else {
            kept.push(proposal);
        }
    }

    // Stage 9: rank and cap.
    let mut scored: Vec<(f64, Proposal)> = kept
        .into_iter()
        .map(|p| {
            let score = p.rank_score() + dependent_boost(&p, dependents_of);
            (score, p)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let (top, overflow) = if scored.len() > cfg.max_proposals_per_scout {
        scored.split_at(cfg.max_proposals_per_scout)
    } else {
        (&scored[..], &[][..])
    };
    for (_, p) in overflow {
        rejected.push((p.clone(), RejectReason::EvictedByRank));
    }
    let mut ranked: Vec<Proposal> = top.iter().map(|(_, p)| p.clone()).collect();

    // Stage 10: balance test-category proposals to <= max_ratio.
    let cap = ((ranked.len() as f64) * cfg.test_category_max_ratio).floor() as usize;
    let test_count = ranked.iter().filter(|p| is_test_category(&p.category)).count();
    if test_count > cap {
        let mut evict = test_count - cap;
        // Evict lowest-scored test proposals first: ranked is already
        // sorted best-first, so evict from the tail backwards.
        let mut i = ranked.len();
        while evict > 0 && i > 0 {
            i -= 1;
            if is_test_category(&ranked[i].category) {
                let p = ranked.remove(i);
                rejected.push((p, RejectReason::EvictedByBalance));
                evict -= 1;
            }
        }
    }

    PipelineOutcome { accepted: ranked, rejected }
}

/// Stage 11 priority formula: `round(impact*10 + confidence)`.
pub fn ticket_priority(proposal: &Proposal) -> i64 {
    let impact = proposal.impact_score.unwrap_or(0.0);
    (impact * 10.0 + proposal.confidence as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proposal(title: &str, confidence: i64, category: &str, files: &[&str]) -> Proposal {
        Proposal {
            category: category.to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            allowed_paths: files.iter().map(|f| f.to_string()).collect(),
            confidence,
            impact_score: Some(5.0),
            verification_commands: vec!["cargo test".to_string()],
            acceptance_criteria: vec!["passes".to_string()],
            rationale: "because".to_string(),
            estimated_complexity: "low".to_string(),
            target_symbols: None,
        }
    }

    fn cfg<'a>(scope: &'a Scope, allow: &'a [String]) -> PipelineConfig<'a> {
        PipelineConfig {
            scope,
            allow_categories: allow,
            min_impact_score: 0.0,
            max_proposals_per_scout: 10,
            test_category_max_ratio: 0.4,
        }
    }

    #[test]
    fn rejects_schema_invalid_and_low_confidence() {
        let scope = Scope::new("**");
        let allow = vec!["bug".to_string()];
        let mut bad = sample_proposal("Fix bug", 50, "bug", &["a.rs"]);
        bad.rationale.clear();
        let mut zero_conf = sample_proposal("Fix other", 0, "bug", &["b.rs"]);
        zero_conf.confidence = 0;

        let mut run_state = RunState::default();
        let outcome = run_pipeline(vec![bad, zero_conf], &mut run_state, &[], &cfg(&scope, &allow), None);

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected.len(), 2);
    }

    #[test]
    fn defers_out_of_scope_proposals() {
        let scope = Scope::new("src/**");
        let allow = vec!["bug".to_string()];
        let proposal = sample_proposal("Fix docs typo", 80, "bug", &["docs/readme.md"]);

        let mut run_state = RunState::default();
        let outcome = run_pipeline(vec![proposal], &mut run_state, &[], &cfg(&scope, &allow), None);

        assert!(outcome.accepted.is_empty());
        assert_eq!(run_state.deferred_proposals.len(), 1);
        assert_eq!(outcome.rejected[0].1, RejectReason::Deferred);
    }

    #[test]
    fn intra_batch_dedup_keeps_first_of_similar_titles() {
        let scope = Scope::new("**");
        let allow = vec!["bug".to_string()];
        let a = sample_proposal("Fix the parser crash", 90, "bug", &["a.rs"]);
        let b = sample_proposal("Fix parser crash bug", 85, "bug", &["b.rs"]);

        let mut run_state = RunState::default();
        let outcome = run_pipeline(vec![a, b], &mut run_state, &[], &cfg(&scope, &allow), None);

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].title, "Fix the parser crash");
    }

    #[test]
    fn rejects_category_not_in_allow_set() {
        let scope = Scope::new("**");
        let allow = vec!["bug".to_string()];
        let proposal = sample_proposal("Add a feature", 90, "feature", &["a.rs"]);

        let mut run_state = RunState::default();
        let outcome = run_pipeline(vec![proposal], &mut run_state, &[], &cfg(&scope, &allow), None);

        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.rejected[0].1, RejectReason::CategoryNotTrusted);
    }

    #[test]
    fn balances_test_category_to_max_ratio() {
        let scope = Scope::new("**");
        let allow = vec!["test".to_string(), "bug".to_string()];
        let proposals = vec![
            sample_proposal("Bug fix one", 90, "bug", &["a.rs"]),
            sample_proposal("Bug fix two", 85, "bug", &["b.rs"]),
            sample_proposal("Add test one", 95, "test", &["c.rs"]),
            sample_proposal("Add test two", 94, "test", &["d.rs"]),
            sample_proposal("Add test three", 93, "test", &["e.rs"]),
        ];

        let mut run_state = RunState::default();
        let outcome = run_pipeline(proposals, &mut run_state, &[], &cfg(&scope, &allow), None);

        let test_count = outcome.accepted.iter().filter(|p| p.category == "test").count();
        assert!(test_count <= 2, "test_count was {test_count}");
    }

    #[test]
    fn ticket_priority_rounds_impact_plus_confidence() {
        let proposal = sample_proposal("x", 80, "bug", &["a.rs"]);
        assert_eq!(ticket_priority(&proposal), 130);
    }
}
