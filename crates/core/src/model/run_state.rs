use super::proposal::Proposal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-formula cycle statistics feeding the UCB1 selection in §4.8 stage 5.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormulaStats {
    pub cycles: u64,
    pub last_reset_cycle: u64,
    pub proposals_generated: u64,
    /// Ring buffer of the last N cycle outcomes (`true` = tickets shipped),
    /// capped by `RunState::RECENT_CYCLES_CAP`.
    pub recent_cycles: Vec<bool>,
    pub recent_tickets_total: u64,
    pub recent_tickets_succeeded: u64,
}

impl FormulaStats {
    pub fn successes(&self) -> u64 {
        self.recent_cycles.iter().filter(|c| **c).count() as u64
    }

    pub fn failures(&self) -> u64 {
        self.recent_cycles.iter().filter(|c| !**c).count() as u64
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub proposed: u64,
    pub accepted: u64,
    pub shipped: u64,
}

/// A directory-sized scan unit tracked for yield, success/failure, and
/// "polished" state (§4.8 + glossary "Sector").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SectorState {
    pub yield_ema: f64,
    pub successes: u64,
    pub failures: u64,
    pub polished_at_ms: Option<i64>,
    pub confidence: f64,
}

/// Per-repo mutable cycle state, persisted as JSON with atomic
/// tmp-then-rename writes (see `spin_storage::state`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunState {
    pub cycle_count: u64,
    pub formula_stats: HashMap<String, FormulaStats>,
    pub category_stats: HashMap<String, CategoryStats>,
    pub sector_state: HashMap<String, SectorState>,
    /// Capped at 20 entries; overflow evicts the lowest-confidence proposal
    /// (§4.2 stage 6).
    pub deferred_proposals: Vec<Proposal>,
    pub learning_snapshots: Vec<serde_json::Value>,
    pub docs_audit_last_cycle: u64,
    pub consecutive_idle_cycles: u64,
    pub last_pull_cycle: u64,
    pub last_guidelines_refresh_cycle: u64,
}

impl RunState {
    pub const DEFERRED_PROPOSALS_CAP: usize = 20;
    pub const RECENT_CYCLES_CAP: usize = 50;

    /// Insert a deferred proposal, evicting the lowest-confidence entry
    /// when the cap is exceeded (§4.2 stage 6).
    pub fn push_deferred(&mut self, proposal: Proposal) {
        self.deferred_proposals.push(proposal);
        if self.deferred_proposals.len() > Self::DEFERRED_PROPOSALS_CAP {
            if let Some((idx, _)) = self
                .deferred_proposals
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.confidence)
            {
                self.deferred_proposals.remove(idx);
            }
        }
    }

    pub fn record_cycle(&mut self, formula: &str, shipped_any: bool) {
        let stats = self.formula_stats.entry(formula.to_string()).or_default();
        stats.cycles += 1;
        stats.recent_cycles.push(shipped_any);
        if stats.recent_cycles.len() > Self::RECENT_CYCLES_CAP {
            stats.recent_cycles.remove(0);
        }
    }
}
