//! Spindle governor (C7): per-ticket loop-detection fed one iteration
//! per agent-output chunk. Maintains bounded rolling state and emits a
//! WARN/ABORT verdict when a trigger fires; the ticket runner escalates
//! WARN into a kill-with-grace-period on ABORT.

use std::collections::HashMap;
use std::collections::VecDeque;

use sha2::{Digest, Sha256};

const RING_CAPACITY: usize = 20;
const FILE_EDIT_KEY_CAP: usize = 200;
const FAILING_SIGNATURE_CAP: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    TokenBudget,
    Stalling,
    Oscillation,
    Repetition,
    FileChurn,
}

#[derive(Clone, Debug)]
pub struct Verdict {
    pub trigger: Trigger,
    pub estimated_tokens: u64,
    pub iteration: u64,
    pub confidence: f64,
    pub recommendations: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct SpindleThresholds {
    pub token_budget_abort: u64,
    pub stalling_iterations: u64,
    pub repetition_window: usize,
    pub repetition_similarity: f64,
    pub file_churn_max_edits: u64,
}

impl Default for SpindleThresholds {
    fn default() -> Self {
        Self {
            token_budget_abort: 200_000,
            stalling_iterations: 8,
            repetition_window: 5,
            repetition_similarity: 0.9,
            file_churn_max_edits: 12,
        }
    }
}

fn ring_push(ring: &mut VecDeque<u64>, value: u64) {
    ring.push_back(value);
    if ring.len() > RING_CAPACITY {
        ring.pop_front();
    }
}

#[derive(Default)]
pub struct Spindle {
    thresholds_: Option<SpindleThresholds>,
    output_hashes: VecDeque<u64>,
    diff_hashes: VecDeque<u64>,
    plan_hashes: VecDeque<u64>,
    iterations_since_change: u64,
    total_output_chars: u64,
    total_change_chars: u64,
    file_edit_counts: HashMap<String, u64>,
    failing_command_signatures: Vec<u64>,
    iteration: u64,
}

/// Truncated sha256, matching the hashing style `spin_core::ids` uses for
/// its opaque id suffixes. A full digest would work too; 8 bytes keeps
/// the rolling buffers small and collisions are immaterial here (a false
/// match only means one extra governor check skipped).
fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

impl Spindle {
    pub fn new(thresholds: SpindleThresholds) -> Self {
        Self { thresholds_: Some(thresholds), ..Default::default() }
    }

    fn thresholds(&self) -> SpindleThresholds {
        self.thresholds_.clone().unwrap_or_default()
    }

    /// Feed one iteration: the agent's latest output chunk and the diff
    /// it produced against the prior worktree state (empty diff means no
    /// change this iteration). Returns a verdict only when a trigger
    /// fires; `None` means continue.
    pub fn feed(&mut self, output_chunk: &str, diff: &str, touched_files: &[String]) -> Option<Verdict> {
        self.iteration += 1;
        self.total_output_chars += output_chunk.len() as u64;

        let output_hash = content_hash(output_chunk.as_bytes());
        let diff_hash = content_hash(diff.as_bytes());

        if diff.is_empty() {
            self.iterations_since_change += 1;
        } else {
            self.iterations_since_change = 0;
            self.total_change_chars += diff.len() as u64;
        }

        for file in touched_files {
            if self.file_edit_counts.len() < FILE_EDIT_KEY_CAP || self.file_edit_counts.contains_key(file) {
                *self.file_edit_counts.entry(file.clone()).or_insert(0) += 1;
            }
        }

        let thresholds = self.thresholds();
        let estimated_tokens = self.total_output_chars / 4;

        if estimated_tokens > thresholds.token_budget_abort {
            return Some(self.verdict(Trigger::TokenBudget, estimated_tokens, vec!["reduce prompt scope or split the ticket".to_string()]));
        }
        if self.iterations_since_change >= thresholds.stalling_iterations {
            return Some(self.verdict(Trigger::Stalling, estimated_tokens, vec!["the agent stopped producing changes; consider aborting".to_string()]));
        }
        if self.detect_oscillation(diff_hash) {
            return Some(self.verdict(Trigger::Oscillation, estimated_tokens, vec!["diff is flip-flopping between states".to_string()]));
        }
        if self.detect_repetition(output_hash, &thresholds) {
            return Some(self.verdict(Trigger::Repetition, estimated_tokens, vec!["recent outputs are near-identical".to_string()]));
        }
        if let Some(file) = touched_files.iter().find(|f| self.file_edit_counts.get(*f).copied().unwrap_or(0) > thresholds.file_churn_max_edits) {
            return Some(self.verdict(Trigger::FileChurn, estimated_tokens, vec![format!("{file} has been edited excessively")]));
        }

        ring_push(&mut self.output_hashes, output_hash);
        ring_push(&mut self.diff_hashes, diff_hash);
        let _ = &self.plan_hashes;
        None
    }

    pub fn record_failing_command(&mut self, signature: &str) {
        let h = content_hash(signature.as_bytes());
        if !self.failing_command_signatures.contains(&h) {
            if self.failing_command_signatures.len() >= FAILING_SIGNATURE_CAP {
                self.failing_command_signatures.remove(0);
            }
            self.failing_command_signatures.push(h);
        }
    }

    fn detect_oscillation(&self, diff_hash: u64) -> bool {
        // add -> remove -> add pattern: the same diff hash reappears after
        // at least one different hash in between.
        if self.diff_hashes.len() < 2 {
            return false;
        }
        let last = *self.diff_hashes.back().unwrap();
        last != diff_hash && self.diff_hashes.contains(&diff_hash)
    }

    fn detect_repetition(&self, output_hash: u64, thresholds: &SpindleThresholds) -> bool {
        if self.output_hashes.len() < thresholds.repetition_window {
            return false;
        }
        let window: Vec<u64> = self.output_hashes.iter().rev().take(thresholds.repetition_window).copied().collect();
        let matches = window.iter().filter(|h| **h == output_hash).count();
        (matches as f64 / thresholds.repetition_window as f64) >= thresholds.repetition_similarity
    }

    fn verdict(&self, trigger: Trigger, estimated_tokens: u64, recommendations: Vec<String>) -> Verdict {
        Verdict {
            trigger,
            estimated_tokens,
            iteration: self.iteration,
            confidence: 0.8,
            recommendations,
        }
    }
}

/// The runner's escalation policy: the first verdict is a WARN; a
/// second verdict for the *same* trigger within the same ticket run is
/// an ABORT.
#[derive(Default)]
pub struct Escalation {
    warned_triggers: Vec<Trigger>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escalated {
    Warn,
    Abort,
}

impl Escalation {
    pub fn observe(&mut self, trigger: Trigger) -> Escalated {
        if self.warned_triggers.contains(&trigger) {
            Escalated::Abort
        } else {
            self.warned_triggers.push(trigger);
            Escalated::Warn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stalling_triggers_after_threshold_iterations_without_change() {
        let mut spindle = Spindle::new(SpindleThresholds { stalling_iterations: 3, ..Default::default() });
        assert!(spindle.feed("out1", "diff", &[]).is_none());
        assert!(spindle.feed("out2", "", &[]).is_none());
        assert!(spindle.feed("out3", "", &[]).is_none());
        let verdict = spindle.feed("out4", "", &[]).expect("should stall");
        assert_eq!(verdict.trigger, Trigger::Stalling);
    }

    #[test]
    fn file_churn_triggers_past_max_edits() {
        let mut spindle = Spindle::new(SpindleThresholds { file_churn_max_edits: 2, ..Default::default() });
        let files = vec!["src/lib.rs".to_string()];
        assert!(spindle.feed("a", "d1", &files).is_none());
        assert!(spindle.feed("b", "d2", &files).is_none());
        let verdict = spindle.feed("c", "d3", &files).expect("should churn");
        assert_eq!(verdict.trigger, Trigger::FileChurn);
    }

    #[test]
    fn token_budget_triggers_past_threshold() {
        let mut spindle = Spindle::new(SpindleThresholds { token_budget_abort: 10, ..Default::default() });
        let big_output = "x".repeat(100);
        let verdict = spindle.feed(&big_output, "diff", &[]).expect("should abort on tokens");
        assert_eq!(verdict.trigger, Trigger::TokenBudget);
    }

    #[test]
    fn repetition_triggers_on_near_identical_outputs() {
        let mut spindle = Spindle::new(SpindleThresholds { repetition_window: 3, repetition_similarity: 1.0, ..Default::default() });
        assert!(spindle.feed("same", "d1", &[]).is_none());
        assert!(spindle.feed("same", "d2", &[]).is_none());
        let verdict = spindle.feed("same", "d3", &[]).expect("should repeat");
        assert_eq!(verdict.trigger, Trigger::Repetition);
    }

    #[test]
    fn escalation_warns_then_aborts_on_repeat_trigger() {
        let mut escalation = Escalation::default();
        assert_eq!(escalation.observe(Trigger::Stalling), Escalated::Warn);
        assert_eq!(escalation.observe(Trigger::Stalling), Escalated::Abort);
    }
}
