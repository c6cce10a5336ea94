//! Spin scheduler (C8): the outermost per-cycle driver. Each of the
//! twelve stages below is a small, independently testable function;
//! the crate's top-level cycle driver (`lib.rs`) sequences them in the
//! numbered order from spec.md §4.8.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use spin_agent::coding_agent::BackendConfig;
use spin_agent::scout::{escalation_prompt, invoke_scout};
use spin_config::solo_config::{PullPolicy, SoloConfig};
use spin_core::ids::ProjectId;
use spin_core::model::{Formula, Proposal, RunState, Ticket, TicketStatus};
use spin_core::scope::Scope;
use spin_core::wave::{partition_waves, Sensitivity, WaveItem};
use spin_storage::Store;

use crate::error::EngineError;
use crate::git_driver::GitMutex;
use crate::pipeline::ticket_priority;
use crate::ticket_runner::{run_ticket, TicketRunResult, TicketRunnerConfig};
use crate::trajectory_engine::StepOverlay;

const DEEP_FORMULA: &str = "deep";
const DEEP_STALE_CYCLES: u64 = 7;
const DEEP_MIN_PRODUCTION_FILES: usize = 25;
const WARMUP_FRACTION: f64 = 0.1;
const COOLDOWN_FRACTION: f64 = 0.9;

// ---- stage 1: session arc ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Warmup,
    Deep,
    Cooldown,
}

/// `expected_wall_ms` is `SoloConfig.session_expected_wall_ms`; absent
/// or non-positive means "no expected duration" and the session stays
/// in `Deep` for its whole life.
pub fn session_phase(elapsed_ms: i64, expected_wall_ms: Option<i64>) -> SessionPhase {
    let Some(expected) = expected_wall_ms.filter(|&e| e > 0) else {
        return SessionPhase::Deep;
    };
    let fraction = elapsed_ms as f64 / expected as f64;
    if fraction < WARMUP_FRACTION {
        SessionPhase::Warmup
    } else if fraction > COOLDOWN_FRACTION {
        SessionPhase::Cooldown
    } else {
        SessionPhase::Deep
    }
}

// ---- stage 2: pull cadence ----

/// `git pull --ff-only origin <base>` under the git mutex, every
/// `pullEveryNCycles` cycles (never on cycle 0). `PullPolicy::Halt`
/// surfaces the failure; `Warn` swallows it so the session continues.
pub fn maybe_pull(cycle: u64, cfg: &SoloConfig, repo_root: &Path, base_branch: &str, git_mutex: &GitMutex) -> Result<(), EngineError> {
    if cycle == 0 || cfg.pull_every_n_cycles == 0 || cycle % cfg.pull_every_n_cycles as u64 != 0 {
        return Ok(());
    }
    let result = git_mutex.with_lock(|| {
        let status = Command::new("git")
            .args(["pull", "--ff-only", "origin", base_branch])
            .current_dir(repo_root)
            .status()
            .map_err(|e| EngineError::Git(e.to_string()))?;
        if status.success() {
            Ok(())
        } else {
            Err(EngineError::Git(format!("git pull --ff-only origin {base_branch} failed")))
        }
    });
    match result {
        Ok(()) => Ok(()),
        Err(e) => match cfg.pull_policy {
            PullPolicy::Halt => Err(e),
            PullPolicy::Warn => Ok(()),
        },
    }
}

// ---- stage 3: guidelines refresh ----

/// Re-read the guidelines file every `guidelinesRefreshCycles`; `None`
/// both when it isn't due this cycle and when the file doesn't exist.
pub fn maybe_refresh_guidelines(cycle: u64, cfg: &SoloConfig, guidelines_path: &Path) -> Option<String> {
    if cfg.guidelines_refresh_cycles == 0 || cycle % cfg.guidelines_refresh_cycles as u64 != 0 {
        return None;
    }
    std::fs::read_to_string(guidelines_path).ok()
}

// ---- stage 4: retention GC ----

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub tickets_removed: u64,
    pub artifact_files_removed: u64,
    pub run_dirs_removed: u64,
    pub stale_branches_removed: u64,
}

fn prune_files_older_than(dir: &Path, max_age_ms: i64, now_ms: i64) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else { return 0 };
    let mut removed = 0;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else { continue };
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else { continue };
        let age_ms = now_ms - modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(now_ms);
        if age_ms > max_age_ms && std::fs::remove_file(entry.path()).is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Prune entries in the `<appdir>/runs/` artifact directories older than
/// `maxArtifactAgeDays`, hard-delete `done` tickets beyond
/// `maxCompletedTickets`, and remove merged/stale `<app>/tkt_*` branches
/// older than `maxStaleBranchDays`. Oldest-history-line and tui-log
/// trimming live alongside the NDJSON journal writer (C10), not here.
pub fn run_retention_gc(
    appdir: &Path,
    store: &Store,
    project_id: &ProjectId,
    cfg: &SoloConfig,
    repo_root: &Path,
    app_prefix: &str,
    now_ms: i64,
) -> Result<RetentionReport, EngineError> {
    let mut report = RetentionReport::default();

    let runs_dir = appdir.join("runs");
    if runs_dir.exists() {
        let max_age_ms = cfg.max_artifact_age_days as i64 * 24 * 60 * 60 * 1000;
        if let Ok(entries) = std::fs::read_dir(&runs_dir) {
            for entry in entries.flatten() {
                let artifacts = entry.path().join("artifacts");
                if artifacts.exists() {
                    report.artifact_files_removed += prune_files_older_than(&artifacts, max_age_ms, now_ms);
                }
            }
        }
    }

    report.tickets_removed = store.delete_oldest_done_tickets(project_id, cfg.max_completed_tickets)?;

    let max_branch_age_ms = cfg.max_stale_branch_days as i64 * 24 * 60 * 60 * 1000;
    if let Ok(output) = Command::new("git")
        .args(["for-each-ref", "--format=%(refname:short) %(committerdate:unix)", &format!("refs/heads/{app_prefix}/tkt_*")])
        .current_dir(repo_root)
        .output()
    {
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let Some((branch, ts)) = line.rsplit_once(' ') else { continue };
            let Ok(ts_secs) = ts.trim().parse::<i64>() else { continue };
            if now_ms - ts_secs * 1000 > max_branch_age_ms {
                let status = Command::new("git").args(["branch", "-D", branch]).current_dir(repo_root).status();
                if matches!(status, Ok(s) if s.success()) {
                    report.stale_branches_removed += 1;
                }
            }
        }
    }

    Ok(report)
}

// ---- stage 5: formula selection ----

fn ucb1_score(successes: u64, failures: u64, cycle: u64, recent_cycles: u64) -> f64 {
    let alpha = successes as f64 + 1.0;
    let beta = failures as f64 + 1.0;
    let exploitation = alpha / (alpha + beta);
    let exploration = (2.0 * (cycle.max(1) as f64).ln() / recent_cycles.max(1) as f64).sqrt();
    exploitation + exploration
}

/// Precedence chain from §4.8 stage 5. `candidates` holds every formula
/// eligible this cycle (including `deep` if defined); `production_file_count`
/// gates `deep` at 25+ files.
#[allow(clippy::too_many_arguments)]
pub fn select_formula<'a>(
    phase: SessionPhase,
    explicit_active: Option<&'a str>,
    candidates: &'a [Formula],
    run_state: &RunState,
    cycle: u64,
    production_file_count: usize,
    docs_audit_interval: u32,
    barren_cycles_in_a_row: u32,
    active_lens_override: Option<&'a str>,
) -> Option<&'a Formula> {
    let by_name = |name: &str| candidates.iter().find(|f| f.name == name);

    if let Some(name) = explicit_active {
        if let Some(f) = by_name(name) {
            return Some(f);
        }
    }
    if phase == SessionPhase::Cooldown {
        return None;
    }

    let deep_eligible = production_file_count >= DEEP_MIN_PRODUCTION_FILES && phase != SessionPhase::Warmup;
    if deep_eligible {
        let deep_stats = run_state.formula_stats.get(DEEP_FORMULA);
        let cycles_since_deep = deep_stats.map(|s| cycle.saturating_sub(s.last_reset_cycle)).unwrap_or(u64::MAX);
        if cycles_since_deep >= DEEP_STALE_CYCLES {
            if let Some(f) = by_name(DEEP_FORMULA) {
                return Some(f);
            }
        }
    }

    let effective_interval = if barren_cycles_in_a_row >= 3 { docs_audit_interval.max(10) } else { docs_audit_interval };
    if effective_interval > 0 && cycle % effective_interval as u64 == 0 {
        if let Some(f) = by_name("docs-audit") {
            return Some(f);
        }
    }

    if let Some(name) = active_lens_override {
        if let Some(f) = by_name(name) {
            return Some(f);
        }
    }

    if phase == SessionPhase::Warmup {
        return None;
    }

    candidates
        .iter()
        .filter(|f| f.name == "default" || (f.name == DEEP_FORMULA && deep_eligible))
        .max_by(|a, b| {
            let score = |name: &str| {
                let stats = run_state.formula_stats.get(name);
                stats.map(|s| ucb1_score(s.successes(), s.failures(), cycle, s.recent_cycles.len() as u64)).unwrap_or(f64::MAX)
            };
            score(&a.name).partial_cmp(&score(&b.name)).unwrap_or(std::cmp::Ordering::Equal)
        })
}

// ---- stage 6: goal gap selection ----

fn last_numeric_token(stdout: &str) -> Option<f64> {
    stdout
        .split_whitespace()
        .rev()
        .find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-').parse::<f64>().ok())
}

/// Gap percentage for one goal: 0 means met, 100 means maximally far
/// (capped there when `target == 0`).
pub fn goal_gap(repo_root: &Path, goal: &Formula) -> Option<f64> {
    let measure = goal.measure.as_ref()?;
    let output = Command::new("sh").arg("-c").arg(&measure.cmd).current_dir(repo_root).output().ok()?;
    let value = last_numeric_token(&String::from_utf8_lossy(&output.stdout))?;
    let gap = match measure.direction {
        spin_core::model::MeasureDirection::Up => measure.target - value,
        spin_core::model::MeasureDirection::Down => value - measure.target,
    };
    if gap <= 0.0 {
        return Some(0.0);
    }
    if measure.target == 0.0 {
        return Some(100.0);
    }
    Some((gap / measure.target.abs() * 100.0).min(100.0))
}

/// Pick the goal with the largest unmet gap; `None` when every goal is
/// already met or there are no goals.
pub fn select_goal<'a>(repo_root: &Path, goals: &'a [Formula]) -> Option<(&'a Formula, f64)> {
    goals
        .iter()
        .filter_map(|g| goal_gap(repo_root, g).map(|gap| (g, gap)))
        .filter(|(_, gap)| *gap > 0.0)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

// ---- stage 7: parallel formulas ----

pub struct TasteProfile {
    pub preferred_categories: Vec<String>,
    pub avoided_categories: Vec<String>,
}

fn category_fit(formula: &Formula, taste: &TasteProfile) -> f64 {
    let mut score = 0.0;
    for category in &formula.categories {
        if taste.preferred_categories.contains(category) {
            score += 3.0;
        }
        if taste.avoided_categories.contains(category) {
            score -= 5.0;
        }
    }
    score
}

fn category_overlap_ratio(a: &Formula, b: &Formula) -> f64 {
    if a.categories.is_empty() || b.categories.is_empty() {
        return 0.0;
    }
    let shared = a.categories.iter().filter(|c| b.categories.contains(c)).count();
    let smaller = a.categories.len().min(b.categories.len());
    shared as f64 / smaller as f64
}

/// Score and pick up to `max_formulas` (capped at 3) candidates for
/// parallel execution, rejecting any pick that would overlap an
/// already-picked formula's categories by more than 50%.
pub fn select_parallel_formulas<'a>(
    candidates: &'a [Formula],
    taste: &TasteProfile,
    current_formula: Option<&str>,
    ran_last_cycle: &[String],
    run_state: &RunState,
    max_formulas: u32,
) -> Vec<&'a Formula> {
    let cap = max_formulas.min(3) as usize;
    let mut scored: Vec<(f64, &Formula)> = candidates
        .iter()
        .map(|f| {
            let mut score = category_fit(f, taste);
            if Some(f.name.as_str()) == current_formula {
                score -= 1.0;
            }
            if ran_last_cycle.contains(&f.name) {
                score -= 3.0;
            }
            if let Some(stats) = run_state.formula_stats.get(&f.name) {
                let total = stats.recent_cycles.len() as f64;
                if total > 0.0 {
                    score += (stats.successes() as f64 / total).min(1.0) * 2.0;
                }
            }
            (score, f)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut picked: Vec<&Formula> = Vec::new();
    for (_, candidate) in scored {
        if picked.len() >= cap {
            break;
        }
        let overlaps_too_much = picked.iter().any(|p| category_overlap_ratio(p, candidate) > 0.5);
        if !overlaps_too_much {
            picked.push(candidate);
        }
    }
    picked
}

// ---- stage 8: category allow/block ----

/// `--allow` overrides entirely; otherwise the formula's own categories
/// (or the full trusted set when none are declared) form the base,
/// `--tests` adds `test`, and `--block` both strips from allow and adds
/// to the block list.
pub fn compute_categories(
    cli_allow: &[String],
    formula: Option<&Formula>,
    trusted_category_set: &[String],
    include_tests: bool,
    cli_block: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut allow: Vec<String> = if !cli_allow.is_empty() {
        cli_allow.to_vec()
    } else {
        match formula {
            Some(f) if !f.categories.is_empty() => f.categories.clone(),
            _ => trusted_category_set.to_vec(),
        }
    };
    if include_tests && !allow.iter().any(|c| c == "test") {
        allow.push("test".to_string());
    }
    let mut block: Vec<String> = cli_block.to_vec();
    allow.retain(|c| !cli_block.contains(c));
    for c in cli_block {
        if !block.contains(c) {
            block.push(c.clone());
        }
    }
    (allow, block)
}

// ---- stage 9: scout invocation ----

pub struct ScoutRequest<'a> {
    pub formula: &'a Formula,
    pub categories: &'a [String],
    pub prompt: String,
}

/// Invoke the scout once, and on an empty result retry a single time
/// with the escalation prompt (§4.8 stage 9).
pub fn scout_with_escalation(
    backend: &BackendConfig,
    repo_root: &Path,
    request: &ScoutRequest,
    unexplored_modules: &[String],
    timeout: Duration,
) -> Result<Vec<Proposal>, EngineError> {
    let proposals = invoke_scout(backend, repo_root, &request.prompt, timeout)?;
    if !proposals.is_empty() {
        return Ok(proposals);
    }
    let escalated = escalation_prompt(&request.prompt, unexplored_modules, 15);
    Ok(invoke_scout(backend, repo_root, &escalated, timeout)?)
}

// ---- stage 10: ticket dispatch via waves ----

fn ticket_to_wave_item(ticket: &Ticket) -> WaveItem {
    WaveItem {
        id: ticket.id.as_str().to_string(),
        files: ticket.allowed_paths.clone(),
        target_symbols: None,
        category: ticket.category.clone(),
    }
}

/// Partition `tickets` into conflict-free waves and run each wave's
/// tickets on a scoped thread pool, bounded by
/// `min(scout_concurrency, plugin_parallel)`. Waves execute
/// sequentially; within a wave, order is unspecified.
///
/// `db_path` rather than a shared `&Store` is intentional: `Db` caches
/// prepared-statement text in a `RefCell` and is therefore `!Sync`, so
/// each worker thread opens its own connection against the same
/// (WAL-mode) sqlite file instead of contending on one.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_waves(
    db_path: &Path,
    project_id: &ProjectId,
    tickets: Vec<Ticket>,
    runner_cfg: &TicketRunnerConfig<'_>,
    git_mutex: &GitMutex,
    artifacts_dir: &Path,
    wave_width: usize,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<Vec<TicketRunResult>, EngineError> {
    let items: Vec<WaveItem> = tickets.iter().map(ticket_to_wave_item).collect();
    let waves = partition_waves(&items, Sensitivity::Normal, &[]);
    let by_id: HashMap<String, Ticket> = tickets.into_iter().map(|t| (t.id.as_str().to_string(), t)).collect();

    let mut results = Vec::new();
    'waves: for wave in waves {
        if cancelled() {
            break 'waves;
        }
        for chunk in wave.chunks(wave_width.max(1)) {
            let chunk_results: Vec<Result<TicketRunResult, EngineError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|id| {
                        let ticket = by_id.get(id).expect("wave item id must exist in dispatched tickets").clone();
                        scope.spawn(|| {
                            let store = Store::open(db_path)?;
                            run_ticket(&store, project_id, ticket, runner_cfg, git_mutex, artifacts_dir, |_| {}, cancelled)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap_or_else(|_| Err(EngineError::Invalid("ticket runner thread panicked".to_string())))).collect()
            });
            for r in chunk_results {
                results.push(r?);
            }
        }
    }
    Ok(results)
}

// ---- stage 11: idle detection ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleOutcome {
    Continue,
    Stop,
}

/// Track consecutive cycles shipping zero tickets; at `max_idle_cycles`
/// the session should stop with reason `idle`.
pub fn track_idle(run_state: &mut RunState, tickets_completed_this_cycle: u64, max_idle_cycles: u32) -> IdleOutcome {
    if tickets_completed_this_cycle == 0 {
        run_state.consecutive_idle_cycles += 1;
    } else {
        run_state.consecutive_idle_cycles = 0;
    }
    if run_state.consecutive_idle_cycles >= max_idle_cycles as u64 {
        IdleOutcome::Stop
    } else {
        IdleOutcome::Continue
    }
}

// ---- stage 12: trajectory overlay ----

/// Effective cycle inputs after a trajectory overlay (if any) has been
/// applied; `bypass_free_proposals` is `true` whenever an overlay is in
/// effect, since the step is materialized directly rather than scouted.
pub struct EffectiveCycleInputs<'a> {
    pub scope: Scope,
    pub categories: Vec<String>,
    pub verification_commands: &'a [String],
    pub bypass_free_proposals: bool,
}

pub fn apply_trajectory_overlay<'a>(overlay: Option<&'a StepOverlay<'a>>, default_scope: &str, default_categories: &[String]) -> EffectiveCycleInputs<'a> {
    match overlay {
        Some(step) => EffectiveCycleInputs {
            scope: Scope::new(step.scope),
            categories: step.categories.to_vec(),
            verification_commands: step.verification_commands,
            bypass_free_proposals: true,
        },
        None => EffectiveCycleInputs {
            scope: Scope::new(default_scope),
            categories: default_categories.to_vec(),
            verification_commands: &[],
            bypass_free_proposals: false,
        },
    }
}

/// Materialize a ticket straight from a trajectory step, bypassing C2's
/// free-proposal acceptance entirely (§4.8 stage 12).
pub fn ticket_from_trajectory_step(project_id: &ProjectId, step: &StepOverlay, now_ms: i64) -> Ticket {
    Ticket {
        id: spin_core::ids::TicketId::generate(),
        project_id: project_id.clone(),
        title: format!("[trajectory] {}", step.step_id),
        description: step.acceptance_criteria.join("\n"),
        status: TicketStatus::Ready,
        priority: 100,
        category: step.categories.first().cloned().unwrap_or_else(|| "refactor".to_string()),
        allowed_paths: vec![step.scope.to_string()],
        forbidden_paths: Vec::new(),
        verification_commands: step.verification_commands.to_vec(),
        max_retries: 3,
        retry_count: 0,
        metadata: serde_json::Map::new(),
        revision: 0,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    }
}

/// Run C2 over a batch of scouted proposals and materialize the
/// accepted ones as tickets in a single pass, returning them alongside
/// their priority (§4.2 stage 11).
pub fn materialize_tickets(store: &Store, project_id: &ProjectId, accepted: Vec<Proposal>, now_ms: i64) -> Result<Vec<Ticket>, EngineError> {
    let mut tickets = Vec::with_capacity(accepted.len());
    for proposal in accepted {
        let ticket = Ticket {
            id: spin_core::ids::TicketId::generate(),
            project_id: project_id.clone(),
            title: proposal.title.clone(),
            description: proposal.description.clone(),
            status: TicketStatus::Ready,
            priority: ticket_priority(&proposal),
            category: proposal.category.clone(),
            allowed_paths: proposal.allowed_paths.clone(),
            forbidden_paths: Vec::new(),
            verification_commands: proposal.verification_commands.clone(),
            max_retries: 3,
            retry_count: 0,
            metadata: serde_json::Map::new(),
            revision: 0,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        store.create_ticket(&ticket)?;
        tickets.push(ticket);
    }
    Ok(tickets)
}
