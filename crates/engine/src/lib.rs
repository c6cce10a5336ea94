//! spin_engine: C2 (proposal pipeline), C4 (wave scheduler, re-exported
//! from spin_core), C5 (git driver), C6/C6.1 (ticket runner + QA), C7
//! (Spindle governor), C8 (spin scheduler), C9 (trajectory engine) — the
//! whole per-cycle control flow of a spin session, wired together here.

pub mod blueprint;
pub mod error;
pub mod git_driver;
pub mod pipeline;
pub mod qa;
pub mod quality_gate;
pub mod scheduler;
pub mod spindle;
pub mod ticket_runner;
pub mod trajectory_engine;

use std::path::Path;
use std::time::Duration;

use spin_agent::coding_agent::BackendConfig;
use spin_agent::pr_cli::PrCliConfig;
use spin_config::solo_config::SoloConfig;
use spin_core::ids::ProjectId;
use spin_core::model::{Event, EventType, Formula, RunState, Trajectory, TrajectoryState};
use spin_core::scope::Scope;
use spin_storage::journal::Journal;
use spin_storage::Store;

use error::{CycleOutcome, EngineError};
use git_driver::GitMutex;
use pipeline::{run_pipeline, PipelineConfig};
use scheduler::{
    apply_trajectory_overlay, compute_categories, dispatch_waves, materialize_tickets, maybe_pull, maybe_refresh_guidelines, run_retention_gc, scout_with_escalation,
    select_formula, select_goal, select_parallel_formulas, session_phase, ticket_from_trajectory_step, track_idle, ScoutRequest, SessionPhase, TasteProfile,
};
use ticket_runner::{DeliveryMode, TicketRunnerConfig};

/// Everything one cycle needs to read. Config and formula/goal tables
/// are caller-owned (loaded once per session, not reloaded per cycle);
/// `run_state` and `trajectory_state` are the two pieces of mutable,
/// cycle-to-cycle state this function threads through.
pub struct CycleContext<'a> {
    pub repo_root: &'a Path,
    pub appdir: &'a Path,
    pub app_prefix: &'a str,
    pub base_branch: &'a str,
    pub db_path: &'a Path,
    pub project_id: &'a ProjectId,
    pub guidelines_path: &'a Path,
    pub cfg: &'a SoloConfig,
    pub backend: &'a BackendConfig,
    pub pr_cli: &'a PrCliConfig,
    pub formulas: &'a [Formula],
    pub goals: &'a [Formula],
    pub trusted_category_set: &'a [String],
    pub taste: &'a TasteProfile,
    pub trajectory: Option<&'a Trajectory>,
    pub delivery_mode: DeliveryMode,
    pub agent_timeout: Duration,
    pub journal: Option<&'a Journal>,
}

fn journal_emit(journal: Option<&Journal>, step: &str, event_type: EventType, payload: serde_json::Value) {
    let Some(journal) = journal else { return };
    let run_id = spin_core::ids::RunId::generate();
    if let Err(e) = journal.append(&Event::new(&run_id, step, event_type, payload)) {
        tracing::warn!(error = %e, "failed to append journal event");
    }
}

fn build_scout_prompt(formula: Option<&Formula>, categories: &[String], guidelines: Option<&str>, goal: Option<(&Formula, f64)>) -> String {
    let mut prompt = String::new();
    match formula {
        Some(f) => {
            prompt.push_str(&format!("# Formula: {}\n", f.name));
            if let Some(custom) = &f.custom_prompt {
                prompt.push_str(custom);
                prompt.push('\n');
            }
        }
        None => prompt.push_str("# Default scan\n"),
    }
    prompt.push_str("\n## Categories\n");
    for category in categories {
        prompt.push_str(&format!("- {category}\n"));
    }
    if let Some((goal, gap)) = goal {
        prompt.push_str(&format!("\n## Goal\n{} is {:.1}% short of target; prioritize closing this gap.\n", goal.name, gap));
    }
    if let Some(guidelines) = guidelines {
        prompt.push_str(&format!("\n<project-guidelines>\n{guidelines}\n</project-guidelines>\n"));
    }
    prompt
}

/// Run exactly one cycle: session arc, pull, guidelines, retention,
/// formula/goal selection, scout, pipeline, wave dispatch, idle
/// tracking, and trajectory overlay — in the order spec.md §4.8 lists
/// them. `cancelled` is polled between stages and passed down into
/// ticket dispatch.
#[allow(clippy::too_many_arguments)]
pub fn run_cycle(
    ctx: &CycleContext,
    store: &Store,
    run_state: &mut RunState,
    trajectory_state: Option<&mut TrajectoryState>,
    git_mutex: &GitMutex,
    artifacts_dir: &Path,
    elapsed_ms: i64,
    now_ms: i64,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<CycleOutcome, EngineError> {
    if cancelled() {
        return Ok(CycleOutcome::Terminate { reason: "cancelled".to_string() });
    }

    // Stage 1: session arc.
    let phase = session_phase(elapsed_ms, ctx.cfg.session_expected_wall_ms);

    // Stage 2: pull cadence.
    maybe_pull(run_state.cycle_count, ctx.cfg, ctx.repo_root, ctx.base_branch, git_mutex)?;

    // Stage 3: guidelines refresh.
    let guidelines = maybe_refresh_guidelines(run_state.cycle_count, ctx.cfg, ctx.guidelines_path);

    // Stage 4: retention GC.
    run_retention_gc(ctx.appdir, store, ctx.project_id, ctx.cfg, ctx.repo_root, ctx.app_prefix, now_ms)?;

    // Stage 12 (checked early, since an active trajectory bypasses
    // stages 5-9's free-proposal discovery entirely).
    let overlay = ctx
        .trajectory
        .zip(trajectory_state.as_deref())
        .and_then(|(t, s)| trajectory_engine::current_overlay(t, s));
    let effective = apply_trajectory_overlay(overlay.as_ref(), &ctx.cfg.scope, &ctx.cfg.allow_categories);

    let tickets_shipped = if effective.bypass_free_proposals {
        let overlay = overlay.expect("bypass_free_proposals implies Some(overlay)");
        let ticket = ticket_from_trajectory_step(ctx.project_id, &overlay, now_ms);
        store.create_ticket(&ticket)?;
        let results = dispatch_one_ticket_batch(ctx, git_mutex, artifacts_dir, vec![ticket], cancelled)?;
        if let (Some(trajectory), Some(state)) = (ctx.trajectory, trajectory_state) {
            if let Some(result) = results.first() {
                match result.final_status {
                    spin_core::model::TicketStatus::Done => trajectory_engine::complete_step(trajectory, state, overlay.step_id),
                    spin_core::model::TicketStatus::Blocked => {
                        let reason = result.run.error.as_deref().unwrap_or("ticket blocked");
                        trajectory_engine::fail_step(trajectory, state, overlay.step_id, reason);
                    }
                    _ => {}
                }
            }
        }
        results
    } else {
        // Stage 5: formula selection.
        let formula = select_formula(
            phase,
            ctx.cfg.active_formula.as_deref(),
            ctx.formulas,
            run_state,
            run_state.cycle_count,
            count_production_files(ctx.repo_root),
            ctx.cfg.docs_audit_interval,
            0,
            None,
        );

        // Stage 6: goal gap selection.
        let goal = select_goal(ctx.repo_root, ctx.goals);

        // Stage 7: parallel formulas (only when configured; otherwise a
        // single-formula cycle as selected above).
        let formula_batch: Vec<&Formula> = if ctx.cfg.parallel_formulas {
            select_parallel_formulas(ctx.formulas, ctx.taste, formula.map(|f| f.name.as_str()), &[], run_state, ctx.cfg.max_formulas)
        } else {
            formula.into_iter().collect()
        };

        if formula_batch.is_empty() && goal.is_none() && phase != SessionPhase::Warmup {
            Vec::new()
        } else {
            let mut shipped = Vec::new();
            let primary_formula = formula_batch.first().copied();

            // Stage 8: category allow/block.
            let (allow, _block) = compute_categories(&ctx.cfg.allow_categories, primary_formula, ctx.trusted_category_set, ctx.cfg.include_tests, &ctx.cfg.block_categories);

            // Stage 9: scout invocation (with escalation retry on an
            // empty batch), one call per selected formula.
            let mut incoming = Vec::new();
            for f in &formula_batch {
                let prompt = build_scout_prompt(Some(f), &allow, guidelines.as_deref(), goal);
                let request = ScoutRequest { formula: f, categories: &allow, prompt };
                incoming.extend(scout_with_escalation(ctx.backend, ctx.repo_root, &request, &[], ctx.agent_timeout)?);
            }
            if formula_batch.is_empty() {
                let prompt = build_scout_prompt(None, &allow, guidelines.as_deref(), goal);
                let request = ScoutRequest { formula: ctx.formulas.first().ok_or_else(|| EngineError::Invalid("no formulas configured".to_string()))?, categories: &allow, prompt };
                incoming.extend(scout_with_escalation(ctx.backend, ctx.repo_root, &request, &[], ctx.agent_timeout)?);
            }

            // C2: validate/normalize/scope-gate/dedup/rank/balance/materialize.
            let scope = Scope::new(ctx.cfg.scope.clone());
            let existing_ready = store.list_tickets_by_status(ctx.project_id, spin_core::model::TicketStatus::Ready)?;
            let existing_in_progress = store.list_tickets_by_status(ctx.project_id, spin_core::model::TicketStatus::InProgress)?;
            let existing_done = store.list_tickets_by_status(ctx.project_id, spin_core::model::TicketStatus::Done)?;
            let all_existing: Vec<spin_core::model::Ticket> = existing_ready.into_iter().chain(existing_in_progress).chain(existing_done).collect();
            let existing: Vec<&spin_core::model::Ticket> = pipeline::dedup_candidate_tickets(&all_existing, now_ms);
            let pipeline_cfg = PipelineConfig { scope: &scope, allow_categories: &allow, min_impact_score: 0.0, max_proposals_per_scout: 20, test_category_max_ratio: 0.4 };
            let outcome = run_pipeline(incoming, run_state, &existing, &pipeline_cfg, None);
            journal_emit(
                ctx.journal,
                "pipeline",
                EventType::ProposalsFiltered,
                serde_json::json!({"accepted": outcome.accepted.len(), "rejected": outcome.rejected.len()}),
            );
            let tickets = materialize_tickets(store, ctx.project_id, outcome.accepted, now_ms)?;

            if !tickets.is_empty() {
                shipped = dispatch_one_ticket_batch(ctx, git_mutex, artifacts_dir, tickets, cancelled)?;
            }
            for f in &formula_batch {
                run_state.record_cycle(&f.name, !shipped.is_empty());
            }
            shipped
        }
    };

    // Stage 11: idle detection.
    let idle = track_idle(run_state, tickets_shipped.len() as u64, ctx.cfg.max_idle_cycles);
    run_state.cycle_count += 1;

    match idle {
        scheduler::IdleOutcome::Stop => Ok(CycleOutcome::Terminate { reason: "idle".to_string() }),
        scheduler::IdleOutcome::Continue => Ok(CycleOutcome::Continue),
    }
}

fn count_production_files(repo_root: &Path) -> usize {
    fn walk(dir: &Path, count: &mut usize) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if matches!(name, "target" | "node_modules" | ".git" | "dist" | "build") {
                    continue;
                }
                walk(&path, count);
            } else if matches!(path.extension().and_then(|e| e.to_str()), Some("rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "go")) {
                *count += 1;
            }
        }
    }
    let mut count = 0;
    walk(repo_root, &mut count);
    count
}

fn dispatch_one_ticket_batch(
    ctx: &CycleContext,
    git_mutex: &GitMutex,
    artifacts_dir: &Path,
    tickets: Vec<spin_core::model::Ticket>,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Result<Vec<ticket_runner::TicketRunResult>, EngineError> {
    let runner_cfg = TicketRunnerConfig {
        repo_root: ctx.repo_root,
        appdir: ctx.appdir.to_str().unwrap_or(".spin"),
        app_prefix: ctx.app_prefix,
        base_branch: ctx.base_branch,
        allowed_remote: ctx.cfg.allowed_remote.as_deref(),
        backend: ctx.backend,
        qa: &ctx.cfg.qa,
        pr_cli: ctx.pr_cli,
        delivery_mode: ctx.delivery_mode,
        timeout: ctx.agent_timeout,
        skip_qa: false,
        force: false,
        journal: ctx.journal,
    };
    let wave_width = (ctx.cfg.scout_concurrency.min(ctx.cfg.plugin_parallel)).max(1) as usize;
    dispatch_waves(ctx.db_path, ctx.project_id, tickets, &runner_cfg, git_mutex, artifacts_dir, wave_width, cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_production_files_skips_build_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "").unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/b.rs"), "").unwrap();
        assert_eq!(count_production_files(dir.path()), 1);
    }

    #[test]
    fn build_scout_prompt_includes_goal_and_guidelines() {
        let formula = Formula {
            name: "default".to_string(),
            version: None,
            description: None,
            scope: "**".to_string(),
            categories: vec!["bug".to_string()],
            min_confidence: 0,
            max_prs: None,
            max_time: None,
            custom_prompt: None,
            focus_areas: Vec::new(),
            exclude: Vec::new(),
            use_roadmap: false,
            model: None,
            risk_tolerance: spin_core::model::RiskTolerance::Medium,
            tags: Vec::new(),
            measure: None,
        };
        let prompt = build_scout_prompt(Some(&formula), &["bug".to_string()], Some("be terse"), Some((&formula, 42.0)));
        assert!(prompt.contains("be terse"));
        assert!(prompt.contains("42.0%"));
    }
}
