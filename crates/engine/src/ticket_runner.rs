//! Ticket runner (C6): drives one ticket through worktree setup, agent
//! subprocess, scope check, QA, delivery, and finalization. Each of the
//! ten numbered steps below corresponds to one stage of the runner's
//! control flow; cancellation is checked at the boundary between steps
//! and between Spindle checkpoints, never mid-subprocess-write.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use spin_agent::coding_agent::{run_coding_agent, BackendConfig};
use spin_agent::pr_cli::PrCliConfig;
use spin_config::solo_config::QaConfig;
use spin_core::ids::{ProjectId, RunId, TicketId};
use spin_core::model::{Event, EventType, Run, RunMetadata, RunStatus, RunType, Ticket, TicketStatus};
use spin_core::now_ms;
use spin_core::scope::analyze_violations;
use spin_storage::journal::Journal;
use spin_storage::Store;

use crate::error::EngineError;
use crate::git_driver::{cleanup_worktree, create_feature_worktree, parse_porcelain_status, GitMutex};
use crate::qa::run_qa;
use crate::spindle::{Escalated, Escalation, Spindle, SpindleThresholds};

const CHECKPOINT_EVERY_LINES: usize = 20;
const MAX_EXPANSIONS_PER_TICKET: usize = 10;
const SIGTERM_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Direct,
    Pr,
    AutoMerge,
}

pub struct TicketRunnerConfig<'a> {
    pub repo_root: &'a Path,
    pub appdir: &'a str,
    pub app_prefix: &'a str,
    pub base_branch: &'a str,
    pub allowed_remote: Option<&'a str>,
    pub backend: &'a BackendConfig,
    pub qa: &'a QaConfig,
    pub pr_cli: &'a PrCliConfig,
    pub delivery_mode: DeliveryMode,
    pub timeout: Duration,
    pub skip_qa: bool,
    pub force: bool,
    pub journal: Option<&'a Journal>,
}

fn journal_emit(journal: Option<&Journal>, run_id: &RunId, step: &str, event_type: EventType, payload: serde_json::Value) {
    let Some(journal) = journal else { return };
    if let Err(e) = journal.append(&Event::new(run_id, step, event_type, payload)) {
        tracing::warn!(error = %e, "failed to append journal event");
    }
}

pub struct TicketRunResult {
    pub final_status: TicketStatus,
    pub run: Run,
}

fn current_remote_url(repo_root: &Path) -> Option<String> {
    let output = Command::new("git").args(["remote", "get-url", "origin"]).current_dir(repo_root).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn index_is_dirty(repo_root: &Path) -> bool {
    Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(repo_root)
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(true)
}

/// `findConflictingTickets`: two tickets conflict when their allowed-path
/// globs share a non-wildcard directory prefix. A cheap heuristic, not a
/// true glob-intersection test, but sufficient to block two in-progress
/// tickets racing on the same subtree.
fn glob_prefix(pattern: &str) -> &str {
    let cut = pattern.find('*').unwrap_or(pattern.len());
    let prefix = &pattern[..cut];
    prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn paths_overlap(a: &[String], b: &[String]) -> bool {
    if a.is_empty() || b.is_empty() {
        return true;
    }
    a.iter().any(|pa| {
        let pa_prefix = glob_prefix(pa);
        b.iter().any(|pb| {
            let pb_prefix = glob_prefix(pb);
            pa_prefix.starts_with(pb_prefix) || pb_prefix.starts_with(pa_prefix)
        })
    })
}

pub fn find_conflicting_tickets<'a>(ticket: &Ticket, in_progress: &'a [Ticket]) -> Vec<&'a Ticket> {
    in_progress
        .iter()
        .filter(|other| other.id != ticket.id && paths_overlap(&ticket.allowed_paths, &other.allowed_paths))
        .collect()
}

/// Auto-detected setup command from a lockfile present at the worktree
/// root. Checked in a fixed priority order; the first match wins.
pub fn detect_setup_command(worktree_path: &Path) -> Option<String> {
    const LOCKFILES: &[(&str, &str)] = &[
        ("pnpm-lock.yaml", "pnpm install --frozen-lockfile"),
        ("package-lock.json", "npm ci"),
        ("yarn.lock", "yarn install --frozen-lockfile"),
        ("requirements.txt", "pip install -r requirements.txt"),
        ("go.sum", "go mod download"),
        ("Cargo.lock", "cargo fetch"),
    ];
    LOCKFILES
        .iter()
        .find(|(file, _)| worktree_path.join(file).exists())
        .map(|(_, cmd)| cmd.to_string())
}

fn run_setup_command(worktree_path: &Path, cmd: &str) -> Result<(), EngineError> {
    let parts: Vec<&str> = cmd.split_whitespace().collect();
    let Some((program, args)) = parts.split_first() else { return Ok(()) };
    let status = Command::new(program)
        .args(args)
        .current_dir(worktree_path)
        .status()
        .map_err(|e| EngineError::Invalid(format!("setup command {cmd} failed to spawn: {e}")))?;
    if !status.success() {
        return Err(EngineError::Invalid(format!("setup command {cmd} exited with {:?}", status.code())));
    }
    Ok(())
}

fn render_ticket_prompt(ticket: &Ticket, portfolio: Option<&str>, learnings: Option<&str>, goal: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!("# {}\n\n{}\n\n", ticket.title, ticket.description));
    prompt.push_str("## Allowed paths\n");
    for path in &ticket.allowed_paths {
        prompt.push_str(&format!("- {path}\n"));
    }
    if !ticket.verification_commands.is_empty() {
        prompt.push_str("\n## Verification commands\n");
        for cmd in &ticket.verification_commands {
            prompt.push_str(&format!("- {cmd}\n"));
        }
    }
    if let Some(portfolio) = portfolio {
        prompt.push_str(&format!("\n<project-portfolio>\n{portfolio}\n</project-portfolio>\n"));
    }
    if let Some(learnings) = learnings {
        prompt.push_str(&format!("\n<project-learnings>\n{learnings}\n</project-learnings>\n"));
    }
    if let Some(goal) = goal {
        prompt.push_str(&format!("\n<goal>\n{goal}\n</goal>\n"));
    }
    prompt
}

fn checkpoint_diff(worktree_path: &Path) -> (String, Vec<String>) {
    let diff = Command::new("git")
        .args(["diff"])
        .current_dir(worktree_path)
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default();
    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(worktree_path)
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default();
    (diff, parse_porcelain_status(&status))
}

/// Entry point for one ticket run. `cancelled` is polled at every step
/// boundary and between Spindle checkpoints; when it returns `true` the
/// ticket is returned to `ready`, the worktree cleaned up, and the
/// result carries `TicketStatus::Ready` with a cancellation error.
#[allow(clippy::too_many_arguments)]
pub fn run_ticket(
    store: &Store,
    project_id: &ProjectId,
    mut ticket: Ticket,
    cfg: &TicketRunnerConfig,
    git_mutex: &GitMutex,
    artifacts_dir: &Path,
    mut on_progress: impl FnMut(&str),
    cancelled: impl Fn() -> bool,
) -> Result<TicketRunResult, EngineError> {
    // Step 1: preflight.
    let worktree_path = cfg.repo_root.join(cfg.appdir).join("worktrees").join(ticket.id.as_str());
    if worktree_path.exists() {
        // stale from a prior crashed run; step 2 handles cleanup below.
    } else if index_is_dirty(cfg.repo_root) {
        return Err(EngineError::Invalid("git index is dirty and no worktree isolation is possible".to_string()));
    }
    if matches!(cfg.delivery_mode, DeliveryMode::Pr | DeliveryMode::AutoMerge) {
        if let (Some(allowed), Some(actual)) = (cfg.allowed_remote, current_remote_url(cfg.repo_root)) {
            if allowed != actual {
                return Err(EngineError::Invalid(format!("remote {actual} does not match allowedRemote {allowed}")));
            }
        }
    }

    // Step 2: status transition.
    let prior_status = ticket.status;
    if prior_status == TicketStatus::InProgress {
        on_progress("found a crashed in-progress run; cleaning up its worktree");
        cleanup_worktree(cfg.repo_root, &worktree_path);
    }
    store.update_ticket_status(&ticket.id, TicketStatus::InProgress, ticket.revision)?;
    ticket.status = TicketStatus::InProgress;
    ticket.revision += 1;

    // Step 3: conflict check.
    let in_progress = store.list_tickets_by_status(project_id, TicketStatus::InProgress)?;
    let conflicts = find_conflicting_tickets(&ticket, &in_progress);
    if !conflicts.is_empty() && !cfg.force {
        store.update_ticket_status(&ticket.id, TicketStatus::Ready, ticket.revision)?;
        return Err(EngineError::Invalid(format!(
            "ticket conflicts with {} in-progress ticket(s)",
            conflicts.len()
        )));
    }

    let run_id = RunId::generate();
    let started_at_ms = now_ms();
    let ticket_step = format!("ticket:{}", ticket.id.as_str());
    journal_emit(
        cfg.journal,
        &run_id,
        &ticket_step,
        EventType::TicketAssigned,
        serde_json::json!({"ticket_id": ticket.id.as_str(), "title": ticket.title}),
    );

    let run_result = (|| -> Result<(TicketStatus, RunMetadata), EngineError> {
        if cancelled() {
            return Err(EngineError::Cancelled);
        }

        // Step 4: worktree setup.
        on_progress("creating feature worktree");
        let (branch, worktree_path) = git_mutex.with_lock(|| {
            create_feature_worktree(cfg.repo_root, cfg.base_branch, ticket.id.as_str(), cfg.appdir, cfg.app_prefix)
        })?;
        if let Some(setup_cmd) = detect_setup_command(&worktree_path) {
            on_progress(&format!("running setup command: {setup_cmd}"));
            run_setup_command(&worktree_path, &setup_cmd)?;
        }

        if cancelled() {
            cleanup_worktree(cfg.repo_root, &worktree_path);
            return Err(EngineError::Cancelled);
        }

        // Step 5: agent invocation, fed through the Spindle governor.
        on_progress("invoking coding agent");
        let prompt = render_ticket_prompt(&ticket, None, None, None);
        let mut spindle = Spindle::new(SpindleThresholds::default());
        let mut escalation = Escalation::default();
        let mut line_count = 0usize;
        let abort_reason: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);

        let agent_result = run_coding_agent(
            cfg.backend,
            &worktree_path,
            &prompt,
            cfg.timeout,
            |_line| {
                line_count += 1;
                if line_count % CHECKPOINT_EVERY_LINES != 0 {
                    return;
                }
                let (diff, touched) = checkpoint_diff(&worktree_path);
                if let Some(verdict) = spindle.feed(&diff, &diff, &touched) {
                    match escalation.observe(verdict.trigger) {
                        Escalated::Warn => {
                            on_progress(&format!("spindle WARN: {:?}", verdict.trigger));
                        }
                        Escalated::Abort => {
                            *abort_reason.borrow_mut() = Some(format!("{:?}", verdict.trigger));
                        }
                    }
                }
            },
            || abort_reason.borrow().is_some(),
            SIGTERM_GRACE,
        );
        let abort_reason = abort_reason.into_inner();

        if let Some(trigger) = abort_reason {
            cleanup_worktree(cfg.repo_root, &worktree_path);
            return Ok((
                TicketStatus::Blocked,
                RunMetadata {
                    branch_name: Some(branch),
                    failure_reason: Some("spindle_abort".to_string()),
                    spindle_summary: Some(serde_json::json!({"trigger": trigger})),
                    ..Default::default()
                },
            ));
        }

        let agent_output = match agent_result {
            Ok(output) if output.success() => output,
            Ok(output) => {
                cleanup_worktree(cfg.repo_root, &worktree_path);
                return Ok((
                    TicketStatus::Blocked,
                    RunMetadata {
                        branch_name: Some(branch),
                        failure_reason: Some(format!("agent exited with {:?}", output.exit_code)),
                        ..Default::default()
                    },
                ));
            }
            Err(e) => {
                cleanup_worktree(cfg.repo_root, &worktree_path);
                return Ok((
                    TicketStatus::Blocked,
                    RunMetadata {
                        branch_name: Some(branch),
                        failure_reason: Some(e.to_string()),
                        ..Default::default()
                    },
                ));
            }
        };
        let _ = agent_output;

        if cancelled() {
            cleanup_worktree(cfg.repo_root, &worktree_path);
            return Err(EngineError::Cancelled);
        }

        // Step 6: scope check.
        on_progress("checking scope");
        let status_output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(&worktree_path)
            .output()
            .map_err(|e| EngineError::Git(e.to_string()))?;
        let changed_files = parse_porcelain_status(&String::from_utf8_lossy(&status_output.stdout));
        let decision = analyze_violations(&changed_files, &ticket.allowed_paths, &ticket.forbidden_paths, MAX_EXPANSIONS_PER_TICKET);
        if decision.hard_stop {
            cleanup_worktree(cfg.repo_root, &worktree_path);
            return Ok((
                TicketStatus::Blocked,
                RunMetadata {
                    branch_name: Some(branch),
                    failure_reason: Some(format!("scope violation: {:?}", decision.violations)),
                    ..Default::default()
                },
            ));
        }
        if !decision.expandable.is_empty() {
            let mut expanded = ticket.allowed_paths.clone();
            expanded.extend(decision.expandable.iter().cloned());
            store.update_ticket_scope(&ticket.id, &expanded)?;
            ticket.allowed_paths = expanded;
        }

        // Step 7: QA.
        let qa_outcome = if !cfg.skip_qa && !cfg.qa.commands.is_empty() {
            on_progress("running QA");
            journal_emit(cfg.journal, &run_id, &ticket_step, EventType::QaStarted, serde_json::json!({}));
            Some(run_qa(&worktree_path, project_id, Some(&ticket.id), cfg.qa, artifacts_dir, None, &cancelled)?)
        } else {
            None
        };
        if let Some(outcome) = &qa_outcome {
            store.create_run(&outcome.run)?;
            for step in &outcome.steps {
                store.append_run_step(step)?;
            }
            journal_emit(
                cfg.journal,
                &run_id,
                &ticket_step,
                if outcome.success { EventType::QaPassed } else { EventType::QaFailed },
                serde_json::json!({"steps": outcome.steps.len()}),
            );
            if !outcome.success {
                cleanup_worktree(cfg.repo_root, &worktree_path);
                return Ok((
                    TicketStatus::Blocked,
                    RunMetadata {
                        branch_name: Some(branch),
                        failure_reason: Some("QA failed".to_string()),
                        ..Default::default()
                    },
                ));
            }
        }

        // Step 8: delivery.
        on_progress("delivering");
        let (final_status, metadata) = match cfg.delivery_mode {
            DeliveryMode::Direct => {
                git_mutex.with_lock(|| {
                    Command::new("git")
                        .args(["push", "origin", &format!("{branch}:{}", cfg.base_branch)])
                        .current_dir(&worktree_path)
                        .status()
                        .map_err(|e| EngineError::Git(e.to_string()))
                        .and_then(|s| if s.success() { Ok(()) } else { Err(EngineError::Git("direct push failed".to_string())) })
                })?;
                (TicketStatus::Done, RunMetadata { branch_name: Some(branch), ..Default::default() })
            }
            DeliveryMode::Pr => {
                Command::new("git")
                    .args(["push", "-u", "origin", &branch])
                    .current_dir(&worktree_path)
                    .status()
                    .map_err(|e| EngineError::Git(e.to_string()))?;
                let pr_url = spin_agent::pr_cli::create_pr(cfg.pr_cli, &worktree_path, &ticket.title, &ticket.description, &branch, true).ok();
                (
                    TicketStatus::InReview,
                    RunMetadata {
                        branch_name: Some(branch),
                        pr_url,
                        ..Default::default()
                    },
                )
            }
            DeliveryMode::AutoMerge => {
                Command::new("git")
                    .args(["push", "-u", "origin", &branch])
                    .current_dir(&worktree_path)
                    .status()
                    .map_err(|e| EngineError::Git(e.to_string()))?;
                let pr_url = spin_agent::pr_cli::create_pr(cfg.pr_cli, &worktree_path, &ticket.title, &ticket.description, &branch, true).ok();
                let approved = pr_url.is_some()
                    && spin_agent::pr_cli::review_decision(cfg.pr_cli, &worktree_path, &branch)
                        .map(|decision| decision == "APPROVED")
                        .unwrap_or(false);
                if approved && spin_agent::pr_cli::squash_merge(cfg.pr_cli, &worktree_path, &branch).is_ok() {
                    (
                        TicketStatus::Done,
                        RunMetadata {
                            branch_name: Some(branch),
                            pr_url,
                            ..Default::default()
                        },
                    )
                } else {
                    (
                        TicketStatus::InReview,
                        RunMetadata {
                            branch_name: Some(branch),
                            pr_url,
                            ..Default::default()
                        },
                    )
                }
            }
        };

        cleanup_worktree(cfg.repo_root, &worktree_path);
        Ok((final_status, metadata))
    })();

    // Step 9 / 10: finalize or handle SIGINT.
    match run_result {
        Ok((final_status, metadata)) => {
            store.update_ticket_status(&ticket.id, final_status, ticket.revision)?;
            let mut metadata = metadata;
            metadata.duration_ms = Some(now_ms() - started_at_ms);
            let run = Run {
                id: run_id,
                project_id: project_id.clone(),
                ticket_id: Some(ticket.id.clone()),
                run_type: RunType::Worker,
                status: if final_status == TicketStatus::Blocked { RunStatus::Failure } else { RunStatus::Success },
                started_at_ms,
                completed_at_ms: Some(now_ms()),
                error: metadata.failure_reason.clone(),
                metadata,
            };
            store.create_run(&run)?;
            journal_emit(
                cfg.journal,
                &run_id,
                &ticket_step,
                if final_status == TicketStatus::Blocked { EventType::TicketFailed } else { EventType::TicketCompleted },
                serde_json::json!({"final_status": final_status.as_str()}),
            );
            Ok(TicketRunResult { final_status, run })
        }
        Err(EngineError::Cancelled) => {
            store.update_ticket_status(&ticket.id, TicketStatus::Ready, ticket.revision)?;
            let run = Run {
                id: run_id,
                project_id: project_id.clone(),
                ticket_id: Some(ticket.id.clone()),
                run_type: RunType::Worker,
                status: RunStatus::Failure,
                started_at_ms,
                completed_at_ms: Some(now_ms()),
                error: Some("Interrupted by user (SIGINT)".to_string()),
                metadata: RunMetadata::default(),
            };
            store.create_run(&run)?;
            Ok(TicketRunResult { final_status: TicketStatus::Ready, run })
        }
        Err(e) => {
            store.update_ticket_status(&ticket.id, TicketStatus::Blocked, ticket.revision)?;
            let run = Run {
                id: run_id,
                project_id: project_id.clone(),
                ticket_id: Some(ticket.id.clone()),
                run_type: RunType::Worker,
                status: RunStatus::Failure,
                started_at_ms,
                completed_at_ms: Some(now_ms()),
                error: Some(e.to_string()),
                metadata: RunMetadata::default(),
            };
            store.create_run(&run)?;
            journal_emit(cfg.journal, &run_id, &ticket_step, EventType::TicketFailed, serde_json::json!({"error": e.to_string()}));
            Ok(TicketRunResult { final_status: TicketStatus::Blocked, run })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample_ticket(paths: &[&str]) -> Ticket {
        Ticket {
            id: TicketId::generate(),
            project_id: ProjectId::generate(),
            title: "demo".to_string(),
            description: "desc".to_string(),
            status: TicketStatus::InProgress,
            priority: 0,
            category: "bug".to_string(),
            allowed_paths: paths.iter().map(|p| p.to_string()).collect(),
            forbidden_paths: Vec::new(),
            verification_commands: Vec::new(),
            max_retries: 0,
            retry_count: 0,
            metadata: Map::new(),
            revision: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn detects_conflicting_tickets_by_path_prefix_overlap() {
        let ticket = sample_ticket(&["src/core/**"]);
        let other = sample_ticket(&["src/core/lib.rs"]);
        let conflicts = find_conflicting_tickets(&ticket, std::slice::from_ref(&other));
        assert_eq!(conflicts.len(), 1);
    }

    #[test]
    fn non_overlapping_paths_do_not_conflict() {
        let ticket = sample_ticket(&["src/core/**"]);
        let other = sample_ticket(&["docs/**"]);
        let conflicts = find_conflicting_tickets(&ticket, std::slice::from_ref(&other));
        assert!(conflicts.is_empty());
    }

    #[test]
    fn detects_setup_command_from_lockfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(detect_setup_command(dir.path()), Some("npm ci".to_string()));
    }

    #[test]
    fn no_setup_command_when_no_lockfile_present() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_setup_command(dir.path()), None);
    }
}
