//! QA orchestrator (C6.1): runs a ticket's or milestone's configured
//! verification commands as one `Qa`-type run with per-command steps,
//! retrying the whole command list on failure up to `maxAttempts`, and
//! capturing truncated stdout/stderr artifacts per step.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use spin_config::solo_config::QaConfig;
use spin_core::ids::{ProjectId, RunId, TicketId};
use spin_core::model::{Run, RunMetadata, RunStatus, RunStep, RunStepStatus, RunType};
use spin_core::now_ms;

use crate::error::EngineError;

pub struct QaOutcome {
    pub run: Run,
    pub steps: Vec<RunStep>,
    pub success: bool,
}

fn write_artifact(artifacts_dir: &Path, run_id: &RunId, attempt: u32, ordinal: u32, stream: &str, bytes: &[u8]) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(artifacts_dir).map_err(|e| EngineError::Invalid(e.to_string()))?;
    let path = artifacts_dir.join(format!("{run_id}.a{attempt}.s{ordinal}.{stream}.log"));
    let mut file = std::fs::File::create(&path).map_err(|e| EngineError::Invalid(e.to_string()))?;
    file.write_all(bytes).map_err(|e| EngineError::Invalid(e.to_string()))?;
    Ok(path)
}

fn tail_str(bytes: &[u8], tail_bytes: u64) -> String {
    let text = String::from_utf8_lossy(bytes);
    let tail_bytes = tail_bytes as usize;
    if text.len() <= tail_bytes {
        text.into_owned()
    } else {
        text[text.len() - tail_bytes..].to_string()
    }
}

/// Run every configured command as one attempt, in order, stopping at
/// the first non-success step (remaining steps are recorded `skipped`).
/// Returns `(steps, attempt_succeeded)`.
fn run_attempt(
    cwd: &Path,
    config: &QaConfig,
    run_id: &RunId,
    attempt: u32,
    artifacts_dir: &Path,
    cancelled: &dyn Fn() -> bool,
) -> Result<(Vec<RunStep>, bool), EngineError> {
    let mut steps = Vec::new();
    let mut attempt_ok = true;
    let mut skip_rest = false;

    for (ordinal, cmd) in config.commands.iter().enumerate() {
        let ordinal = ordinal as u32;
        if cancelled() {
            steps.push(build_step(run_id, attempt, ordinal, cmd, RunStepStatus::Canceled, None, None, None, String::new()));
            skip_rest = true;
            attempt_ok = false;
            continue;
        }
        if skip_rest {
            steps.push(build_step(run_id, attempt, ordinal, cmd, RunStepStatus::Skipped, None, None, None, String::new()));
            continue;
        }

        let started_at = now_ms();
        let start = Instant::now();
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            steps.push(build_step(run_id, attempt, ordinal, cmd, RunStepStatus::Failed, Some(started_at), Some(now_ms()), None, "empty command".to_string()));
            attempt_ok = false;
            skip_rest = true;
            continue;
        };

        let output = Command::new(program).args(args).current_dir(cwd).output();
        let ended_at = now_ms();
        let duration_ms = start.elapsed().as_millis() as i64;

        match output {
            Ok(output) => {
                let stdout_bytes = output.stdout.len() as u64;
                let stderr_bytes = output.stderr.len() as u64;
                let truncated = stdout_bytes + stderr_bytes > config.max_log_bytes;
                let stdout_path = write_artifact(artifacts_dir, run_id, attempt, ordinal, "stdout", &output.stdout).ok();
                let stderr_path = write_artifact(artifacts_dir, run_id, attempt, ordinal, "stderr", &output.stderr).ok();
                let tail = tail_str(&output.stderr, config.tail_bytes);
                let status = if output.status.success() { RunStepStatus::Success } else { RunStepStatus::Failed };
                if status != RunStepStatus::Success {
                    attempt_ok = false;
                    skip_rest = true;
                }
                steps.push(RunStep {
                    run_id: run_id.clone(),
                    attempt,
                    ordinal,
                    name: cmd.clone(),
                    status,
                    cmd: cmd.clone(),
                    exit_code: output.status.code(),
                    signal: None,
                    started_at_ms: Some(started_at),
                    ended_at_ms: Some(ended_at),
                    duration_ms: Some(duration_ms),
                    stdout_path: stdout_path.map(|p| p.to_string_lossy().into_owned()),
                    stderr_path: stderr_path.map(|p| p.to_string_lossy().into_owned()),
                    stdout_bytes,
                    stderr_bytes,
                    truncated,
                    tail,
                });
            }
            Err(e) => {
                attempt_ok = false;
                skip_rest = true;
                steps.push(build_step(run_id, attempt, ordinal, cmd, RunStepStatus::Failed, Some(started_at), Some(ended_at), Some(duration_ms), e.to_string()));
            }
        }
    }

    Ok((steps, attempt_ok))
}

#[allow(clippy::too_many_arguments)]
fn build_step(
    run_id: &RunId,
    attempt: u32,
    ordinal: u32,
    cmd: &str,
    status: RunStepStatus,
    started_at_ms: Option<i64>,
    ended_at_ms: Option<i64>,
    duration_ms: Option<i64>,
    tail: String,
) -> RunStep {
    RunStep {
        run_id: run_id.clone(),
        attempt,
        ordinal,
        name: cmd.to_string(),
        status,
        cmd: cmd.to_string(),
        exit_code: None,
        signal: None,
        started_at_ms,
        ended_at_ms,
        duration_ms,
        stdout_path: None,
        stderr_path: None,
        stdout_bytes: 0,
        stderr_bytes: 0,
        truncated: false,
        tail,
    }
}

/// Run QA for a ticket (or milestone, when `ticket_id` is `None`).
/// `max_attempts_override`, when set, must be >= 1 and takes precedence
/// over `config.max_attempts`.
pub fn run_qa(
    cwd: &Path,
    project_id: &ProjectId,
    ticket_id: Option<&TicketId>,
    config: &QaConfig,
    artifacts_dir: &Path,
    max_attempts_override: Option<u32>,
    cancelled: &dyn Fn() -> bool,
) -> Result<QaOutcome, EngineError> {
    if let Some(n) = max_attempts_override {
        if n < 1 {
            return Err(EngineError::Invalid("maxAttemptsOverride must be >= 1".to_string()));
        }
    }
    let max_attempts = max_attempts_override.unwrap_or(config.max_attempts).max(1);
    let attempts_to_run = if config.retry_enabled { max_attempts } else { 1 };

    let run_id = RunId::generate();
    let started_at_ms = now_ms();
    let mut all_steps = Vec::new();
    let mut last_attempt_ok = false;

    for attempt in 1..=attempts_to_run {
        if cancelled() {
            break;
        }
        let (steps, ok) = run_attempt(cwd, config, &run_id, attempt, artifacts_dir, cancelled)?;
        last_attempt_ok = ok;
        all_steps.extend(steps);
        if ok {
            break;
        }
    }

    let status = if last_attempt_ok { RunStatus::Success } else { RunStatus::Failure };
    let run = Run {
        id: run_id,
        project_id: project_id.clone(),
        ticket_id: ticket_id.cloned(),
        run_type: RunType::Qa,
        status,
        started_at_ms,
        completed_at_ms: Some(now_ms()),
        error: if last_attempt_ok { None } else { Some("QA commands failed".to_string()) },
        metadata: RunMetadata::default(),
    };

    Ok(QaOutcome { run, steps: all_steps, success: last_attempt_ok })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(commands: Vec<&str>) -> QaConfig {
        QaConfig {
            commands: commands.into_iter().map(str::to_string).collect(),
            max_attempts: 2,
            retry_enabled: false,
            max_log_bytes: 1_000_000,
            tail_bytes: 4096,
        }
    }

    #[test]
    fn succeeds_when_every_command_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let project_id = ProjectId::generate();
        let config = sample_config(vec!["true"]);
        let outcome = run_qa(dir.path(), &project_id, None, &config, &dir.path().join("artifacts"), None, &|| false).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].status, RunStepStatus::Success);
    }

    #[test]
    fn skips_remaining_steps_after_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let project_id = ProjectId::generate();
        let config = sample_config(vec!["false", "true"]);
        let outcome = run_qa(dir.path(), &project_id, None, &config, &dir.path().join("artifacts"), None, &|| false).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.steps[0].status, RunStepStatus::Failed);
        assert_eq!(outcome.steps[1].status, RunStepStatus::Skipped);
    }

    #[test]
    fn retries_up_to_max_attempts_when_retry_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let project_id = ProjectId::generate();
        let mut config = sample_config(vec!["false"]);
        config.retry_enabled = true;
        config.max_attempts = 2;
        let outcome = run_qa(dir.path(), &project_id, None, &config, &dir.path().join("artifacts"), None, &|| false).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.steps.len(), 2);
    }

    #[test]
    fn rejects_zero_max_attempts_override() {
        let dir = tempfile::tempdir().unwrap();
        let project_id = ProjectId::generate();
        let config = sample_config(vec!["true"]);
        let result = run_qa(dir.path(), &project_id, None, &config, &dir.path().join("artifacts"), Some(0), &|| false);
        assert!(result.is_err());
    }
}
