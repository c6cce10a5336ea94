//! Coding-agent subprocess contract (spec.md §6): binary name + model
//! flag per configured backend, prompt over stdin, non-interactive and
//! skip-permissions flags when the backend supports them, env inherited
//! from the parent. Exit code 0 = success; timeout or SIGTERM records
//! the signal. Grounded on the teacher's
//! `bm_runner::executors::claude_code::spawn_exec`, generalized from a
//! hardcoded `claude` invocation to any configured backend.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::AgentError;

/// Per-backend invocation shape. `extra_args` carries anything backend
/// specific that doesn't fit the common flags (e.g. `--output-format
/// json`).
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub bin: String,
    pub model: Option<String>,
    pub model_flag: String,
    pub non_interactive_flag: Option<String>,
    pub skip_permissions_flag: Option<String>,
    pub extra_args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl AgentOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

fn build_command(cfg: &BackendConfig, repo_root: &Path) -> Command {
    let mut cmd = Command::new(&cfg.bin);
    cmd.current_dir(repo_root);
    if let Some(model) = &cfg.model {
        cmd.arg(&cfg.model_flag).arg(model);
    }
    if let Some(flag) = &cfg.non_interactive_flag {
        cmd.arg(flag);
    }
    if let Some(flag) = &cfg.skip_permissions_flag {
        cmd.arg(flag);
    }
    cmd.args(&cfg.extra_args);
    cmd.env("SPIN_AGENT_NONINTERACTIVE", "1");
    cmd
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Send SIGTERM (via the `kill` binary, matching the crate's
/// shell-out-only style), poll for up to `grace` for the child to exit
/// on its own, then fall back to `Child::kill` (SIGKILL).
fn terminate_gracefully(child: &mut std::process::Child, grace: Duration) {
    #[cfg(unix)]
    {
        let _ = Command::new("kill").arg("-TERM").arg(child.id().to_string()).status();
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(100)),
            _ => break,
        }
    }
    let _ = child.kill();
}

/// Drive one coding-agent invocation. `on_chunk` is called once per
/// stdout line as it streams — the hook the Spindle governor (C7) feeds
/// to compute rolling diff/output hashes without waiting for the
/// subprocess to exit. `should_abort` is polled on the same cadence as
/// the timeout deadline; when it returns `true` the child is sent
/// SIGTERM, given `abort_grace` to exit, then SIGKILLed.
#[allow(clippy::too_many_arguments)]
pub fn run_coding_agent(
    cfg: &BackendConfig,
    repo_root: &Path,
    prompt: &str,
    timeout: Duration,
    mut on_chunk: impl FnMut(&str),
    mut should_abort: impl FnMut() -> bool,
    abort_grace: Duration,
) -> Result<AgentOutput, AgentError> {
    if cfg.bin.trim().is_empty() {
        return Err(AgentError::NotConfigured("coding agent binary".to_string()));
    }

    let mut cmd = build_command(cfg, repo_root);
    cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| AgentError::Spawn(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(prompt.as_bytes())?;
    }

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let (tx, rx) = mpsc::channel::<String>();
    let stdout_reader = thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let mut reader = BufReader::new(stderr);
        use std::io::Read;
        let _ = reader.read_to_string(&mut buf);
        buf
    });

    let deadline = Instant::now() + timeout;
    let mut full_stdout = String::new();
    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                on_chunk(&line);
                full_stdout.push_str(&line);
                full_stdout.push('\n');
                if should_abort() {
                    terminate_gracefully(&mut child, abort_grace);
                    let _ = stdout_reader.join();
                    let stderr_text = stderr_reader.join().unwrap_or_default();
                    let _ = child.wait();
                    return Err(AgentError::Failed {
                        message: format!("aborted by governor; stderr: {stderr_text}"),
                        signal: None,
                    });
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = stdout_reader.join();
                    let stderr_text = stderr_reader.join().unwrap_or_default();
                    let _ = child.wait();
                    return Err(AgentError::Failed {
                        message: format!("{} timed out after {:?}; stderr: {}", cfg.bin, timeout, stderr_text),
                        signal: None,
                    });
                }
                if should_abort() {
                    terminate_gracefully(&mut child, abort_grace);
                    let _ = stdout_reader.join();
                    let stderr_text = stderr_reader.join().unwrap_or_default();
                    let _ = child.wait();
                    return Err(AgentError::Failed {
                        message: format!("aborted by governor; stderr: {stderr_text}"),
                        signal: None,
                    });
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    let _ = stdout_reader.join();
    let stderr_text = stderr_reader.join().unwrap_or_default();
    let status = child.wait()?;

    Ok(AgentOutput {
        stdout: full_stdout,
        stderr: stderr_text,
        exit_code: status.code(),
        signal: exit_signal(&status),
    })
}

/// Parse structured JSON from a completed agent transcript. Backends
/// that wrap their payload (e.g. under a `structured_output` key)
/// should unwrap it before calling this; kept separate so callers can
/// apply backend-specific unwrapping first.
pub fn parse_structured_output(stdout: &str) -> Result<serde_json::Value, AgentError> {
    serde_json::from_str(stdout).map_err(|e| AgentError::InvalidOutput(e.to_string()))
}

/// Short-timeout merge-resolver invocation: feeds the conflicted file
/// contents to the backend and expects `=== path ===` delimited file
/// bodies back on stdout with no surviving conflict markers.
pub fn run_merge_resolver(
    cfg: &BackendConfig,
    repo_root: &Path,
    prompt: &str,
    timeout: Duration,
) -> Result<std::collections::BTreeMap<String, String>, AgentError> {
    let output = run_coding_agent(cfg, repo_root, prompt, timeout, |_| {}, || false, Duration::from_secs(0))?;
    if !output.success() {
        return Err(AgentError::Failed {
            message: format!("merge resolver exited with {:?}: {}", output.exit_code, output.stderr),
            signal: output.signal,
        });
    }
    parse_merge_resolution(&output.stdout)
}

fn parse_merge_resolution(stdout: &str) -> Result<std::collections::BTreeMap<String, String>, AgentError> {
    const MARKERS: [&str; 3] = ["<<<<<<<", "=======", ">>>>>>>"];
    let mut files = std::collections::BTreeMap::new();
    let mut current_path: Option<String> = None;
    let mut current_body = String::new();

    for line in stdout.lines() {
        if let Some(path) = line.strip_prefix("=== ").and_then(|rest| rest.strip_suffix(" ===")) {
            if let Some(prev) = current_path.take() {
                files.insert(prev, std::mem::take(&mut current_body));
            }
            current_path = Some(path.trim().to_string());
            continue;
        }
        if current_path.is_some() {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    if let Some(prev) = current_path.take() {
        files.insert(prev, current_body);
    }

    if files.is_empty() {
        return Err(AgentError::InvalidOutput("no '=== path ===' sections found".to_string()));
    }
    for (path, body) in &files {
        if MARKERS.iter().any(|m| body.contains(m)) {
            return Err(AgentError::InvalidOutput(format!("conflict markers remain in {path}")));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delimited_merge_output() {
        let stdout = "=== src/lib.rs ===\nfn main() {}\n=== src/other.rs ===\nfn other() {}\n";
        let files = parse_merge_resolution(stdout).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["src/lib.rs"], "fn main() {}\n");
    }

    #[test]
    fn rejects_output_with_surviving_conflict_markers() {
        let stdout = "=== src/lib.rs ===\n<<<<<<< ours\nfoo\n=======\nbar\n>>>>>>> theirs\n";
        assert!(parse_merge_resolution(stdout).is_err());
    }

    #[test]
    fn rejects_output_with_no_sections() {
        assert!(parse_merge_resolution("just some text\n").is_err());
    }

    #[test]
    fn not_configured_when_bin_is_empty() {
        let cfg = BackendConfig {
            bin: String::new(),
            model: None,
            model_flag: "--model".to_string(),
            non_interactive_flag: None,
            skip_permissions_flag: None,
            extra_args: Vec::new(),
        };
        let result = run_coding_agent(&cfg, Path::new("."), "prompt", Duration::from_secs(1), |_| {}, || false, Duration::from_secs(0));
        assert!(matches!(result, Err(AgentError::NotConfigured(_))));
    }
}
