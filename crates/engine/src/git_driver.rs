//! Worktree & git driver (C5): all main-repo index mutations serialize
//! through a single FIFO mutex; worktree-local operations run in
//! parallel. Git itself is invoked as a subprocess — this crate shells
//! out rather than linking `git2`, mirroring the teacher's text-protocol
//! style toward its own subprocess collaborators.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use spin_agent::coding_agent::{run_merge_resolver, BackendConfig};
use spin_agent::pr_cli::{create_pr, view_pr_url, PrCliConfig};

use crate::error::EngineError;

/// FIFO mutex guarding every operation that touches the main repo's
/// index. `std::sync::Mutex` queues waiters in arrival order on every
/// platform this targets, which is the FIFO guarantee §5 requires.
pub struct GitMutex(Mutex<()>);

impl Default for GitMutex {
    fn default() -> Self {
        Self(Mutex::new(()))
    }
}

impl GitMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
        let _guard = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }
}

fn run_git(repo_root: &Path, args: &[&str]) -> Result<String, EngineError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| EngineError::Git(format!("failed to spawn git {args:?}: {e}")))?;
    if !output.status.success() {
        return Err(EngineError::Git(format!(
            "git {args:?} exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn run_git_allow_failure(repo_root: &Path, args: &[&str]) -> (bool, String) {
    match Command::new("git").args(args).current_dir(repo_root).output() {
        Ok(output) => (output.status.success(), String::from_utf8_lossy(&output.stderr).into_owned()),
        Err(e) => (false, e.to_string()),
    }
}

/// Best-effort worktree removal; a missing path is not an error.
pub fn cleanup_worktree(repo_root: &Path, worktree_path: &Path) {
    if !worktree_path.exists() {
        return;
    }
    let _ = run_git_allow_failure(
        repo_root,
        &["worktree", "remove", "--force", &worktree_path.to_string_lossy()],
    );
}

pub fn create_feature_worktree(
    repo_root: &Path,
    base: &str,
    ticket_id: &str,
    appdir: &str,
    app_prefix: &str,
) -> Result<(String, PathBuf), EngineError> {
    let branch = format!("{app_prefix}/{ticket_id}");
    run_git(repo_root, &["fetch", "origin", base])?;
    let worktree_path = repo_root.join(appdir).join("worktrees").join(ticket_id);
    cleanup_worktree(repo_root, &worktree_path);
    run_git(
        repo_root,
        &[
            "worktree",
            "add",
            "-b",
            &branch,
            &worktree_path.to_string_lossy(),
            &format!("origin/{base}"),
        ],
    )?;
    Ok((branch, worktree_path))
}

/// Idempotent: removes any prior milestone worktree before creating the
/// new one.
pub fn create_milestone_branch(repo_root: &Path, base: &str, appdir: &str, app_prefix: &str, ts_ms: i64) -> Result<(String, PathBuf), EngineError> {
    let milestone_path = repo_root.join(appdir).join("worktrees").join("_milestone");
    cleanup_worktree(repo_root, &milestone_path);
    let branch = format!("{app_prefix}/milestone-{ts_ms}");
    run_git(repo_root, &["fetch", "origin", base])?;
    run_git(
        repo_root,
        &[
            "worktree",
            "add",
            "-b",
            &branch,
            &milestone_path.to_string_lossy(),
            &format!("origin/{base}"),
        ],
    )?;
    Ok((branch, milestone_path))
}

#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub success: bool,
    pub conflicted: Vec<String>,
    pub ai_resolved: bool,
}

fn conflicted_files(milestone_path: &Path) -> Vec<String> {
    run_git(milestone_path, &["diff", "--name-only", "--diff-filter=U"])
        .map(|out| out.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

fn build_conflict_prompt(milestone_path: &Path, conflicted: &[String]) -> Result<String, EngineError> {
    let mut prompt = String::from(
        "Resolve the following git merge conflicts. Reply with each file's full \
         resolved contents, no conflict markers, delimited exactly as shown.\n\n",
    );
    for path in conflicted {
        let full_path = milestone_path.join(path);
        let contents = std::fs::read_to_string(&full_path).map_err(|e| EngineError::Git(e.to_string()))?;
        prompt.push_str(&format!("=== {path} ===\n{contents}\n"));
    }
    Ok(prompt)
}

/// `--no-ff` merge; on conflict, rebase the ticket branch (checked out
/// at `ticket_worktree_path`) onto the milestone branch's HEAD and
/// retry; on a second conflict, attempt AI resolution via the
/// coding-agent backend.
pub fn merge_ticket_to_milestone(
    milestone_path: &Path,
    milestone_branch: &str,
    ticket_worktree_path: &Path,
    ticket_branch: &str,
    resolver_backend: Option<&BackendConfig>,
) -> Result<MergeOutcome, EngineError> {
    let (ok, _) = run_git_allow_failure(milestone_path, &["merge", "--no-ff", "--no-edit", ticket_branch]);
    if ok {
        return Ok(MergeOutcome { success: true, conflicted: Vec::new(), ai_resolved: false });
    }
    run_git(milestone_path, &["merge", "--abort"]).ok();

    let (rebase_ok, _) = run_git_allow_failure(ticket_worktree_path, &["rebase", milestone_branch]);
    if !rebase_ok {
        run_git_allow_failure(ticket_worktree_path, &["rebase", "--abort"]);
        return Ok(MergeOutcome { success: false, conflicted: Vec::new(), ai_resolved: false });
    }
    let (ok2, _) = run_git_allow_failure(milestone_path, &["merge", "--no-ff", "--no-edit", ticket_branch]);
    if ok2 {
        return Ok(MergeOutcome { success: true, conflicted: Vec::new(), ai_resolved: false });
    }

    let conflicted = conflicted_files(milestone_path);
    if conflicted.is_empty() {
        run_git(milestone_path, &["merge", "--abort"]).ok();
        return Ok(MergeOutcome { success: false, conflicted, ai_resolved: false });
    }

    let Some(backend) = resolver_backend else {
        run_git(milestone_path, &["merge", "--abort"]).ok();
        return Ok(MergeOutcome { success: false, conflicted, ai_resolved: false });
    };

    let prompt = build_conflict_prompt(milestone_path, &conflicted)?;
    let resolution = run_merge_resolver(backend, milestone_path, &prompt, Duration::from_secs(120));
    let files = match resolution {
        Ok(files) => files,
        Err(_) => {
            run_git(milestone_path, &["merge", "--abort"]).ok();
            return Ok(MergeOutcome { success: false, conflicted, ai_resolved: false });
        }
    };

    if conflicted.iter().any(|c| !files.contains_key(c)) {
        run_git(milestone_path, &["merge", "--abort"]).ok();
        return Ok(MergeOutcome { success: false, conflicted, ai_resolved: false });
    }

    for (path, contents) in &files {
        if let Err(e) = std::fs::write(milestone_path.join(path), contents) {
            run_git(milestone_path, &["merge", "--abort"]).ok();
            return Err(EngineError::Git(e.to_string()));
        }
    }
    run_git(milestone_path, &["add", "."])?;
    if let Err(e) = run_git(milestone_path, &["commit", "--no-edit"]) {
        run_git(milestone_path, &["merge", "--abort"]).ok();
        return Err(e);
    }

    Ok(MergeOutcome { success: true, conflicted, ai_resolved: true })
}

pub fn push_and_pr_milestone(
    milestone_path: &Path,
    branch: &str,
    title: &str,
    body: &str,
    pr_cli: &PrCliConfig,
) -> Result<Option<String>, EngineError> {
    run_git(milestone_path, &["push", "-u", "origin", branch])?;
    match create_pr(pr_cli, milestone_path, title, body, branch, true) {
        Ok(url) => Ok(Some(url)),
        Err(_) => match view_pr_url(pr_cli, milestone_path, branch) {
            Ok(url) => Ok(Some(url)),
            Err(_) => Ok(None),
        },
    }
}

/// Parse `git status --porcelain` output, handling `R ` renames (taking
/// the destination path) and quoted paths containing spaces.
pub fn parse_porcelain_status(output: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let rest = &line[3..];
        let path = if let Some(arrow) = rest.find(" -> ") {
            &rest[arrow + 4..]
        } else {
            rest
        };
        let unquoted = path.trim_matches('"');
        files.push(unquoted.to_string());
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_modified_entries() {
        let output = " M src/lib.rs\n?? new_file.rs\n";
        let files = parse_porcelain_status(output);
        assert_eq!(files, vec!["src/lib.rs", "new_file.rs"]);
    }

    #[test]
    fn parses_renames_taking_destination() {
        let output = "R  old_name.rs -> new_name.rs\n";
        let files = parse_porcelain_status(output);
        assert_eq!(files, vec!["new_name.rs"]);
    }

    #[test]
    fn parses_quoted_paths_with_spaces() {
        let output = " M \"src/has space.rs\"\n";
        let files = parse_porcelain_status(output);
        assert_eq!(files, vec!["src/has space.rs"]);
    }

    #[test]
    fn mutex_serializes_access() {
        let mutex = GitMutex::new();
        let result = mutex.with_lock(|| Ok::<_, EngineError>(42));
        assert_eq!(result.unwrap(), 42);
    }
}
