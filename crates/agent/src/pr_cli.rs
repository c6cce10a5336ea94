//! Host PR-hosting CLI wrapper (spec.md §6): `<tool> pr create ...` /
//! `<tool> pr view ...`, both of which print a URL to stdout that the
//! driver parses rather than structured JSON.

use std::path::Path;
use std::process::Command;

use crate::error::AgentError;

#[derive(Clone, Debug)]
pub struct PrCliConfig {
    pub bin: String,
}

fn looks_like_url(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("http://") || line.starts_with("https://")
}

fn run(cfg: &PrCliConfig, repo_root: &Path, args: &[&str]) -> Result<String, AgentError> {
    if cfg.bin.trim().is_empty() {
        return Err(AgentError::NotConfigured("PR CLI".to_string()));
    }
    let output = Command::new(&cfg.bin)
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|e| AgentError::Spawn(e.to_string()))?;
    if !output.status.success() {
        return Err(AgentError::Failed {
            message: format!(
                "{} {:?} exited with {:?}: {}",
                cfg.bin,
                args,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            ),
            signal: None,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `<tool> pr create --title T --body B --head BRANCH [--draft]` →
/// first stdout line must be a URL.
pub fn create_pr(cfg: &PrCliConfig, repo_root: &Path, title: &str, body: &str, head: &str, draft: bool) -> Result<String, AgentError> {
    let mut args = vec!["pr", "create", "--title", title, "--body", body, "--head", head];
    if draft {
        args.push("--draft");
    }
    let stdout = run(cfg, repo_root, &args)?;
    let first_line = stdout.lines().next().unwrap_or("");
    if !looks_like_url(first_line) {
        return Err(AgentError::InvalidOutput(format!("pr create did not print a URL: {stdout:?}")));
    }
    Ok(first_line.trim().to_string())
}

/// `<tool> pr view BRANCH --json url --jq .url` → stdout is the URL.
pub fn view_pr_url(cfg: &PrCliConfig, repo_root: &Path, branch: &str) -> Result<String, AgentError> {
    let stdout = run(cfg, repo_root, &["pr", "view", branch, "--json", "url", "--jq", ".url"])?;
    let url = stdout.trim();
    if !looks_like_url(url) {
        return Err(AgentError::InvalidOutput(format!("pr view did not print a URL: {stdout:?}")));
    }
    Ok(url.to_string())
}

/// `<tool> pr view BRANCH --json reviewDecision --jq .reviewDecision` —
/// the admin-approval gate `auto-merge` checks before squashing. Empty
/// stdout (no reviews requested) is treated as the literal string
/// `"NONE"` rather than an error.
pub fn review_decision(cfg: &PrCliConfig, repo_root: &Path, branch: &str) -> Result<String, AgentError> {
    let stdout = run(cfg, repo_root, &["pr", "view", branch, "--json", "reviewDecision", "--jq", ".reviewDecision"])?;
    let decision = stdout.trim();
    if decision.is_empty() {
        Ok("NONE".to_string())
    } else {
        Ok(decision.to_string())
    }
}

/// `<tool> pr merge BRANCH --squash --delete-branch` — only called once
/// `review_decision` has returned `"APPROVED"`.
pub fn squash_merge(cfg: &PrCliConfig, repo_root: &Path, branch: &str) -> Result<(), AgentError> {
    run(cfg, repo_root, &["pr", "merge", branch, "--squash", "--delete-branch"])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_http_and_https() {
        assert!(looks_like_url("https://github.com/x/y/pull/1"));
        assert!(looks_like_url("http://example.com"));
        assert!(!looks_like_url("not a url"));
    }

    #[test]
    fn not_configured_when_bin_empty() {
        let cfg = PrCliConfig { bin: String::new() };
        let result = create_pr(&cfg, Path::new("."), "t", "b", "head", false);
        assert!(matches!(result, Err(AgentError::NotConfigured(_))));
    }

    #[test]
    fn review_decision_and_squash_merge_require_configured_bin() {
        let cfg = PrCliConfig { bin: String::new() };
        assert!(matches!(review_decision(&cfg, Path::new("."), "head"), Err(AgentError::NotConfigured(_))));
        assert!(matches!(squash_merge(&cfg, Path::new("."), "head"), Err(AgentError::NotConfigured(_))));
    }
}
