//! Scout subprocess-oracle contract (spec.md §4.2/§6): a prompt-in,
//! JSON-proposals-out invocation of the same coding-agent backend used
//! for ticket execution. The prompt body (formula, categories,
//! min_confidence, recent completions, codebase-index extract,
//! guidelines, goal, learnings) is assembled by the engine crate (C2);
//! this module owns only the subprocess call and response parsing.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use spin_core::model::Proposal;

use crate::coding_agent::{run_coding_agent, BackendConfig};
use crate::error::AgentError;

#[derive(Deserialize)]
struct ScoutResponse {
    #[serde(default)]
    proposals: Vec<Proposal>,
}

/// Invoke the scout once and return its proposals (possibly empty). An
/// empty result is not an error — the caller (C8 step 9) retries with an
/// escalation prompt on an empty batch.
pub fn invoke_scout(
    cfg: &BackendConfig,
    repo_root: &Path,
    prompt: &str,
    timeout: Duration,
) -> Result<Vec<Proposal>, AgentError> {
    let output = run_coding_agent(cfg, repo_root, prompt, timeout, |_| {}, || false, Duration::from_secs(0))?;
    if !output.success() {
        return Err(AgentError::Failed {
            message: format!("scout exited with {:?}: {}", output.exit_code, output.stderr),
            signal: output.signal,
        });
    }
    parse_scout_output(&output.stdout)
}

fn parse_scout_output(stdout: &str) -> Result<Vec<Proposal>, AgentError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    // Accept either a bare `[...]` array or a `{"proposals": [...]}`
    // wrapper — scout backends differ on which they emit.
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| AgentError::InvalidOutput(e.to_string()));
    }
    let response: ScoutResponse = serde_json::from_str(trimmed).map_err(|e| AgentError::InvalidOutput(e.to_string()))?;
    Ok(response.proposals)
}

/// Build the "escalation" retry prompt appended after an empty scout
/// batch (§4.8 step 9): list unexplored modules, suggest category
/// rotation, require a minimum count of newly touched files.
pub fn escalation_prompt(base_prompt: &str, unexplored_modules: &[String], min_new_files: u32) -> String {
    let mut prompt = String::from(base_prompt);
    prompt.push_str("\n\n--- escalation ---\n");
    prompt.push_str("The previous scan returned no proposals. Widen scope:\n");
    if unexplored_modules.is_empty() {
        prompt.push_str("- consider modules outside your recent focus\n");
    } else {
        prompt.push_str("- unexplored modules:\n");
        for module in unexplored_modules {
            prompt.push_str(&format!("  - {module}\n"));
        }
    }
    prompt.push_str("- consider rotating to a different category\n");
    prompt.push_str(&format!("- touch at least {min_new_files} files not seen in recent completions\n"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_proposal_json() -> &'static str {
        r#"{"category":"bug","title":"t","description":"d","files":["a.rs"],"allowed_paths":["a.rs"],
           "confidence":80,"verification_commands":["cargo test"],"acceptance_criteria":["passes"],
           "rationale":"r","estimated_complexity":"low"}"#
    }

    #[test]
    fn parses_bare_array() {
        let stdout = format!("[{}]", sample_proposal_json());
        let proposals = parse_scout_output(&stdout).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].category, "bug");
    }

    #[test]
    fn parses_wrapped_object() {
        let stdout = format!(r#"{{"proposals": [{}]}}"#, sample_proposal_json());
        let proposals = parse_scout_output(&stdout).unwrap();
        assert_eq!(proposals.len(), 1);
    }

    #[test]
    fn empty_stdout_is_empty_batch_not_error() {
        let proposals = parse_scout_output("   ").unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn escalation_prompt_lists_modules() {
        let prompt = escalation_prompt("base", &["core::wave".to_string()], 15);
        assert!(prompt.contains("core::wave"));
        assert!(prompt.contains("15 files"));
    }
}
