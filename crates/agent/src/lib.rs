#![forbid(unsafe_code)]

//! External collaborators, interface only: scout subprocess invocation,
//! coding-agent subprocess invocation (+ Spindle streaming feed),
//! PR-hosting CLI wrapper, and the codebase index (C11). Grounded on
//! the teacher's `bm_runner::executors` subprocess-driving pattern,
//! generalized from a hardcoded Claude Code invocation to any
//! configured backend.

mod bin_detect;
pub mod coding_agent;
pub mod error;
pub mod index;
pub mod pr_cli;
pub mod scout;

pub use bin_detect::{can_resolve_command, resolve_optional_bin};
pub use coding_agent::{run_coding_agent, run_merge_resolver, AgentOutput, BackendConfig};
pub use error::AgentError;
pub use index::{CodebaseIndex, FsCodebaseIndex, Hotspot, IndexError, ModuleSummary};
pub use pr_cli::{create_pr, view_pr_url, PrCliConfig};
pub use scout::{escalation_prompt, invoke_scout};
