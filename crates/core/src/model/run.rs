use crate::ids::{ProjectId, RunId, TicketId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    Scout,
    Worker,
    Qa,
    Merge,
}

impl RunType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scout => "scout",
            Self::Worker => "worker",
            Self::Qa => "qa",
            Self::Merge => "merge",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Free-form run outcome detail. Kept as an explicit struct (rather than a
/// bag of `serde_json::Value`) so the fields the spec names —
/// `branchName`, `prUrl`, `durationMs`, `failureReason`,
/// `completionOutcome` — are typed at the seam that matters most: what
/// the ticket runner and delivery logic read back out of a completed run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub branch_name: Option<String>,
    pub pr_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub failure_reason: Option<String>,
    pub completion_outcome: Option<String>,
    pub spindle_summary: Option<serde_json::Value>,
    pub artifact_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    pub ticket_id: Option<TicketId>,
    pub run_type: RunType,
    pub status: RunStatus,
    pub started_at_ms: i64,
    pub completed_at_ms: Option<i64>,
    pub error: Option<String>,
    pub metadata: RunMetadata,
}
