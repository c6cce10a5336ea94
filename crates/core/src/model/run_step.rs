use crate::ids::RunId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStepStatus {
    Queued,
    Running,
    Success,
    Failed,
    Skipped,
    Canceled,
}

impl RunStepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// One QA sub-attempt. Ordered by `(attempt, ordinal)`; artifact bytes
/// live on disk under `runs/<run_id>/artifacts/`, this struct only keeps
/// the path + a bounded tail for quick inspection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStep {
    pub run_id: RunId,
    pub attempt: u32,
    pub ordinal: u32,
    pub name: String,
    pub status: RunStepStatus,
    pub cmd: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
    pub duration_ms: Option<i64>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    pub truncated: bool,
    pub tail: String,
}
