use crate::ids::{ProjectId, TicketId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Backlog,
    Ready,
    Leased,
    InProgress,
    InReview,
    Done,
    Blocked,
    Aborted,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Ready => "ready",
            Self::Leased => "leased",
            Self::InProgress => "in_progress",
            Self::InReview => "in_review",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "backlog" => Self::Backlog,
            "ready" => Self::Ready,
            "leased" => Self::Leased,
            "in_progress" => Self::InProgress,
            "in_review" => Self::InReview,
            "done" => Self::Done,
            "blocked" => Self::Blocked,
            "aborted" => Self::Aborted,
            _ => return None,
        })
    }
}

/// Unit of work. `allowedPaths`/`forbiddenPaths` are glob lists consumed
/// by `spin_core::scope`. `metadata` is a free-form JSON object carrying
/// `targetSymbols`, `scoutConfidence`, `estimatedComplexity`, and similar
/// scout-sourced extras that don't warrant first-class columns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: i64,
    pub category: String,
    pub allowed_paths: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub verification_commands: Vec<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub metadata: Map<String, Value>,
    pub revision: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Ticket {
    /// `true` once this ticket has reached a state from which it will
    /// never be picked up by the scheduler again without an explicit
    /// reset (done/aborted are terminal; blocked can still be healed).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TicketStatus::Done | TicketStatus::Aborted)
    }
}
