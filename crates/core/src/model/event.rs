use crate::ids::RunId;
use serde::{Deserialize, Serialize};

/// The enumerated event types from spec.md §4.10. One `Event` is one
/// NDJSON line (`spin_storage::journal`); `step` names the pipeline stage
/// that emitted it ("scout", "pipeline", "wave", "ticket:<id>", ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SessionStart,
    AdvanceCalled,
    AdvanceReturned,
    ScoutOutput,
    ProposalsFiltered,
    TicketsCreated,
    TicketAssigned,
    PlanSubmitted,
    PlanApproved,
    PlanRejected,
    ToolCallAttempted,
    ScopeAllowed,
    ScopeBlocked,
    TicketResult,
    QaStarted,
    QaCommandResult,
    QaPassed,
    QaFailed,
    PrCreated,
    TicketCompleted,
    TicketFailed,
    BudgetWarning,
    BudgetExhausted,
    SpindleWarning,
    SpindleAbort,
    HintConsumed,
    UserOverride,
    SessionEnd,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStart => "SESSION_START",
            Self::AdvanceCalled => "ADVANCE_CALLED",
            Self::AdvanceReturned => "ADVANCE_RETURNED",
            Self::ScoutOutput => "SCOUT_OUTPUT",
            Self::ProposalsFiltered => "PROPOSALS_FILTERED",
            Self::TicketsCreated => "TICKETS_CREATED",
            Self::TicketAssigned => "TICKET_ASSIGNED",
            Self::PlanSubmitted => "PLAN_SUBMITTED",
            Self::PlanApproved => "PLAN_APPROVED",
            Self::PlanRejected => "PLAN_REJECTED",
            Self::ToolCallAttempted => "TOOL_CALL_ATTEMPTED",
            Self::ScopeAllowed => "SCOPE_ALLOWED",
            Self::ScopeBlocked => "SCOPE_BLOCKED",
            Self::TicketResult => "TICKET_RESULT",
            Self::QaStarted => "QA_STARTED",
            Self::QaCommandResult => "QA_COMMAND_RESULT",
            Self::QaPassed => "QA_PASSED",
            Self::QaFailed => "QA_FAILED",
            Self::PrCreated => "PR_CREATED",
            Self::TicketCompleted => "TICKET_COMPLETED",
            Self::TicketFailed => "TICKET_FAILED",
            Self::BudgetWarning => "BUDGET_WARNING",
            Self::BudgetExhausted => "BUDGET_EXHAUSTED",
            Self::SpindleWarning => "SPINDLE_WARNING",
            Self::SpindleAbort => "SPINDLE_ABORT",
            Self::HintConsumed => "HINT_CONSUMED",
            Self::UserOverride => "USER_OVERRIDE",
            Self::SessionEnd => "SESSION_END",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub ts: i64,
    pub step: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(run_id: &RunId, step: impl Into<String>, event_type: EventType, payload: serde_json::Value) -> Self {
        let _ = run_id; // the run id scopes *which* journal file this is appended to, not the line itself
        Self {
            ts: crate::now_ms(),
            step: step.into(),
            event_type,
            payload,
        }
    }
}
