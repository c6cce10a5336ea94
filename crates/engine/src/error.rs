use std::fmt;

/// Crate-local error type for every fallible C2/C5/C6/C7/C8/C9
/// operation, following the teacher's concrete-enum `StoreError`
/// pattern rather than `Box<dyn Error>` at internal seams.
#[derive(Debug)]
pub enum EngineError {
    Storage(spin_storage::StoreError),
    Config(spin_config::ConfigError),
    Agent(spin_agent::AgentError),
    Git(String),
    ScopeViolation(String),
    SpindleAbort(String),
    Cancelled,
    Invalid(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Storage(e) => write!(f, "{e}"),
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::Agent(e) => write!(f, "{e}"),
            EngineError::Git(msg) => write!(f, "git error: {msg}"),
            EngineError::ScopeViolation(msg) => write!(f, "scope violation: {msg}"),
            EngineError::SpindleAbort(msg) => write!(f, "spindle abort: {msg}"),
            EngineError::Cancelled => write!(f, "cancelled by SIGINT"),
            EngineError::Invalid(msg) => write!(f, "invalid: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<spin_storage::StoreError> for EngineError {
    fn from(e: spin_storage::StoreError) -> Self {
        EngineError::Storage(e)
    }
}

impl From<spin_config::ConfigError> for EngineError {
    fn from(e: spin_config::ConfigError) -> Self {
        EngineError::Config(e)
    }
}

impl From<spin_agent::AgentError> for EngineError {
    fn from(e: spin_agent::AgentError) -> Self {
        EngineError::Agent(e)
    }
}

/// What the outer scheduler does after a cycle: keep going, skip the
/// rest of the current cycle's work, or stop the whole session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    SkipRest,
    Terminate { reason: String },
}
