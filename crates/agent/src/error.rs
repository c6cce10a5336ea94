use std::fmt;

#[derive(Debug)]
pub enum AgentError {
    NotConfigured(String),
    Spawn(String),
    Io(std::io::Error),
    InvalidOutput(String),
    Failed { message: String, signal: Option<i32> },
    Timeout,
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::NotConfigured(name) => write!(f, "{name} is not configured"),
            AgentError::Spawn(msg) => write!(f, "failed to spawn subprocess: {msg}"),
            AgentError::Io(e) => write!(f, "io error: {e}"),
            AgentError::InvalidOutput(msg) => write!(f, "invalid subprocess output: {msg}"),
            AgentError::Failed { message, signal: Some(sig) } => {
                write!(f, "subprocess failed (signal {sig}): {message}")
            }
            AgentError::Failed { message, signal: None } => write!(f, "subprocess failed: {message}"),
            AgentError::Timeout => write!(f, "subprocess timed out"),
        }
    }
}

impl std::error::Error for AgentError {}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e)
    }
}
