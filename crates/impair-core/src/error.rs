use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImpairError {
    #[error("not initialized: run 'impair init'")]
    NotInitialized,

    #[error("router not found: {0}")]
    RouterNotFound(String),

    #[error("router already exists: {0}")]
    RouterExists(String),

    #[error("sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("sequence already exists: {0}")]
    SequenceExists(String),

    #[error("invalid identifier '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidId(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("a run is already in progress (sequence '{0}')")]
    AlreadyRunning(String),

    #[error("node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("authentication rejected by {0}")]
    AuthRejected(String),

    #[error("command rejected: {0}")]
    CommandRejected(String),

    #[error("adapter timed out after {}s", .0.as_secs())]
    AdapterTimeout(Duration),

    #[error("adapter failed: {0}")]
    AdapterFault(String),

    #[error("history ledger error: {0}")]
    Ledger(String),

    #[error("scheduler control loop is not running")]
    ControlLoopStopped,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ImpairError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ImpairError>;
