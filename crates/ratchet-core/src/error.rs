use thiserror::Error;

/// Core error type for the Ratchet engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Flow definition not found
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// Process not found
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// Task instance not found
    #[error("Task instance not found: {0}")]
    TaskInstanceNotFound(String),

    /// Configuration error (flow validation, task resolution)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A retry was requested for a task that may not be retried
    #[error("Retry not allowed: {0}")]
    RetryNotAllowed(String),

    /// A consumed event was malformed
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(String),

    /// Execution error
    #[error("Execution error: {0}")]
    Execution(String),
}
