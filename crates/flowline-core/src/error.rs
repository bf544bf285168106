// Error types for the workflow engine

use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur across the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow not found (or belongs to another tenant)
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Execution not found (or belongs to another tenant)
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    /// Workflow is archived and cannot be mutated or executed
    #[error("Workflow is archived: {0}")]
    WorkflowArchived(String),

    /// Optimistic concurrency check failed
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u32, actual: u32 },

    /// Workflow failed structural/semantic validation
    #[error("Workflow validation failed")]
    WorkflowInvalid(Vec<ValidationError>),

    /// Pagination cursor does not match any element
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Resume preconditions not met
    #[error("Resume not allowed: {0}")]
    ResumeNotAllowed(String),

    /// Required execution inputs were not supplied
    #[error("Missing inputs: {0}")]
    MissingInputs(String),

    /// Job queue error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Create a workflow-not-found error
    pub fn workflow_not_found(id: impl Into<String>) -> Self {
        EngineError::WorkflowNotFound(id.into())
    }

    /// Create an execution-not-found error
    pub fn execution_not_found(id: impl Into<String>) -> Self {
        EngineError::ExecutionNotFound(id.into())
    }

    /// Create a resume-not-allowed error
    pub fn resume_not_allowed(msg: impl Into<String>) -> Self {
        EngineError::ResumeNotAllowed(msg.into())
    }

    /// Create a queue error
    pub fn queue(msg: impl Into<String>) -> Self {
        EngineError::Queue(msg.into())
    }
}
