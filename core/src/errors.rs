/// Error types for the qcflow workflow core.
use crate::model::{Action, DrawingId, Stage};
use std::time::Duration;
use thiserror::Error;

/// Error type for document record store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Drawing {drawing_id} is no longer at version {expected}")]
    VersionMismatch { drawing_id: DrawingId, expected: i64 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error returned to callers of the workflow.
///
/// Every variant maps onto one machine-readable [`ErrorKind`]; callers decide
/// whether to retry (`Conflict`, `Timeout`) or give up (`Forbidden`).
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid transition: cannot {action} a drawing in stage {stage}")]
    InvalidTransition { stage: Stage, action: Action },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out after {0:?} waiting for drawing {1}")]
    Timeout(Duration, DrawingId),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Workflow is shutting down")]
    ShuttingDown,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

/// Result type for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl From<StoreError> for WorkflowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => WorkflowError::NotFound(what),
            StoreError::Duplicate(what) => WorkflowError::Conflict(what),
            mismatch @ StoreError::VersionMismatch { .. } => {
                WorkflowError::Conflict(mismatch.to_string())
            }
            other => WorkflowError::Store(other),
        }
    }
}

/// Machine-readable error kind exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidTransition,
    Conflict,
    Timeout,
    Unauthenticated,
    ShuttingDown,
    BadRequest,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::ShuttingDown => "shutting_down",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkflowError {
    /// Get the kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Forbidden(_) => ErrorKind::Forbidden,
            WorkflowError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            WorkflowError::Conflict(_) => ErrorKind::Conflict,
            WorkflowError::Timeout(..) => ErrorKind::Timeout,
            WorkflowError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            WorkflowError::ShuttingDown => ErrorKind::ShuttingDown,
            WorkflowError::BadRequest(_) => ErrorKind::BadRequest,
            WorkflowError::Store(_) => ErrorKind::Internal,
        }
    }
}
