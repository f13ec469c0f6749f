//! Orchestrator error types

use thiserror::Error;

/// Errors raised while planning or applying a stack
#[derive(Error, Debug)]
pub enum CloudError {
    /// Graph construction failed; reported before any remote mutation
    #[error(transparent)]
    Graph(#[from] groundwork_core::GraphError),

    /// A reference was not resolvable when its consumer was dispatched.
    /// This is a scheduling bug, not a remote failure.
    #[error(
        "Resource '{resource}' needs output '{output}' of '{target}', which is not available yet"
    )]
    UnresolvedReference {
        resource: String,
        target: String,
        output: String,
    },

    #[error("Remote operation failed for '{resource}': {message}")]
    RemoteOperation { resource: String, message: String },

    #[error("Operation for '{resource}' timed out after {seconds}s")]
    OperationTimeout { resource: String, seconds: u64 },

    #[error("Rollback failed for '{resource}': {message}")]
    RollbackFailure { resource: String, message: String },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Worker task failed: {0}")]
    TaskError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
