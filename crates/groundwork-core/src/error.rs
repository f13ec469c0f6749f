//! Graph construction error types

use thiserror::Error;

/// Errors raised while assembling a stack or its dependency graph
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Duplicate resource id: {0}")]
    DuplicateResource(String),

    #[error("Resource '{resource}' attribute '{attribute}' references unknown resource '{target}'")]
    DanglingReference {
        resource: String,
        attribute: String,
        target: String,
    },

    #[error("Resource '{resource}' depends on unknown resource '{dependency}'")]
    UnknownDependency { resource: String, dependency: String },

    #[error("Export '{export}' references unknown resource '{target}'")]
    UnknownExport { export: String, target: String },

    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
}

pub type Result<T> = std::result::Result<T, GraphError>;
