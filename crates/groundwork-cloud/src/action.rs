//! Change-set model: operations derived from a plan diff

use groundwork_core::ResourceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of change applied to one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Delete the old instance and create a new one
    Replace,
    /// Delete a resource
    Delete,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Create => write!(f, "create"),
            OpKind::Update => write!(f, "update"),
            OpKind::Replace => write!(f, "replace"),
            OpKind::Delete => write!(f, "delete"),
        }
    }
}

/// One planned operation against the remote system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Target descriptor id
    pub resource_id: String,

    /// Resource type tag
    pub resource_type: String,

    pub kind: OpKind,

    /// Human-readable explanation of why the operation was planned
    pub reason: String,

    /// Resource ids whose operations must complete before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub after: Vec<String>,

    /// Desired descriptor; `None` for deletes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<ResourceDescriptor>,
}

/// Ordered list of operations produced by the plan engine.
///
/// A resource whose desired attributes already match its last-applied
/// snapshot yields no operation at all, so a converged stack plans to an
/// empty change-set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Operations in a valid execution order
    pub operations: Vec<Operation>,

    /// Resources that were examined and need no change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn get(&self, resource_id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.resource_id == resource_id)
    }

    pub fn operations_of_kind(&self, kind: OpKind) -> Vec<&Operation> {
        self.operations.iter().filter(|op| op.kind == kind).collect()
    }

    pub fn summary(&self) -> ChangeSetSummary {
        ChangeSetSummary {
            create: self.operations_of_kind(OpKind::Create).len(),
            update: self.operations_of_kind(OpKind::Update).len(),
            replace: self.operations_of_kind(OpKind::Replace).len(),
            delete: self.operations_of_kind(OpKind::Delete).len(),
            unchanged: self.unchanged.len(),
        }
    }
}

/// Per-kind counts for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSetSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for ChangeSetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

/// Final disposition of one resource after an apply run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Created,
    Updated,
    Replaced,
    Deleted,
    Unchanged,
    /// Remote operation failed; manual intervention may be needed
    Failed,
    /// Never dispatched because a dependency failed or the run was cancelled
    NotStarted,
    /// Completed in this run, then undone after a later failure
    RolledBack,
    /// Completed in this run and could not be undone
    RollbackFailed,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Created => write!(f, "created"),
            Outcome::Updated => write!(f, "updated"),
            Outcome::Replaced => write!(f, "replaced"),
            Outcome::Deleted => write!(f, "deleted"),
            Outcome::Unchanged => write!(f, "unchanged"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::NotStarted => write!(f, "not-started"),
            Outcome::RolledBack => write!(f, "rolled-back"),
            Outcome::RollbackFailed => write!(f, "rollback-failed"),
        }
    }
}

/// Disposition and diagnostics for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub resource_id: String,
    pub outcome: Outcome,

    /// Provider error or rollback note, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of applying (or destroying) a stack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Resolved stack exports, present only for resources that reached
    /// `active`
    pub outputs: BTreeMap<String, serde_json::Value>,

    /// Per-resource dispositions, in operation order
    pub resources: Vec<ResourceOutcome>,

    /// Wall-clock execution time in milliseconds
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn is_success(&self) -> bool {
        !self.resources.iter().any(|r| {
            matches!(
                r.outcome,
                Outcome::Failed | Outcome::RollbackFailed | Outcome::NotStarted
            )
        })
    }

    pub fn outcome_of(&self, resource_id: &str) -> Option<Outcome> {
        self.resources
            .iter()
            .find(|r| r.resource_id == resource_id)
            .map(|r| r.outcome)
    }

    pub fn record(&mut self, resource_id: impl Into<String>, outcome: Outcome) {
        self.resources.push(ResourceOutcome {
            resource_id: resource_id.into(),
            outcome,
            message: None,
        });
    }

    pub fn record_with_message(
        &mut self,
        resource_id: impl Into<String>,
        outcome: Outcome,
        message: impl Into<String>,
    ) {
        self.resources.push(ResourceOutcome {
            resource_id: resource_id.into(),
            outcome,
            message: Some(message.into()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_by_kind() {
        let change_set = ChangeSet {
            operations: vec![
                Operation {
                    resource_id: "a".into(),
                    resource_type: "network".into(),
                    kind: OpKind::Create,
                    reason: "not present".into(),
                    after: vec![],
                    desired: None,
                },
                Operation {
                    resource_id: "b".into(),
                    resource_type: "service".into(),
                    kind: OpKind::Delete,
                    reason: "removed".into(),
                    after: vec![],
                    desired: None,
                },
            ],
            unchanged: vec!["c".into()],
        };

        let summary = change_set.summary();
        assert_eq!(summary.create, 1);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(
            summary.to_string(),
            "1 to create, 0 to update, 0 to replace, 1 to delete, 1 unchanged"
        );
    }

    #[test]
    fn apply_result_success_requires_no_failures() {
        let mut result = ApplyResult::default();
        result.record("a", Outcome::Created);
        assert!(result.is_success());

        result.record_with_message("b", Outcome::Failed, "boom");
        assert!(!result.is_success());
        assert_eq!(result.outcome_of("b"), Some(Outcome::Failed));
    }
}
