//! Caller-facing orchestration API
//!
//! Explicit [`Stack`] values go in; there is no ambient "current stack".
//! `plan` is read-only; `apply` and `destroy` take the stack's state lock
//! for the duration of the run.

use crate::action::{ApplyResult, ChangeSet};
use crate::error::Result;
use crate::executor::{ExecuteOptions, ExecutionEngine};
use crate::plan::{PlanEngine, UpdatePolicy};
use crate::provider::ControlPlane;
use crate::state::{ResourceStatus, StackState, StateManager};
use groundwork_core::{DependencyGraph, Stack};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Orchestrates plan, apply and destroy for stacks against one control plane
pub struct Orchestrator {
    control: Arc<dyn ControlPlane>,
    state_manager: Arc<StateManager>,
    policy: UpdatePolicy,
    options: ExecuteOptions,
}

impl Orchestrator {
    pub fn new(control: Arc<dyn ControlPlane>, state_manager: Arc<StateManager>) -> Self {
        Self {
            control,
            state_manager,
            policy: UpdatePolicy::new(),
            options: ExecuteOptions::default(),
        }
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Compute the change-set for a stack without touching the remote system
    pub async fn plan(&self, stack: &Stack) -> Result<ChangeSet> {
        let graph = DependencyGraph::build(stack)?;
        let state = self.state_manager.load(&stack.name).await?;
        PlanEngine::new(self.policy.clone()).plan(stack, &graph, &state)
    }

    /// Plan and execute a stack, returning per-resource outcomes and the
    /// stack's resolved exports
    pub async fn apply(&self, stack: &Stack) -> Result<ApplyResult> {
        let lock = self.state_manager.acquire_lock(&stack.name).await?;
        let result = self.apply_locked(stack).await;
        lock.release().await?;
        result
    }

    async fn apply_locked(&self, stack: &Stack) -> Result<ApplyResult> {
        let graph = DependencyGraph::build(stack)?;
        let mut state = self.state_manager.load(&stack.name).await?;
        let change_set = PlanEngine::new(self.policy.clone()).plan(stack, &graph, &state)?;
        tracing::info!(stack = %stack.name, summary = %change_set.summary(), "Applying stack");

        let engine = ExecutionEngine::new(
            Arc::clone(&self.control),
            Arc::clone(&self.state_manager),
            self.options.clone(),
        );
        let mut result = engine.execute(&change_set, &mut state).await?;
        result.outputs = resolve_exports(stack, &state);
        Ok(result)
    }

    /// Tear down everything the stack's state tracks, consumers first
    pub async fn destroy(&self, stack: &Stack) -> Result<ApplyResult> {
        let lock = self.state_manager.acquire_lock(&stack.name).await?;
        let result = self.destroy_locked(stack).await;
        lock.release().await?;
        result
    }

    async fn destroy_locked(&self, stack: &Stack) -> Result<ApplyResult> {
        let mut state = self.state_manager.load(&stack.name).await?;

        // Destroy is a plan against an empty desired set: everything live
        // becomes a delete, ordered by the prior snapshot's graph.
        let empty = Stack::new(stack.name.clone());
        let graph = DependencyGraph::build(&empty)?;
        let change_set = PlanEngine::new(self.policy.clone()).plan(&empty, &graph, &state)?;
        tracing::info!(stack = %stack.name, summary = %change_set.summary(), "Destroying stack");

        let engine = ExecutionEngine::new(
            Arc::clone(&self.control),
            Arc::clone(&self.state_manager),
            self.options.clone(),
        );
        engine.execute(&change_set, &mut state).await
    }
}

/// Resolve stack exports from records that reached `active`
fn resolve_exports(stack: &Stack, state: &StackState) -> BTreeMap<String, serde_json::Value> {
    let mut outputs = BTreeMap::new();
    for export in &stack.exports {
        let Some(record) = state.get(&export.reference.target) else {
            continue;
        };
        if record.status != ResourceStatus::Active {
            continue;
        }
        if let Some(value) = record.outputs.get(&export.reference.output) {
            outputs.insert(export.name.clone(), value.clone());
        } else {
            tracing::warn!(
                export = %export.name,
                reference = %export.reference,
                "Export references an output the resource did not report"
            );
        }
    }
    outputs
}
