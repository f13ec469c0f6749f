//! Execution engine
//!
//! Runs a change-set against the remote control plane with a bounded worker
//! pool. Operations become ready as their dependencies complete; the
//! scheduler loop is the only writer of stack state and persists it after
//! every completed operation, so a dependent never starts before its
//! producer is observably done. On failure the engine finishes independent
//! branches, then rolls back everything that succeeded in this run.

use crate::action::{ApplyResult, ChangeSet, OpKind, Operation, Outcome};
use crate::error::{CloudError, Result};
use crate::provider::{ControlPlane, Outputs, ResolvedAttrs};
use crate::state::{ResourceRecord, ResourceStatus, StackState, StateManager};
use chrono::Utc;
use groundwork_core::{Reference, ResourceDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Tuning knobs for one apply run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of concurrently running operations
    pub parallelism: usize,

    /// Timeout for each remote operation; on expiry the remote is polled
    /// once more before the operation is declared failed
    pub op_timeout: Duration,

    /// Cooperative cancellation: stops scheduling, lets in-flight work
    /// finish, then rolls back what completed
    pub cancel: CancellationToken,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            parallelism: 4,
            op_timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }
}

/// What a successful operation produced
#[derive(Debug, Clone)]
enum OpSuccess {
    Created { remote_id: String, outputs: Outputs },
    Updated { outputs: Outputs },
    Replaced { remote_id: String, outputs: Outputs },
    Deleted,
}

/// A finished operation, retained for potential rollback
struct CompletedOp {
    operation: Operation,
    /// Record as it stood before this run touched the resource
    prior: Option<ResourceRecord>,
    success: OpSuccess,
}

/// Applies change-sets through a [`ControlPlane`]
pub struct ExecutionEngine {
    control: Arc<dyn ControlPlane>,
    state_manager: Arc<StateManager>,
    options: ExecuteOptions,
}

impl ExecutionEngine {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        state_manager: Arc<StateManager>,
        options: ExecuteOptions,
    ) -> Self {
        Self {
            control,
            state_manager,
            options,
        }
    }

    /// Execute a change-set, mutating and persisting `state` as operations
    /// complete.
    ///
    /// Remote failures are reported through the returned [`ApplyResult`];
    /// an `Err` is reserved for orchestrator bugs (unresolvable references,
    /// poisoned workers) and state-persistence failures.
    pub async fn execute(
        &self,
        change_set: &ChangeSet,
        state: &mut StackState,
    ) -> Result<ApplyResult> {
        let started_at = Instant::now();
        let pre_apply = state.clone();
        let parallelism = self.options.parallelism.max(1);

        let order: Vec<String> = change_set
            .operations
            .iter()
            .map(|op| op.resource_id.clone())
            .collect();
        let ops: HashMap<String, Operation> = change_set
            .operations
            .iter()
            .map(|op| (op.resource_id.clone(), op.clone()))
            .collect();

        let mut deps_left: HashMap<String, HashSet<String>> = ops
            .values()
            .map(|op| {
                let deps = op
                    .after
                    .iter()
                    .filter(|dep| ops.contains_key(*dep))
                    .cloned()
                    .collect();
                (op.resource_id.clone(), deps)
            })
            .collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for op in ops.values() {
            for dep in &op.after {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(op.resource_id.clone());
            }
        }

        let mut running: JoinSet<(String, Result<OpSuccess>)> = JoinSet::new();
        let mut started: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut priors: HashMap<String, Option<ResourceRecord>> = HashMap::new();
        let mut completed: Vec<CompletedOp> = Vec::new();
        let mut failures: HashMap<String, String> = HashMap::new();
        let mut fatal: Option<CloudError> = None;

        loop {
            // Dispatch everything ready, in change-set order, while the pool
            // has capacity.
            if fatal.is_none() && !self.options.cancel.is_cancelled() {
                let ready: Vec<String> = order
                    .iter()
                    .filter(|id| {
                        !started.contains(*id)
                            && !skipped.contains(*id)
                            && deps_left.get(*id).map_or(true, |deps| deps.is_empty())
                    })
                    .cloned()
                    .collect();

                for id in ready {
                    if running.len() >= parallelism {
                        break;
                    }
                    let op = ops[&id].clone();
                    let prior = state.get(&id).cloned();
                    priors.insert(id.clone(), prior.clone());

                    if let Err(err) = self.mark_in_flight(&op, state).await {
                        fatal = Some(err);
                        break;
                    }

                    let resolved = match &op.desired {
                        Some(descriptor) => match resolve_attributes(descriptor, state) {
                            Ok(resolved) => Some(resolved),
                            Err(err) => {
                                // Scheduling bug: the graph should have
                                // ordered the producer first.
                                let mut record = state
                                    .get(&id)
                                    .cloned()
                                    .unwrap_or_else(|| ResourceRecord::new(descriptor.clone()));
                                record.status = ResourceStatus::Failed;
                                record.updated_at = Utc::now();
                                state.set(id.clone(), record);
                                self.state_manager.save(state).await?;
                                fatal = Some(err);
                                break;
                            }
                        },
                        None => None,
                    };

                    let control = Arc::clone(&self.control);
                    let timeout = self.options.op_timeout;
                    let prior_remote = prior.as_ref().and_then(|r| r.remote_id.clone());
                    tracing::info!(resource = %id, kind = %op.kind, "Dispatching operation");
                    running.spawn(async move {
                        let result =
                            run_operation(control, &op, resolved.as_ref(), prior_remote, timeout)
                                .await;
                        (op.resource_id.clone(), result)
                    });
                    started.insert(id);
                }
            }

            if running.is_empty() {
                break;
            }

            match running.join_next().await {
                None => break,
                Some(Err(join_err)) => {
                    return Err(CloudError::TaskError(join_err.to_string()));
                }
                Some(Ok((id, result))) => {
                    let op = ops[&id].clone();
                    match result {
                        Ok(success) => {
                            tracing::info!(resource = %id, kind = %op.kind, "Operation complete");
                            apply_success(state, &op, &success);
                            self.state_manager.save(state).await?;
                            completed.push(CompletedOp {
                                prior: priors.get(&id).cloned().flatten(),
                                operation: op,
                                success,
                            });
                            if let Some(unblocked) = dependents.get(&id) {
                                for dependent in unblocked {
                                    if let Some(deps) = deps_left.get_mut(dependent) {
                                        deps.remove(&id);
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            let message = err.to_string();
                            tracing::error!(resource = %id, error = %message, "Operation failed");
                            mark_failed(state, &op, &id);
                            self.state_manager.save(state).await?;
                            failures.insert(id.clone(), message);

                            // Halt everything downstream of the failure;
                            // unrelated branches keep going.
                            let mut frontier = vec![id.clone()];
                            while let Some(current) = frontier.pop() {
                                if let Some(next) = dependents.get(&current) {
                                    for dependent in next {
                                        if !started.contains(dependent)
                                            && skipped.insert(dependent.clone())
                                        {
                                            frontier.push(dependent.clone());
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let cancelled = self.options.cancel.is_cancelled();
        let rollback_needed = !failures.is_empty()
            || fatal.is_some()
            || (cancelled && completed.len() < ops.len());

        let mut rollback_outcomes: HashMap<String, (Outcome, Option<String>)> = HashMap::new();
        if rollback_needed && !completed.is_empty() {
            tracing::warn!(
                completed = completed.len(),
                "Run did not finish cleanly, rolling back completed operations"
            );
            for done in completed.iter().rev() {
                let id = done.operation.resource_id.clone();
                match self.rollback_one(done, &pre_apply, state).await {
                    Ok(()) => {
                        rollback_outcomes.insert(id, (Outcome::RolledBack, None));
                    }
                    Err(err) => {
                        tracing::error!(resource = %id, error = %err, "Rollback failed");
                        rollback_outcomes
                            .insert(id, (Outcome::RollbackFailed, Some(err.to_string())));
                    }
                }
                self.state_manager.save(state).await?;
            }
        }

        if let Some(fatal) = fatal {
            return Err(fatal);
        }

        let mut result = ApplyResult::default();
        for id in &order {
            if let Some((outcome, message)) = rollback_outcomes.get(id) {
                match message {
                    Some(message) => result.record_with_message(id.clone(), *outcome, message),
                    None => result.record(id.clone(), *outcome),
                }
            } else if let Some(message) = failures.get(id) {
                result.record_with_message(id.clone(), Outcome::Failed, message);
            } else if let Some(done) = completed.iter().find(|c| &c.operation.resource_id == id) {
                let outcome = match done.success {
                    OpSuccess::Created { .. } => Outcome::Created,
                    OpSuccess::Updated { .. } => Outcome::Updated,
                    OpSuccess::Replaced { .. } => Outcome::Replaced,
                    OpSuccess::Deleted => Outcome::Deleted,
                };
                result.record(id.clone(), outcome);
            } else {
                result.record(id.clone(), Outcome::NotStarted);
            }
        }
        for id in &change_set.unchanged {
            result.record(id.clone(), Outcome::Unchanged);
        }
        result.duration_ms = started_at.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Record that an operation is in flight so a crash mid-run is visible
    /// in the persisted state.
    async fn mark_in_flight(&self, op: &Operation, state: &mut StackState) -> Result<()> {
        match op.kind {
            OpKind::Create => {
                let descriptor = op.desired.clone().expect("create carries a descriptor");
                state.set(
                    op.resource_id.clone(),
                    ResourceRecord::new(descriptor).with_status(ResourceStatus::Creating),
                );
            }
            OpKind::Update | OpKind::Replace => {
                if let Some(mut record) = state.get(&op.resource_id).cloned() {
                    record.status = ResourceStatus::Updating;
                    record.updated_at = Utc::now();
                    state.set(op.resource_id.clone(), record);
                }
            }
            // Deletes keep their record until the remote confirms.
            OpKind::Delete => return Ok(()),
        }
        self.state_manager.save(state).await
    }

    /// Undo one completed operation, restoring the pre-apply record
    async fn rollback_one(
        &self,
        done: &CompletedOp,
        pre_apply: &StackState,
        state: &mut StackState,
    ) -> Result<()> {
        let id = &done.operation.resource_id;
        let resource_type = &done.operation.resource_type;
        let timeout = self.options.op_timeout;

        match &done.success {
            OpSuccess::Created { remote_id, .. } => {
                with_timeout(timeout, id, self.control.delete(remote_id, resource_type)).await?;
                state.remove(id);
                Ok(())
            }
            OpSuccess::Updated { .. } => {
                let prior = done.prior.as_ref().ok_or_else(|| CloudError::RollbackFailure {
                    resource: id.clone(),
                    message: "no prior record to restore".to_string(),
                })?;
                let remote_id = prior.remote_id.clone().ok_or_else(|| {
                    CloudError::RollbackFailure {
                        resource: id.clone(),
                        message: "prior record has no remote id".to_string(),
                    }
                })?;
                let resolved = resolve_attributes(&prior.descriptor, pre_apply)?;
                let outputs = with_timeout(
                    timeout,
                    id,
                    self.control.update(&remote_id, resource_type, &resolved),
                )
                .await?;
                let mut restored = prior.clone();
                restored.outputs = outputs;
                restored.status = ResourceStatus::Active;
                restored.updated_at = Utc::now();
                state.set(id.clone(), restored);
                Ok(())
            }
            OpSuccess::Replaced { remote_id, .. } => {
                let prior = done.prior.as_ref().ok_or_else(|| CloudError::RollbackFailure {
                    resource: id.clone(),
                    message: "no prior record to restore".to_string(),
                })?;
                with_timeout(timeout, id, self.control.delete(remote_id, resource_type)).await?;
                let resolved = resolve_attributes(&prior.descriptor, pre_apply)?;
                let created = with_timeout(
                    timeout,
                    id,
                    self.control.create(id, &prior.descriptor.resource_type, &resolved),
                )
                .await?;
                let mut restored = prior.clone();
                restored.remote_id = Some(created.remote_id);
                restored.outputs = created.outputs;
                restored.status = ResourceStatus::Active;
                restored.updated_at = Utc::now();
                state.set(id.clone(), restored);
                Ok(())
            }
            OpSuccess::Deleted => {
                let prior = done.prior.as_ref().ok_or_else(|| CloudError::RollbackFailure {
                    resource: id.clone(),
                    message: "no prior record to restore".to_string(),
                })?;
                // A record that never materialized has nothing to recreate
                // remotely; reinstating the record is enough.
                if prior.remote_id.is_none() {
                    state.set(id.clone(), prior.clone());
                    return Ok(());
                }
                let resolved = resolve_attributes(&prior.descriptor, pre_apply)?;
                let created = with_timeout(
                    timeout,
                    id,
                    self.control.create(id, &prior.descriptor.resource_type, &resolved),
                )
                .await?;
                let mut restored = prior.clone();
                restored.remote_id = Some(created.remote_id);
                restored.outputs = created.outputs;
                restored.status = ResourceStatus::Active;
                restored.updated_at = Utc::now();
                state.set(id.clone(), restored);
                Ok(())
            }
        }
    }
}

/// Resolve a descriptor's attributes against materialized records.
///
/// Outputs come from records that are `active` — either untouched resources
/// from a previous run or producers that completed earlier in this one.
fn resolve_attributes(
    descriptor: &ResourceDescriptor,
    state: &StackState,
) -> Result<ResolvedAttrs> {
    let resolver = |reference: &Reference| {
        state.get(&reference.target).and_then(|record| {
            if record.status == ResourceStatus::Active {
                record.outputs.get(&reference.output).cloned()
            } else {
                None
            }
        })
    };

    let mut resolved = ResolvedAttrs::new();
    for (name, value) in &descriptor.attributes {
        match value.resolve(&resolver) {
            Ok(value) => {
                resolved.insert(name.clone(), value);
            }
            Err(reference) => {
                return Err(CloudError::UnresolvedReference {
                    resource: descriptor.id.clone(),
                    target: reference.target,
                    output: reference.output,
                });
            }
        }
    }
    Ok(resolved)
}

/// Fold a successful operation into the state records
fn apply_success(state: &mut StackState, op: &Operation, success: &OpSuccess) {
    let now = Utc::now();
    match success {
        OpSuccess::Created { remote_id, outputs }
        | OpSuccess::Replaced { remote_id, outputs } => {
            let descriptor = op.desired.clone().expect("create carries a descriptor");
            let created_at = state
                .get(&op.resource_id)
                .map(|record| record.created_at)
                .unwrap_or(now);
            let mut record = ResourceRecord::new(descriptor)
                .with_status(ResourceStatus::Active)
                .with_remote(remote_id.clone(), outputs.clone());
            record.created_at = created_at;
            record.updated_at = now;
            state.set(op.resource_id.clone(), record);
        }
        OpSuccess::Updated { outputs } => {
            if let Some(mut record) = state.get(&op.resource_id).cloned() {
                record.descriptor = op.desired.clone().expect("update carries a descriptor");
                record.outputs = outputs.clone();
                record.status = ResourceStatus::Active;
                record.updated_at = now;
                state.set(op.resource_id.clone(), record);
            }
        }
        OpSuccess::Deleted => {
            if let Some(mut record) = state.get(&op.resource_id).cloned() {
                record.remote_id = None;
                record.outputs = Outputs::new();
                record.status = ResourceStatus::Deleted;
                record.updated_at = now;
                state.set(op.resource_id.clone(), record);
            }
        }
    }
}

/// Mark a resource failed after its operation errored
fn mark_failed(state: &mut StackState, op: &Operation, id: &str) {
    let mut record = state.get(id).cloned().unwrap_or_else(|| {
        ResourceRecord::new(
            op.desired
                .clone()
                .unwrap_or_else(|| ResourceDescriptor::new(id, op.resource_type.clone())),
        )
    });
    record.status = ResourceStatus::Failed;
    record.updated_at = Utc::now();
    state.set(id.to_string(), record);
}

async fn with_timeout<T>(
    timeout: Duration,
    resource: &str,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(CloudError::OperationTimeout {
            resource: resource.to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

/// Drive one operation against the control plane.
///
/// On timeout the remote is polled once through `describe` — providers that
/// complete asynchronously may have finished even though the call expired.
async fn run_operation(
    control: Arc<dyn ControlPlane>,
    op: &Operation,
    resolved: Option<&ResolvedAttrs>,
    prior_remote: Option<String>,
    timeout: Duration,
) -> Result<OpSuccess> {
    match op.kind {
        OpKind::Create => {
            let attrs = resolved.expect("create carries attributes");
            match tokio::time::timeout(
                timeout,
                control.create(&op.resource_id, &op.resource_type, attrs),
            )
            .await
            {
                Ok(Ok(created)) => Ok(OpSuccess::Created {
                    remote_id: created.remote_id,
                    outputs: created.outputs,
                }),
                Ok(Err(err)) => Err(err),
                Err(_) => match control.describe(&op.resource_id, &op.resource_type).await {
                    Ok(Some(described)) => Ok(OpSuccess::Created {
                        remote_id: described.remote_id,
                        outputs: described.outputs,
                    }),
                    _ => Err(CloudError::OperationTimeout {
                        resource: op.resource_id.clone(),
                        seconds: timeout.as_secs(),
                    }),
                },
            }
        }
        OpKind::Update => {
            let attrs = resolved.expect("update carries attributes");
            let remote_id = prior_remote
                .ok_or_else(|| CloudError::ResourceNotFound(op.resource_id.clone()))?;
            match tokio::time::timeout(
                timeout,
                control.update(&remote_id, &op.resource_type, attrs),
            )
            .await
            {
                Ok(Ok(outputs)) => Ok(OpSuccess::Updated { outputs }),
                Ok(Err(err)) => Err(err),
                Err(_) => match control.describe(&op.resource_id, &op.resource_type).await {
                    Ok(Some(described)) => Ok(OpSuccess::Updated {
                        outputs: described.outputs,
                    }),
                    _ => Err(CloudError::OperationTimeout {
                        resource: op.resource_id.clone(),
                        seconds: timeout.as_secs(),
                    }),
                },
            }
        }
        OpKind::Replace => {
            let attrs = resolved.expect("replace carries attributes");
            // The old instance goes first so its identity can be reclaimed.
            if let Some(old_remote) = prior_remote {
                match tokio::time::timeout(
                    timeout,
                    control.delete(&old_remote, &op.resource_type),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(_) => match control.describe(&op.resource_id, &op.resource_type).await {
                        Ok(None) => {}
                        _ => {
                            return Err(CloudError::OperationTimeout {
                                resource: op.resource_id.clone(),
                                seconds: timeout.as_secs(),
                            });
                        }
                    },
                }
            }
            match tokio::time::timeout(
                timeout,
                control.create(&op.resource_id, &op.resource_type, attrs),
            )
            .await
            {
                Ok(Ok(created)) => Ok(OpSuccess::Replaced {
                    remote_id: created.remote_id,
                    outputs: created.outputs,
                }),
                Ok(Err(err)) => Err(err),
                Err(_) => match control.describe(&op.resource_id, &op.resource_type).await {
                    Ok(Some(described)) => Ok(OpSuccess::Replaced {
                        remote_id: described.remote_id,
                        outputs: described.outputs,
                    }),
                    _ => Err(CloudError::OperationTimeout {
                        resource: op.resource_id.clone(),
                        seconds: timeout.as_secs(),
                    }),
                },
            }
        }
        OpKind::Delete => {
            // Records that never materialized have nothing remote to remove.
            let Some(remote_id) = prior_remote else {
                return Ok(OpSuccess::Deleted);
            };
            match tokio::time::timeout(timeout, control.delete(&remote_id, &op.resource_type))
                .await
            {
                Ok(Ok(())) => Ok(OpSuccess::Deleted),
                Ok(Err(err)) => Err(err),
                Err(_) => match control.describe(&op.resource_id, &op.resource_type).await {
                    Ok(None) => Ok(OpSuccess::Deleted),
                    _ => Err(CloudError::OperationTimeout {
                        resource: op.resource_id.clone(),
                        seconds: timeout.as_secs(),
                    }),
                },
            }
        }
    }
}
