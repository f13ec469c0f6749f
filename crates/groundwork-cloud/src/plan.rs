//! Plan engine: diff a desired stack against last-applied state
//!
//! Planning is a pure function over the desired graph and the persisted
//! records; it never talks to the remote system. References are compared
//! structurally (unresolved), so a resource whose inputs merely *flow from*
//! a changed producer is not itself re-planned.

use crate::action::{ChangeSet, OpKind, Operation};
use crate::error::Result;
use crate::state::{ResourceStatus, StackState};
use groundwork_core::{AttrValue, DependencyGraph, Stack};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-resource-type table of attributes whose change forces replacement.
///
/// Anything not listed is treated as update-compatible. A change to the
/// resource type itself always forces replacement.
#[derive(Debug, Clone, Default)]
pub struct UpdatePolicy {
    replacement_keys: HashMap<String, HashSet<String>>,
}

impl UpdatePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark attributes of a resource type as replacement-forcing
    pub fn replace_on<I, S>(mut self, resource_type: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replacement_keys
            .entry(resource_type.into())
            .or_default()
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn requires_replacement(&self, resource_type: &str, changed: &[String]) -> bool {
        match self.replacement_keys.get(resource_type) {
            Some(keys) => changed.iter().any(|attr| keys.contains(attr)),
            None => false,
        }
    }
}

/// Derives an ordered change-set from desired graph + persisted state
pub struct PlanEngine {
    policy: UpdatePolicy,
}

impl PlanEngine {
    pub fn new(policy: UpdatePolicy) -> Self {
        Self { policy }
    }

    /// Diff the desired stack against the last-applied records.
    ///
    /// Creates, updates and replaces come first in forward topological order;
    /// deletes of removed resources follow in reverse dependency order of the
    /// *previous* snapshot, so consumers are always gone (or re-pointed)
    /// before their producers.
    pub fn plan(
        &self,
        stack: &Stack,
        graph: &DependencyGraph,
        state: &StackState,
    ) -> Result<ChangeSet> {
        let mut operations = Vec::new();
        let mut unchanged = Vec::new();
        let mut planned: HashSet<String> = HashSet::new();

        for id in graph.apply_order() {
            let descriptor = stack
                .get(&id)
                .expect("apply order only yields declared resources");
            let after: Vec<String> = graph
                .dependencies_of(&id)
                .into_iter()
                .filter(|dep| planned.contains(dep))
                .collect();

            let record = state
                .get(&id)
                .filter(|record| record.status != ResourceStatus::Deleted);

            let operation = match record {
                None => Some(Operation {
                    resource_id: id.clone(),
                    resource_type: descriptor.resource_type.clone(),
                    kind: OpKind::Create,
                    reason: "not present in state".to_string(),
                    after,
                    desired: Some(descriptor.clone()),
                }),
                Some(record) if !record.is_materialized() => Some(Operation {
                    resource_id: id.clone(),
                    resource_type: descriptor.resource_type.clone(),
                    kind: OpKind::Create,
                    reason: format!("previous create never completed (was {})", record.status),
                    after,
                    desired: Some(descriptor.clone()),
                }),
                Some(record) => {
                    if record.descriptor.resource_type != descriptor.resource_type {
                        Some(Operation {
                            resource_id: id.clone(),
                            resource_type: descriptor.resource_type.clone(),
                            kind: OpKind::Replace,
                            reason: format!(
                                "resource type changed from '{}' to '{}'",
                                record.descriptor.resource_type, descriptor.resource_type
                            ),
                            after,
                            desired: Some(descriptor.clone()),
                        })
                    } else {
                        let changed =
                            changed_attributes(&descriptor.attributes, &record.descriptor.attributes);
                        if changed.is_empty() {
                            if record.status == ResourceStatus::Active {
                                unchanged.push(id.clone());
                                None
                            } else {
                                // Materialized but not healthy; recreate.
                                Some(Operation {
                                    resource_id: id.clone(),
                                    resource_type: descriptor.resource_type.clone(),
                                    kind: OpKind::Replace,
                                    reason: format!("resource is {}", record.status),
                                    after,
                                    desired: Some(descriptor.clone()),
                                })
                            }
                        } else if self
                            .policy
                            .requires_replacement(&descriptor.resource_type, &changed)
                        {
                            Some(Operation {
                                resource_id: id.clone(),
                                resource_type: descriptor.resource_type.clone(),
                                kind: OpKind::Replace,
                                reason: format!(
                                    "attributes require replacement: {}",
                                    changed.join(", ")
                                ),
                                after,
                                desired: Some(descriptor.clone()),
                            })
                        } else {
                            Some(Operation {
                                resource_id: id.clone(),
                                resource_type: descriptor.resource_type.clone(),
                                kind: OpKind::Update,
                                reason: format!("attributes changed: {}", changed.join(", ")),
                                after,
                                desired: Some(descriptor.clone()),
                            })
                        }
                    }
                }
            };

            if let Some(operation) = operation {
                planned.insert(id.clone());
                operations.push(operation);
            }
        }

        operations.extend(self.plan_deletes(stack, state, &planned));

        Ok(ChangeSet {
            operations,
            unchanged,
        })
    }

    /// Delete operations for live records that left the desired set
    fn plan_deletes(
        &self,
        stack: &Stack,
        state: &StackState,
        planned: &HashSet<String>,
    ) -> Vec<Operation> {
        let removed: HashSet<String> = state
            .live()
            .filter(|(id, _)| stack.get(id).is_none())
            .map(|(id, _)| id.clone())
            .collect();
        if removed.is_empty() {
            return Vec::new();
        }

        let ordered = delete_order(state, &removed);
        ordered
            .into_iter()
            .map(|id| {
                let record = state.get(&id).expect("removed ids come from state");
                // A delete may only run after its removed dependents are gone
                // and after any surviving consumer has been re-pointed away.
                let mut after: Vec<String> = Vec::new();
                for (other_id, other) in state.live() {
                    if other_id == &id {
                        continue;
                    }
                    let references_id = other
                        .descriptor
                        .references()
                        .iter()
                        .any(|(_, r)| r.target == id)
                        || other.descriptor.depends_on.contains(&id);
                    if references_id && (removed.contains(other_id) || planned.contains(other_id))
                    {
                        after.push(other_id.clone());
                    }
                }
                after.sort();
                Operation {
                    resource_id: id.clone(),
                    resource_type: record.descriptor.resource_type.clone(),
                    kind: OpKind::Delete,
                    reason: "removed from stack".to_string(),
                    after,
                    desired: None,
                }
            })
            .collect()
    }
}

/// Attribute names whose values differ between two bags (added, removed or
/// changed), in name order
fn changed_attributes(
    desired: &BTreeMap<String, AttrValue>,
    prior: &BTreeMap<String, AttrValue>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, value) in desired {
        if prior.get(name) != Some(value) {
            changed.push(name.clone());
        }
    }
    for name in prior.keys() {
        if !desired.contains_key(name) {
            changed.push(name.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

/// Reverse dependency order over the removed subset of the prior snapshot.
///
/// The prior graph is rebuilt from persisted descriptors; if that snapshot
/// is no longer self-consistent the deletes fall back to id order.
fn delete_order(state: &StackState, removed: &HashSet<String>) -> Vec<String> {
    let mut prior_stack = Stack::new(state.stack.clone());
    let mut ids: Vec<&String> = state.live().map(|(id, _)| id).collect();
    ids.sort();
    for id in &ids {
        let record = state.get(id).expect("live ids come from state");
        if prior_stack.add(record.descriptor.clone()).is_err() {
            break;
        }
    }

    match DependencyGraph::build(&prior_stack) {
        Ok(prior_graph) => prior_graph
            .destroy_order()
            .into_iter()
            .filter(|id| removed.contains(id))
            .collect(),
        Err(err) => {
            tracing::warn!(%err, "Prior snapshot graph is inconsistent, deleting in id order");
            let mut ordered: Vec<String> = removed.iter().cloned().collect();
            ordered.sort();
            ordered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Outputs;
    use crate::state::ResourceRecord;
    use groundwork_core::ResourceDescriptor;
    use serde_json::json;

    fn web_service_stack() -> Stack {
        let mut stack = Stack::new("web");
        stack
            .add(ResourceDescriptor::new("network", "network").attr("max_azs", 2))
            .unwrap();
        stack
            .add(
                ResourceDescriptor::new("cluster", "cluster")
                    .attr_ref("network_id", "network", "id"),
            )
            .unwrap();
        stack
            .add(
                ResourceDescriptor::new("service", "service")
                    .attr("desired_count", 1)
                    .attr_ref("cluster_arn", "cluster", "arn"),
            )
            .unwrap();
        stack
            .add(
                ResourceDescriptor::new("endpoint", "dns-record")
                    .attr_ref("address", "service", "dns_name"),
            )
            .unwrap();
        stack
    }

    fn applied_state(stack: &Stack) -> StackState {
        let mut state = StackState::new(stack.name.clone());
        for (index, descriptor) in stack.iter().enumerate() {
            let remote_id = format!("sim-{}-{}", descriptor.resource_type, index);
            state.set(
                descriptor.id.clone(),
                ResourceRecord::new(descriptor.clone())
                    .with_status(ResourceStatus::Active)
                    .with_remote(
                        remote_id.clone(),
                        Outputs::from([("id".to_string(), json!(remote_id))]),
                    ),
            );
        }
        state
    }

    fn engine() -> PlanEngine {
        PlanEngine::new(UpdatePolicy::new())
    }

    #[test]
    fn empty_state_plans_creates_in_dependency_order() {
        let stack = web_service_stack();
        let graph = DependencyGraph::build(&stack).unwrap();
        let change_set = engine()
            .plan(&stack, &graph, &StackState::new("web"))
            .unwrap();

        let ids: Vec<&str> = change_set
            .operations
            .iter()
            .map(|op| op.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["network", "cluster", "service", "endpoint"]);
        assert!(change_set
            .operations
            .iter()
            .all(|op| op.kind == OpKind::Create));
        assert_eq!(change_set.get("service").unwrap().after, vec!["cluster"]);
        assert!(change_set.get("network").unwrap().after.is_empty());
    }

    #[test]
    fn converged_stack_plans_empty_change_set() {
        let stack = web_service_stack();
        let graph = DependencyGraph::build(&stack).unwrap();
        let state = applied_state(&stack);

        let change_set = engine().plan(&stack, &graph, &state).unwrap();
        assert!(change_set.is_empty());
        assert_eq!(change_set.unchanged.len(), 4);
        assert_eq!(change_set.summary().unchanged, 4);
    }

    #[test]
    fn single_attribute_change_plans_single_update() {
        let mut stack = web_service_stack();
        let state = applied_state(&stack);

        // Bump the service's desired_count only.
        let mut changed = Stack::new("web");
        for descriptor in stack.iter() {
            let descriptor = if descriptor.id == "service" {
                descriptor.clone().attr("desired_count", 3)
            } else {
                descriptor.clone()
            };
            changed.add(descriptor).unwrap();
        }
        stack = changed;

        let graph = DependencyGraph::build(&stack).unwrap();
        let change_set = engine().plan(&stack, &graph, &state).unwrap();

        assert_eq!(change_set.operations.len(), 1);
        let op = &change_set.operations[0];
        assert_eq!(op.resource_id, "service");
        assert_eq!(op.kind, OpKind::Update);
        assert!(op.reason.contains("desired_count"));
        // The touched resource's producers finished in an earlier run.
        assert!(op.after.is_empty());
        assert_eq!(change_set.unchanged.len(), 3);
    }

    #[test]
    fn replacement_policy_forces_replace() {
        let stack = web_service_stack();
        let state = applied_state(&stack);

        let mut changed = Stack::new("web");
        for descriptor in stack.iter() {
            let descriptor = if descriptor.id == "network" {
                descriptor.clone().attr("max_azs", 3)
            } else {
                descriptor.clone()
            };
            changed.add(descriptor).unwrap();
        }

        let graph = DependencyGraph::build(&changed).unwrap();
        let policy = UpdatePolicy::new().replace_on("network", ["max_azs"]);
        let change_set = PlanEngine::new(policy).plan(&changed, &graph, &state).unwrap();

        assert_eq!(change_set.operations.len(), 1);
        assert_eq!(change_set.operations[0].kind, OpKind::Replace);
        assert!(change_set.operations[0].reason.contains("max_azs"));
    }

    #[test]
    fn resource_type_change_forces_replace() {
        let stack = web_service_stack();
        let state = applied_state(&stack);

        let mut changed = Stack::new("web");
        for descriptor in stack.iter() {
            let mut descriptor = descriptor.clone();
            if descriptor.id == "endpoint" {
                descriptor.resource_type = "alias-record".to_string();
            }
            changed.add(descriptor).unwrap();
        }

        let graph = DependencyGraph::build(&changed).unwrap();
        let change_set = engine().plan(&changed, &graph, &state).unwrap();
        assert_eq!(change_set.operations.len(), 1);
        assert_eq!(change_set.operations[0].kind, OpKind::Replace);
    }

    #[test]
    fn removed_resources_delete_in_reverse_dependency_order() {
        let stack = web_service_stack();
        let state = applied_state(&stack);

        // Drop service and endpoint; keep network and cluster.
        let mut shrunk = Stack::new("web");
        for descriptor in stack.iter().take(2) {
            shrunk.add(descriptor.clone()).unwrap();
        }

        let graph = DependencyGraph::build(&shrunk).unwrap();
        let change_set = engine().plan(&shrunk, &graph, &state).unwrap();

        let ids: Vec<&str> = change_set
            .operations
            .iter()
            .map(|op| op.resource_id.as_str())
            .collect();
        assert_eq!(ids, vec!["endpoint", "service"]);
        assert!(change_set
            .operations
            .iter()
            .all(|op| op.kind == OpKind::Delete));
        // The consumer's delete gates the producer's delete.
        assert_eq!(change_set.get("service").unwrap().after, vec!["endpoint"]);
    }

    #[test]
    fn unmaterialized_failure_plans_create_again() {
        let stack = web_service_stack();
        let graph = DependencyGraph::build(&stack).unwrap();

        let mut state = applied_state(&stack);
        state.set(
            "endpoint".to_string(),
            ResourceRecord::new(stack.get("endpoint").unwrap().clone())
                .with_status(ResourceStatus::Failed),
        );

        let change_set = engine().plan(&stack, &graph, &state).unwrap();
        assert_eq!(change_set.operations.len(), 1);
        let op = &change_set.operations[0];
        assert_eq!(op.resource_id, "endpoint");
        assert_eq!(op.kind, OpKind::Create);
    }

    #[test]
    fn materialized_failure_plans_replace() {
        let stack = web_service_stack();
        let graph = DependencyGraph::build(&stack).unwrap();

        let mut state = applied_state(&stack);
        let failed = state.get("service").unwrap().clone().with_status(ResourceStatus::Failed);
        state.set("service".to_string(), failed);

        let change_set = engine().plan(&stack, &graph, &state).unwrap();
        assert_eq!(change_set.operations.len(), 1);
        assert_eq!(change_set.operations[0].kind, OpKind::Replace);
    }

    #[test]
    fn delete_waits_for_surviving_consumer_repoint() {
        // state: bucket + consumer referencing it; desired: consumer
        // re-pointed to a new bucket, old bucket removed.
        let mut prior = Stack::new("web");
        prior.add(ResourceDescriptor::new("old-bucket", "bucket")).unwrap();
        prior
            .add(
                ResourceDescriptor::new("consumer", "service")
                    .attr_ref("bucket", "old-bucket", "name"),
            )
            .unwrap();
        let state = applied_state(&prior);

        let mut desired = Stack::new("web");
        desired.add(ResourceDescriptor::new("new-bucket", "bucket")).unwrap();
        desired
            .add(
                ResourceDescriptor::new("consumer", "service")
                    .attr_ref("bucket", "new-bucket", "name"),
            )
            .unwrap();

        let graph = DependencyGraph::build(&desired).unwrap();
        let change_set = engine().plan(&desired, &graph, &state).unwrap();

        let delete = change_set.get("old-bucket").unwrap();
        assert_eq!(delete.kind, OpKind::Delete);
        assert_eq!(delete.after, vec!["consumer"]);
    }
}
