//! Full plan/apply/destroy lifecycle through the orchestrator

mod common;

use common::FakeControlPlane;
use groundwork_cloud::{ControlPlane, Orchestrator, Outcome, StateManager};
use groundwork_core::{ResourceDescriptor, Stack};
use std::sync::Arc;
use tempfile::tempdir;

fn web_stack() -> Stack {
    let mut stack = Stack::new("web");
    stack
        .add(ResourceDescriptor::new("network", "network").attr("max_azs", 2))
        .unwrap();
    stack
        .add(ResourceDescriptor::new("cluster", "cluster").attr_ref("network_id", "network", "id"))
        .unwrap();
    stack
        .add(ResourceDescriptor::new("service", "service").attr_ref("cluster_id", "cluster", "id"))
        .unwrap();
    stack.export("service_id", "service", "id");
    stack
}

fn orchestrator(fake: &Arc<FakeControlPlane>, root: &std::path::Path) -> Orchestrator {
    let control: Arc<FakeControlPlane> = Arc::clone(fake);
    let control: Arc<dyn ControlPlane> = control;
    Orchestrator::new(
        control,
        Arc::new(StateManager::new(root)),
    )
}

#[tokio::test]
async fn apply_is_idempotent() {
    let temp = tempdir().unwrap();
    let fake = Arc::new(FakeControlPlane::new());
    let orchestrator = orchestrator(&fake, temp.path());
    let stack = web_stack();

    let first = orchestrator.apply(&stack).await.unwrap();
    assert!(first.is_success());
    assert_eq!(fake.len(), 3);

    // The export surfaced once its owner reached active.
    let service_remote = fake.get("service").unwrap().remote_id;
    assert_eq!(first.outputs["service_id"], serde_json::json!(service_remote));

    // Unchanged stack: empty change-set, nothing new remotely.
    let plan = orchestrator.plan(&stack).await.unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.unchanged.len(), 3);

    let second = orchestrator.apply(&stack).await.unwrap();
    assert!(second.is_success());
    assert!(second
        .resources
        .iter()
        .all(|r| r.outcome == Outcome::Unchanged));
    assert_eq!(fake.len(), 3);
}

#[tokio::test]
async fn changed_service_plans_single_update() {
    let temp = tempdir().unwrap();
    let fake = Arc::new(FakeControlPlane::new());
    let orchestrator = orchestrator(&fake, temp.path());

    orchestrator.apply(&web_stack()).await.unwrap();

    let mut changed = Stack::new("web");
    changed
        .add(ResourceDescriptor::new("network", "network").attr("max_azs", 2))
        .unwrap();
    changed
        .add(ResourceDescriptor::new("cluster", "cluster").attr_ref("network_id", "network", "id"))
        .unwrap();
    changed
        .add(
            ResourceDescriptor::new("service", "service")
                .attr("replicas", 2)
                .attr_ref("cluster_id", "cluster", "id"),
        )
        .unwrap();
    changed.export("service_id", "service", "id");

    let plan = orchestrator.plan(&changed).await.unwrap();
    assert_eq!(plan.operations.len(), 1);
    assert_eq!(plan.operations[0].resource_id, "service");
    assert_eq!(plan.summary().update, 1);

    let result = orchestrator.apply(&changed).await.unwrap();
    assert_eq!(result.outcome_of("service"), Some(Outcome::Updated));
    assert_eq!(result.outcome_of("network"), Some(Outcome::Unchanged));
    assert_eq!(
        fake.get("service").unwrap().attributes["replicas"],
        serde_json::json!(2)
    );
}

#[tokio::test]
async fn destroy_deletes_consumers_first() {
    let temp = tempdir().unwrap();
    let fake = Arc::new(FakeControlPlane::new());
    let orchestrator = orchestrator(&fake, temp.path());
    let stack = web_stack();

    orchestrator.apply(&stack).await.unwrap();
    let result = orchestrator.destroy(&stack).await.unwrap();

    assert!(result.is_success());
    for id in ["network", "cluster", "service"] {
        assert_eq!(result.outcome_of(id), Some(Outcome::Deleted), "{id}");
    }
    assert_eq!(fake.len(), 0);

    let service = fake.call_index("delete service").unwrap();
    let cluster = fake.call_index("delete cluster").unwrap();
    let network = fake.call_index("delete network").unwrap();
    assert!(service < cluster && cluster < network);

    // A destroyed stack re-plans from scratch.
    let plan = orchestrator.plan(&stack).await.unwrap();
    assert_eq!(plan.summary().create, 3);
}

#[tokio::test]
async fn failed_apply_reports_and_recovers() {
    let temp = tempdir().unwrap();
    let fake = Arc::new(FakeControlPlane::new());
    let orch = orchestrator(&fake, temp.path());
    let stack = web_stack();

    fake.fail_create("cluster");
    let result = orch.apply(&stack).await.unwrap();
    assert!(!result.is_success());
    assert_eq!(result.outcome_of("cluster"), Some(Outcome::Failed));
    assert!(result.outputs.is_empty());
    assert!(result
        .resources
        .iter()
        .find(|r| r.resource_id == "cluster")
        .unwrap()
        .message
        .as_deref()
        .unwrap()
        .contains("injected create failure"));

    // Lock was released despite the failure, and a later apply converges.
    let fake2 = Arc::new(FakeControlPlane::new());
    let orch = orchestrator(&fake2, temp.path());
    let result = orch.apply(&stack).await.unwrap();
    assert!(result.is_success());
}
