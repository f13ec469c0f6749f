//! Simulated control plane implementation
//!
//! A deterministic in-memory remote system: resources are tagged with the
//! orchestrator's logical id, remote identifiers are sequential, and
//! per-type output rules synthesize the values a real provider would report
//! (endpoint addresses, ARNs and the like). Failure and latency injection
//! make it useful for rehearsing partial-apply behavior.

use async_trait::async_trait;
use groundwork_cloud::{
    CloudError, ControlPlane, Created, Described, Outputs, ResolvedAttrs,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One resource as the simulated remote system stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimResource {
    pub remote_id: String,
    pub resource_type: String,
    pub attributes: ResolvedAttrs,
}

/// On-disk snapshot of the simulated remote system
#[derive(Debug, Default, Serialize, Deserialize)]
struct SimStore {
    counter: u64,
    resources: HashMap<String, SimResource>,
}

type RenderFn = Box<dyn Fn(&str, &ResolvedAttrs) -> serde_json::Value + Send + Sync>;

/// Synthesized output for one resource type
struct OutputRule {
    output: String,
    render: RenderFn,
}

#[derive(Default)]
struct SimState {
    resources: HashMap<String, SimResource>,
    remote_index: HashMap<String, String>,
}

/// In-memory [`ControlPlane`] binding
pub struct SimControlPlane {
    state: Mutex<SimState>,
    rules: HashMap<String, Vec<OutputRule>>,
    latency: Option<Duration>,
    counter: AtomicU64,
    failing: Mutex<HashSet<String>>,
    deferred: Mutex<HashSet<String>>,
    store: Option<PathBuf>,
}

impl SimControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            rules: HashMap::new(),
            latency: None,
            counter: AtomicU64::new(0),
            failing: Mutex::new(HashSet::new()),
            deferred: Mutex::new(HashSet::new()),
            store: None,
        }
    }

    /// Back the resource table with a JSON file, so the "remote system"
    /// survives across processes the way a real one would.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> groundwork_cloud::Result<Self> {
        let path = path.into();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let snapshot: SimStore = serde_json::from_str(&content)?;
            self.counter = AtomicU64::new(snapshot.counter);
            let mut state = self.state.lock().unwrap();
            for (resource, entry) in snapshot.resources {
                state
                    .remote_index
                    .insert(entry.remote_id.clone(), resource.clone());
                state.resources.insert(resource, entry);
            }
        }
        self.store = Some(path);
        Ok(self)
    }

    /// Add artificial latency to every remote call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register a synthesized output for a resource type
    pub fn with_output_rule(
        mut self,
        resource_type: impl Into<String>,
        output: impl Into<String>,
        render: impl Fn(&str, &ResolvedAttrs) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.rules
            .entry(resource_type.into())
            .or_default()
            .push(OutputRule {
                output: output.into(),
                render: Box::new(render),
            });
        self
    }

    /// Make create and update fail for a logical id
    pub fn fail_on(&self, resource: impl Into<String>) {
        self.failing.lock().unwrap().insert(resource.into());
    }

    /// Make create land the resource but never answer in time
    pub fn defer(&self, resource: impl Into<String>) {
        self.deferred.lock().unwrap().insert(resource.into());
    }

    pub fn resource(&self, resource: &str) -> Option<SimResource> {
        self.state.lock().unwrap().resources.get(resource).cloned()
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().unwrap().resources.len()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Write the resource table to the backing file, when one is configured
    async fn persist(&self) -> groundwork_cloud::Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let snapshot = {
            let state = self.state.lock().unwrap();
            SimStore {
                counter: self.counter.load(Ordering::SeqCst),
                resources: state.resources.clone(),
            }
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    fn check_injected_failure(&self, resource: &str) -> groundwork_cloud::Result<()> {
        if self.failing.lock().unwrap().contains(resource) {
            return Err(CloudError::RemoteOperation {
                resource: resource.to_string(),
                message: crate::error::SimError::Injected(resource.to_string()).to_string(),
            });
        }
        Ok(())
    }

    fn outputs_for(&self, resource: &str, found: &SimResource) -> Outputs {
        let mut outputs: Outputs = found.attributes.clone();
        outputs.insert("id".to_string(), serde_json::json!(found.remote_id));
        outputs.insert("name".to_string(), serde_json::json!(resource));
        if let Some(rules) = self.rules.get(&found.resource_type) {
            for rule in rules {
                outputs.insert(
                    rule.output.clone(),
                    (rule.render)(resource, &found.attributes),
                );
            }
        }
        outputs
    }
}

impl Default for SimControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    fn name(&self) -> &str {
        "sim"
    }

    fn display_name(&self) -> &str {
        "Simulated control plane"
    }

    async fn create(
        &self,
        resource: &str,
        resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> groundwork_cloud::Result<Created> {
        self.simulate_latency().await;
        self.check_injected_failure(resource)?;

        let remote_id = format!(
            "sim-{}-{}",
            resource_type,
            self.counter.fetch_add(1, Ordering::SeqCst)
        );
        let created = SimResource {
            remote_id: remote_id.clone(),
            resource_type: resource_type.to_string(),
            attributes: attributes.clone(),
        };
        {
            let mut state = self.state.lock().unwrap();
            state.resources.insert(resource.to_string(), created.clone());
            state
                .remote_index
                .insert(remote_id.clone(), resource.to_string());
        }
        tracing::debug!(resource, %remote_id, "sim: created resource");
        self.persist().await?;

        if self.deferred.lock().unwrap().contains(resource) {
            // Completes remotely but the answer never makes it back.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        Ok(Created {
            outputs: self.outputs_for(resource, &created),
            remote_id,
        })
    }

    async fn update(
        &self,
        remote_id: &str,
        _resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> groundwork_cloud::Result<Outputs> {
        self.simulate_latency().await;

        let resource = {
            let state = self.state.lock().unwrap();
            state
                .remote_index
                .get(remote_id)
                .cloned()
                .ok_or_else(|| CloudError::ResourceNotFound(remote_id.to_string()))?
        };
        self.check_injected_failure(&resource)?;

        let updated = {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .resources
                .get_mut(&resource)
                .ok_or_else(|| CloudError::ResourceNotFound(resource.clone()))?;
            entry.attributes = attributes.clone();
            entry.clone()
        };
        tracing::debug!(%resource, remote_id, "sim: updated resource");
        self.persist().await?;
        Ok(self.outputs_for(&resource, &updated))
    }

    async fn delete(&self, remote_id: &str, _resource_type: &str) -> groundwork_cloud::Result<()> {
        self.simulate_latency().await;

        let resource = {
            let mut state = self.state.lock().unwrap();
            let Some(resource) = state.remote_index.remove(remote_id) else {
                return Err(CloudError::ResourceNotFound(remote_id.to_string()));
            };
            state.resources.remove(&resource);
            resource
        };
        tracing::debug!(%resource, remote_id, "sim: deleted resource");
        self.persist().await?;
        Ok(())
    }

    async fn describe(
        &self,
        resource: &str,
        _resource_type: &str,
    ) -> groundwork_cloud::Result<Option<Described>> {
        self.simulate_latency().await;

        let found = self.state.lock().unwrap().resources.get(resource).cloned();
        Ok(found.map(|found| Described {
            outputs: self.outputs_for(resource, &found),
            remote_id: found.remote_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, serde_json::Value)]) -> ResolvedAttrs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids() {
        let sim = SimControlPlane::new();
        let first = sim.create("network", "network", &attrs(&[])).await.unwrap();
        let second = sim.create("cluster", "cluster", &attrs(&[])).await.unwrap();
        assert_eq!(first.remote_id, "sim-network-0");
        assert_eq!(second.remote_id, "sim-cluster-1");
        assert_eq!(sim.resource_count(), 2);
    }

    #[tokio::test]
    async fn outputs_include_identity_and_rules() {
        let sim = SimControlPlane::new().with_output_rule(
            "load-balancer",
            "dns_name",
            |resource, _| json!(format!("{resource}.elb.sim.internal")),
        );

        let created = sim
            .create("alb", "load-balancer", &attrs(&[("port", json!(443))]))
            .await
            .unwrap();
        assert_eq!(created.outputs["id"], json!("sim-load-balancer-0"));
        assert_eq!(created.outputs["name"], json!("alb"));
        assert_eq!(created.outputs["port"], json!(443));
        assert_eq!(created.outputs["dns_name"], json!("alb.elb.sim.internal"));
    }

    #[tokio::test]
    async fn update_replaces_attributes() {
        let sim = SimControlPlane::new();
        let created = sim
            .create("svc", "service", &attrs(&[("replicas", json!(1))]))
            .await
            .unwrap();

        let outputs = sim
            .update(&created.remote_id, "service", &attrs(&[("replicas", json!(3))]))
            .await
            .unwrap();
        assert_eq!(outputs["replicas"], json!(3));
        assert_eq!(sim.resource("svc").unwrap().attributes["replicas"], json!(3));
    }

    #[tokio::test]
    async fn delete_then_describe_reports_absent() {
        let sim = SimControlPlane::new();
        let created = sim.create("svc", "service", &attrs(&[])).await.unwrap();

        assert!(sim.describe("svc", "service").await.unwrap().is_some());
        sim.delete(&created.remote_id, "service").await.unwrap();
        assert!(sim.describe("svc", "service").await.unwrap().is_none());
        assert_eq!(sim.resource_count(), 0);
    }

    #[tokio::test]
    async fn delete_of_unknown_remote_fails() {
        let sim = SimControlPlane::new();
        let err = sim.delete("sim-ghost-9", "service").await.unwrap_err();
        assert!(matches!(err, CloudError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn injected_failures_hit_create_and_update() {
        let sim = SimControlPlane::new();
        let created = sim.create("svc", "service", &attrs(&[])).await.unwrap();
        sim.fail_on("svc");

        let err = sim
            .update(&created.remote_id, "service", &attrs(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::RemoteOperation { .. }));

        let err = sim.create("svc", "service", &attrs(&[])).await.unwrap_err();
        assert!(matches!(err, CloudError::RemoteOperation { .. }));
    }

    #[tokio::test]
    async fn store_survives_reload() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp.path().join("sim-remote.json");

        let sim = SimControlPlane::new().with_store(&store).unwrap();
        let created = sim
            .create("network", "network", &attrs(&[("max_azs", json!(2))]))
            .await
            .unwrap();

        // A fresh instance sees the same remote resources and keeps the
        // id sequence moving forward.
        let reloaded = SimControlPlane::new().with_store(&store).unwrap();
        let found = reloaded.resource("network").unwrap();
        assert_eq!(found.remote_id, created.remote_id);
        let next = reloaded.create("cluster", "cluster", &attrs(&[])).await.unwrap();
        assert_eq!(next.remote_id, "sim-cluster-1");

        reloaded.delete(&created.remote_id, "network").await.unwrap();
        let again = SimControlPlane::new().with_store(&store).unwrap();
        assert!(again.resource("network").is_none());
        assert!(again.resource("cluster").is_some());
    }

    #[tokio::test]
    async fn deferred_create_lands_but_stalls() {
        let sim = SimControlPlane::new();
        sim.defer("slow");

        let binding = attrs(&[]);
        let create = sim.create("slow", "cluster", &binding);
        let timed_out = tokio::time::timeout(Duration::from_millis(50), create).await;
        assert!(timed_out.is_err());

        // The resource exists even though the call never answered.
        let described = sim.describe("slow", "cluster").await.unwrap();
        assert!(described.is_some());
    }
}
