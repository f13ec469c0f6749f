#![allow(dead_code)] // not every test binary exercises every helper

//! In-memory control plane used by the executor and orchestrator tests.
//!
//! Behaves like a small remote system: resources are indexed by the
//! orchestrator's logical id (the way a real binding would tag them),
//! remote ids are sequential, and failures/latency can be injected per
//! logical id.

use async_trait::async_trait;
use groundwork_cloud::{
    CloudError, ControlPlane, Created, Described, Outputs, ResolvedAttrs, Result,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct FakeResource {
    pub remote_id: String,
    pub resource_type: String,
    pub attributes: ResolvedAttrs,
}

pub struct FakeControlPlane {
    resources: Mutex<HashMap<String, FakeResource>>,
    remote_index: Mutex<HashMap<String, String>>,
    fail_create: Mutex<HashSet<String>>,
    fail_update: Mutex<HashSet<String>>,
    defer_create: Mutex<HashSet<String>>,
    latency: Mutex<HashMap<String, Duration>>,
    counter: AtomicU64,
    calls: Mutex<Vec<String>>,
    /// Notified when a create call begins; lets tests time cancellation
    pub create_started: Arc<Notify>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            remote_index: Mutex::new(HashMap::new()),
            fail_create: Mutex::new(HashSet::new()),
            fail_update: Mutex::new(HashSet::new()),
            defer_create: Mutex::new(HashSet::new()),
            latency: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            calls: Mutex::new(Vec::new()),
            create_started: Arc::new(Notify::new()),
        }
    }

    /// Make `create` fail for a logical id
    pub fn fail_create(&self, resource: &str) {
        self.fail_create.lock().unwrap().insert(resource.to_string());
    }

    /// Make `update` fail for a logical id
    pub fn fail_update(&self, resource: &str) {
        self.fail_update.lock().unwrap().insert(resource.to_string());
    }

    /// Make `create` land the resource but stall past any reasonable
    /// timeout before answering
    pub fn defer_create(&self, resource: &str) {
        self.defer_create.lock().unwrap().insert(resource.to_string());
    }

    /// Add artificial latency to every call touching a logical id
    pub fn latency(&self, resource: &str, duration: Duration) {
        self.latency.lock().unwrap().insert(resource.to_string(), duration);
    }

    /// Pre-populate a resource, as if created by an earlier run
    pub fn seed(
        &self,
        resource: &str,
        remote_id: &str,
        resource_type: &str,
        attributes: ResolvedAttrs,
    ) {
        self.resources.lock().unwrap().insert(
            resource.to_string(),
            FakeResource {
                remote_id: remote_id.to_string(),
                resource_type: resource_type.to_string(),
                attributes,
            },
        );
        self.remote_index
            .lock()
            .unwrap()
            .insert(remote_id.to_string(), resource.to_string());
    }

    pub fn get(&self, resource: &str) -> Option<FakeResource> {
        self.resources.lock().unwrap().get(resource).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.lock().unwrap().len()
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first call matching `entry`, for ordering assertions
    pub fn call_index(&self, entry: &str) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == entry)
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn configured_latency(&self, resource: &str) -> Option<Duration> {
        self.latency.lock().unwrap().get(resource).copied()
    }

    fn logical_of(&self, remote_id: &str) -> Option<String> {
        self.remote_index.lock().unwrap().get(remote_id).cloned()
    }

    fn outputs_for(remote_id: &str, attributes: &ResolvedAttrs) -> Outputs {
        let mut outputs: Outputs = attributes.clone();
        outputs.insert("id".to_string(), serde_json::json!(remote_id));
        outputs
    }
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn name(&self) -> &str {
        "fake"
    }

    fn display_name(&self) -> &str {
        "Fake control plane"
    }

    async fn create(
        &self,
        resource: &str,
        resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> Result<Created> {
        self.record_call(format!("create {resource}"));
        self.create_started.notify_one();

        if let Some(latency) = self.configured_latency(resource) {
            tokio::time::sleep(latency).await;
        }
        if self.fail_create.lock().unwrap().contains(resource) {
            return Err(CloudError::RemoteOperation {
                resource: resource.to_string(),
                message: "injected create failure".to_string(),
            });
        }

        let remote_id = format!(
            "r-{}-{}",
            resource_type,
            self.counter.fetch_add(1, Ordering::SeqCst)
        );
        self.seed(resource, &remote_id, resource_type, attributes.clone());

        if self.defer_create.lock().unwrap().contains(resource) {
            // The resource landed, but the answer never arrives in time.
            tokio::time::sleep(Duration::from_secs(30)).await;
        }

        Ok(Created {
            outputs: Self::outputs_for(&remote_id, attributes),
            remote_id,
        })
    }

    async fn update(
        &self,
        remote_id: &str,
        _resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> Result<Outputs> {
        let logical = self
            .logical_of(remote_id)
            .ok_or_else(|| CloudError::ResourceNotFound(remote_id.to_string()))?;
        self.record_call(format!("update {logical}"));

        if let Some(latency) = self.configured_latency(&logical) {
            tokio::time::sleep(latency).await;
        }
        if self.fail_update.lock().unwrap().contains(&logical) {
            return Err(CloudError::RemoteOperation {
                resource: logical,
                message: "injected update failure".to_string(),
            });
        }

        let mut resources = self.resources.lock().unwrap();
        let entry = resources
            .get_mut(&logical)
            .ok_or_else(|| CloudError::ResourceNotFound(logical.clone()))?;
        entry.attributes = attributes.clone();
        Ok(Self::outputs_for(remote_id, attributes))
    }

    async fn delete(&self, remote_id: &str, _resource_type: &str) -> Result<()> {
        let logical = self
            .logical_of(remote_id)
            .ok_or_else(|| CloudError::ResourceNotFound(remote_id.to_string()))?;
        self.record_call(format!("delete {logical}"));

        if let Some(latency) = self.configured_latency(&logical) {
            tokio::time::sleep(latency).await;
        }

        self.resources.lock().unwrap().remove(&logical);
        self.remote_index.lock().unwrap().remove(remote_id);
        Ok(())
    }

    async fn describe(&self, resource: &str, _resource_type: &str) -> Result<Option<Described>> {
        self.record_call(format!("describe {resource}"));
        Ok(self.get(resource).map(|found| Described {
            outputs: Self::outputs_for(&found.remote_id, &found.attributes),
            remote_id: found.remote_id,
        }))
    }
}
