//! Remote control plane trait definition

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Output attributes reported by the remote system for one resource
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// Attribute bag with every reference already substituted
pub type ResolvedAttrs = BTreeMap<String, serde_json::Value>;

/// Remote control plane abstraction
///
/// The orchestrator drives every mutation through this trait; concrete
/// bindings (one per remote system) implement it. Bindings are expected to
/// be able to look a resource up by the orchestrator's logical id — for
/// example by tagging remote resources with it at creation time — so that
/// [`describe`](ControlPlane::describe) can recover from an operation whose
/// response was lost but whose effect landed.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Binding name (e.g. "sim", "aws")
    fn name(&self) -> &str;

    /// Display name for UI
    fn display_name(&self) -> &str;

    /// Create a resource; returns the remote identifier and its outputs
    async fn create(
        &self,
        resource: &str,
        resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> Result<Created>;

    /// Update an existing resource in place; returns refreshed outputs
    async fn update(
        &self,
        remote_id: &str,
        resource_type: &str,
        attributes: &ResolvedAttrs,
    ) -> Result<Outputs>;

    /// Delete a resource
    async fn delete(&self, remote_id: &str, resource_type: &str) -> Result<()>;

    /// Look a resource up by logical id; `None` when it does not exist
    async fn describe(&self, resource: &str, resource_type: &str) -> Result<Option<Described>>;
}

/// Result of a successful create
#[derive(Debug, Clone)]
pub struct Created {
    /// Identifier assigned by the remote system
    pub remote_id: String,

    /// Output attributes available once the resource exists
    pub outputs: Outputs,
}

/// Result of a describe lookup
#[derive(Debug, Clone)]
pub struct Described {
    pub remote_id: String,
    pub outputs: Outputs,
}
