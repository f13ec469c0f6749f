//! Persisted stack state
//!
//! Tracks, per stack, the last-applied descriptor and live remote identity of
//! every resource. The execution engine persists after each completed
//! operation, so a crash mid-apply leaves a loadable state whose records
//! reflect exactly the operations that finished.

use crate::error::{CloudError, Result};
use crate::provider::Outputs;
use chrono::{DateTime, Utc};
use groundwork_core::ResourceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".groundwork";

/// Lifecycle status of a tracked resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Declared but not yet applied
    Pending,
    /// Create in flight
    Creating,
    /// Materialized and current
    Active,
    /// Update in flight
    Updating,
    /// Last operation failed; needs attention
    Failed,
    /// Removed from the remote system
    Deleted,
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Creating => write!(f, "creating"),
            ResourceStatus::Active => write!(f, "active"),
            ResourceStatus::Updating => write!(f, "updating"),
            ResourceStatus::Failed => write!(f, "failed"),
            ResourceStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// State of a single resource within a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Last-applied descriptor, references left unresolved
    pub descriptor: ResourceDescriptor,

    /// Identifier assigned by the remote system, once materialized
    pub remote_id: Option<String>,

    /// Outputs reported by the remote system
    pub outputs: Outputs,

    pub status: ResourceStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        let now = Utc::now();
        Self {
            descriptor,
            remote_id: None,
            outputs: Outputs::new(),
            status: ResourceStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_remote(mut self, remote_id: impl Into<String>, outputs: Outputs) -> Self {
        self.remote_id = Some(remote_id.into());
        self.outputs = outputs;
        self
    }

    /// True once the remote system has assigned this resource an identity
    pub fn is_materialized(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Everything persisted for one stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State layout version
    pub version: u32,

    /// Owning stack name
    pub stack: String,

    pub updated_at: DateTime<Utc>,

    /// Records keyed by descriptor id
    pub resources: HashMap<String, ResourceRecord>,
}

impl StackState {
    pub fn new(stack: impl Into<String>) -> Self {
        Self {
            version: STATE_VERSION,
            stack: stack.into(),
            updated_at: Utc::now(),
            resources: HashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(id)
    }

    pub fn set(&mut self, id: impl Into<String>, record: ResourceRecord) {
        self.resources.insert(id.into(), record);
        self.updated_at = Utc::now();
    }

    pub fn remove(&mut self, id: &str) -> Option<ResourceRecord> {
        let removed = self.resources.remove(id);
        if removed.is_some() {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Records that still exist remotely (everything not `deleted`)
    pub fn live(&self) -> impl Iterator<Item = (&String, &ResourceRecord)> {
        self.resources
            .iter()
            .filter(|(_, record)| record.status != ResourceStatus::Deleted)
    }

    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }
}

/// Reads and writes per-stack state files under `.groundwork/`
pub struct StateManager {
    project_root: PathBuf,
}

impl StateManager {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.project_root.join(STATE_DIR)
    }

    fn state_path(&self, stack: &str) -> PathBuf {
        self.state_dir().join(format!("{stack}.state.json"))
    }

    fn backup_path(&self, stack: &str) -> PathBuf {
        self.state_dir().join(format!("{stack}.state.json.backup"))
    }

    fn lock_path(&self, stack: &str) -> PathBuf {
        self.state_dir().join(format!("{stack}.lock.json"))
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }
        Ok(())
    }

    /// Load a stack's state; a missing file yields an empty state
    pub async fn load(&self, stack: &str) -> Result<StackState> {
        let path = self.state_path(stack);
        if !path.exists() {
            tracing::debug!(stack, "State file not found, returning empty state");
            return Ok(StackState::new(stack));
        }

        let content = fs::read_to_string(&path).await?;
        let state: StackState = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(CloudError::StateError(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(stack, resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Persist a stack's state atomically.
    ///
    /// The previous snapshot is kept as a backup; the new one is written to a
    /// temporary file and renamed into place, so readers never observe a torn
    /// file.
    pub async fn save(&self, state: &StackState) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path(&state.stack);
        let backup = self.backup_path(&state.stack);

        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::copy(&path, &backup).await?;
        }

        let temp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&temp, content).await?;
        fs::rename(&temp, &path).await?;

        tracing::debug!(
            stack = %state.stack,
            resources = state.resources.len(),
            "Saved state"
        );
        Ok(())
    }

    /// Acquire the per-stack lock for exclusive access
    pub async fn acquire_lock(&self, stack: &str) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path(stack);

        if lock_path.exists() {
            let content = fs::read_to_string(&lock_path).await?;
            let lock_info: LockInfo = serde_json::from_str(&content)?;

            // A holder that died mid-run leaves its lock behind; accept
            // takeover only after the staleness window.
            let age = Utc::now().signed_duration_since(lock_info.acquired_at);
            if age.num_hours() < 1 {
                return Err(CloudError::LockError(format!(
                    "Stack '{}' is locked by {} since {}",
                    stack, lock_info.holder, lock_info.acquired_at
                )));
            }

            tracing::warn!(stack, holder = %lock_info.holder, "Removing stale lock");
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };

        let content = serde_json::to_string_pretty(&lock_info)?;
        fs::write(&lock_path, content).await?;

        tracing::debug!(stack, "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }
}

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the per-stack state lock
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// Release the lock
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            // Synchronous cleanup in drop - not ideal but necessary
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
