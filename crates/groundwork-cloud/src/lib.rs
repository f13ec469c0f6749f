//! groundwork orchestrator core
//!
//! Turns a declarative stack of resource descriptors into an ordered,
//! idempotent sequence of operations against a remote control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 groundwork CLI                   │
//! │             (ground plan/apply/destroy)          │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               groundwork-cloud                   │
//! │  ┌──────────┐ ┌───────────┐ ┌────────────────┐  │
//! │  │   Plan   │ │ Execution │ │   State Store  │  │
//! │  │  Engine  │ │  Engine   │ │ (.groundwork/) │  │
//! │  └──────────┘ └─────┬─────┘ └────────────────┘  │
//! │                     │ trait ControlPlane         │
//! └─────────────────────┼───────────────────────────┘
//!                       │
//!               ┌───────▼───────┐
//!               │  binding, e.g │
//!               │ cloud-sim/aws │
//!               └───────────────┘
//! ```
//!
//! Graph and plan errors abort before any remote mutation; execution
//! failures finish independent branches, then roll back what completed.

pub mod action;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{
    ApplyResult, ChangeSet, ChangeSetSummary, OpKind, Operation, Outcome, ResourceOutcome,
};
pub use error::{CloudError, Result};
pub use executor::{ExecuteOptions, ExecutionEngine};
pub use orchestrator::Orchestrator;
pub use plan::{PlanEngine, UpdatePolicy};
pub use provider::{ControlPlane, Created, Described, Outputs, ResolvedAttrs};
pub use state::{ResourceRecord, ResourceStatus, StackState, StateLock, StateManager};
