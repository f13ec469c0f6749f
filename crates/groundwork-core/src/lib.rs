//! groundwork core model
//!
//! Declarative resource descriptors and the dependency graph derived from
//! them. A stack declares *what* should exist; the graph decides a valid
//! order; the orchestrator in `groundwork-cloud` carries the operations out.
//!
//! ```text
//! Stack ──▶ DependencyGraph ──▶ plan ──▶ execute
//!   descriptors      DAG         diff     control plane
//! ```
//!
//! References between resources are explicit [`Reference`] values embedded in
//! attribute trees, never strings scanned after the fact, so graph
//! construction is a pure function over the descriptors.

pub mod error;
pub mod graph;
pub mod model;

// Re-exports
pub use error::{GraphError, Result};
pub use graph::{DependencyGraph, EdgeKind};
pub use model::{AttrValue, Reference, ResourceDescriptor, Stack, StackExport};
