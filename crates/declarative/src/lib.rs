//! # Declarative
//!
//! A framework for declarative resource provisioning.
//!
//! Resources are declared with attribute values that may reference outputs
//! of other resources. The crate turns declarations into a dependency graph,
//! plans the operations that reconcile the graph with recorded state, and
//! applies them in parallel while respecting dependencies.
//!
//! ## Core Concepts
//!
//! - **ResourceGraph**: Declarations plus the edges implied by references
//!   and explicit dependencies, checked for cycles
//! - **ChangeSet**: Ordered create/update/replace/delete/no-op entries
//!   produced by the [`Planner`]
//! - **Executor**: Applies a change set through [`Provider`]s on a bounded
//!   worker pool, skipping dependents of failed resources
//! - **StateStore**: Per-resource records of the last successful apply
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AutoConfirm, Declaration, Executor, MemoryStore, NoProgress, Planner,
//!     ProviderRegistry, Reference, ResourceGraph,
//! };
//!
//! let graph = ResourceGraph::build(vec![
//!     Declaration::new("vpc", "aws:ec2/vpc").with("cidr_block", "10.0.0.0/16"),
//!     Declaration::new("subnet", "aws:ec2/subnet")
//!         .with("vpc_id", Reference::new("vpc", "id")),
//! ])?;
//!
//! let registry = ProviderRegistry::new().with_fallback(my_provider);
//! let store = MemoryStore::new();
//! let changeset = Planner::new(&registry).plan(&graph, &store)?;
//! let report = Executor::new(&registry).execute(
//!     &graph, &changeset, &store, &NoProgress, &mut AutoConfirm,
//! )?;
//! assert!(report.is_success());
//! ```
//!
//! ## Seams
//!
//! - [`Provider`]: Performs remote operations for a resource kind
//! - [`StateStore`]: Persists state records
//! - [`ProgressCallback`]: Receives progress updates from worker threads
//! - [`ConfirmCallback`]: Handles user confirmation before applying
//!
//! This allows the crate to be used without hard dependencies on a
//! specific UI, storage backend or cloud API.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod resource;
pub mod retry;
pub mod state;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::{AttributeChange, DiffSummary, diff_attributes, group_by_kind};
pub use error::{ExecuteError, GraphError, NodeError, PlanError, ProviderError, StateError};
pub use executor::{ApplyReport, Executor, NodeReport};
pub use graph::{DanglingDependency, Edge, ResourceGraph};
pub use planner::{ChangeEntry, ChangeSet, PlanOptions, Planner, ReplacePolicy};
pub use provider::{KindSchema, Provider, ProviderRegistry};
pub use resource::{Declaration, ResourceNode};
pub use retry::{RetryConfig, with_retry};
pub use state::{MemoryStore, StateRecord, StateStore};
pub use types::{
    Attributes, ExecuteOptions, ExecuteSummary, NodeStatus, Operation, Reference, Value,
};
