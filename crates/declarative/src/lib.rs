//! # Declarative
//!
//! A dependency-ordered provisioning engine.
//!
//! Resources are declared as nodes whose inputs may reference other nodes'
//! outputs. The engine derives a dependency graph from those references,
//! diffs the declarations against the last-applied state, and applies the
//! resulting plan through pluggable providers with bounded parallelism.
//!
//! ## Core Concepts
//!
//! - **ResourceNode**: a declared resource with (possibly referencing) inputs
//! - **Graph**: the validated dependency graph (no cycles, no dangling references)
//! - **Plan**: ordered create/update/delete/no-op operations
//! - **Executor**: applies a plan, retrying transient provider errors
//! - **StateStore**: last-applied inputs and outputs per resource
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AttrValue, AutoConfirm, Executor, FileStateStore, NoProgress, ResourceNode,
//!     build_graph,
//! };
//!
//! let graph = build_graph(vec![
//!     ResourceNode::new("secret", "core:data").literal("secretId", "config"),
//!     ResourceNode::new("secret-version", "core:data")
//!         .input("secret", AttrValue::reference("secret", "id"))
//!         .literal("secretData", "{}"),
//! ])?;
//!
//! let store = FileStateStore::new(".strata/dev");
//! let executor = Executor::new(&providers, &store);
//! let outcome = executor.converge(&graph, &mut NoProgress, &mut AutoConfirm)?;
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`ResourceProvider`]: performs create/update/delete for a resource family
//! - [`StateStore`]: persists state records
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific clouds, storage backends or UI frameworks.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod state;
pub mod types;
pub mod value;

// Re-export main types at crate root
pub use context::{
    AutoConfirm, AutoDecline, CancellationToken, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{AttributeChange, DiffSummary, InputDiff, group_by_type};
pub use error::{Error, ErrorCategory, ProviderError, Result};
pub use executor::{Convergence, Executor};
pub use graph::{Graph, build as build_graph};
pub use node::{NodeStatus, ResourceNode};
pub use planner::{Operation, OperationKind, Plan, plan, plan_with_state};
pub use provider::{Inputs, Outputs, ProviderRegistry, ResourceProvider, family_of};
pub use retry::{RetryConfig, RetryError, with_retry};
pub use state::{FileStateStore, MemoryStateStore, SCHEMA_VERSION, StateRecord, StateStore};
pub use types::{ApplyResult, ExecuteOptions, ExecuteSummary, FailureChain, OperationReport};
pub use value::{AttrValue, Computed, Reference, ResolveError};
