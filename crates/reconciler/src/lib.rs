//! K8s-style reconciliation of `KoBuilder` resources.
//!
//! Each `KoBuilder` is converged onto two owned objects:
//!
//! - **ConfigMap** `<name>-config`: the build parameters as environment
//!   variables
//! - **Job** `<name>-job`: one run of the ko builder image reading that
//!   ConfigMap
//!
//! # Key Concepts
//!
//! ## Reconciliation
//!
//! Every pass:
//! 1. Reads the builder (a missing builder is a no-op)
//! 2. Creates the ConfigMap, or overwrites it on drift and marks the
//!    builder `Updated`
//! 3. Mirrors the Job's counters into the builder state and deletes a
//!    finished Job
//! 4. Creates the Job only if the builder never ran or was just `Updated`
//!
//! ## Stores
//!
//! The `Reconciler` talks to an `ArtifactStore`. `KubeStore` is backed by
//! the API server; `InMemoryStore` is for tests and `render`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ko_reconciler::{InMemoryStore, ObjectKey, ReconcilerBuilder};
//!
//! #[tokio::main]
//! async fn main() -> ko_reconciler::Result<()> {
//!     let store = InMemoryStore::new_arc();
//!     let reconciler = ReconcilerBuilder::new().with_store(store).build()?;
//!     let result = reconciler.reconcile(&ObjectKey::new("builds", "my-build")).await?;
//!     assert!(result.converged());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod desired;
pub mod error;
pub mod kube_store;
pub mod memory;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod types;

// Re-export main types
pub use error::{Error, Result};
pub use kube_store::KubeStore;
pub use memory::{InMemoryStore, StoreOpKind, StoreWrite};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use status::{JobCounters, Transition};
pub use store::ArtifactStore;
pub use types::{ArtifactKind, ObjectKey, ReconcileAction, ReconcileResult};
