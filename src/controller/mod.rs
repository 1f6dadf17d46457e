//! # Controller
//!
//! Reconcilers for the two owned resources and the pieces they share.
//!
//! - `backoff`: Fibonacci backoff for failing passes
//! - `context`: collaborators and per-resource backoff state
//! - `deployment`: ARM deployment descriptors and checksums
//! - `instances`: old/new classification of scale set instances
//! - `masters`: `AzureControlPlane` reconciler
//! - `nodepool`: `AzureNodePool` reconciler with the surge rollout
//! - `pipeline`: steps of one reconciliation pass
//! - `transient`: Azure failures that leave the state unchanged
//! - `version`: release version ordering

pub mod backoff;
pub mod context;
pub mod deployment;
pub mod error;
pub mod instances;
pub mod masters;
pub mod nodepool;
pub mod pipeline;
pub mod transient;
pub mod version;

#[cfg(test)]
pub(crate) mod fixtures;

pub use context::{Collaborators, Context};
pub use error::ReconcilerError;
pub use masters::{MasterReconciler, MASTER_MACHINE};
pub use nodepool::{NodePoolReconciler, NODE_POOL_MACHINE};
