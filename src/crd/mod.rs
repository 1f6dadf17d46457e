//! # Custom Resource Definitions
//!
//! Resource types the operator reads and writes.
//!
//! ## Module Structure
//!
//! - `control_plane.rs` - `AzureControlPlane`, the master scale set descriptor
//! - `node_pool.rs` - `AzureNodePool`, a worker scale set descriptor
//! - `status.rs` - Status shared by both, including per-reconciler state machine slots
//! - `drain.rs` - `NodeDrainRequest`, served by the external drain controller
//! - `release.rs` - `Release`, the cluster-scoped release metadata

mod control_plane;
mod drain;
mod node_pool;
mod release;
mod status;

pub use control_plane::{AzureControlPlane, AzureControlPlaneSpec};
pub use drain::{
    NodeDrainRequest, NodeDrainRequestSpec, NodeDrainRequestStatus, CONDITION_DRAINED,
    CONDITION_TIMED_OUT,
};
pub use node_pool::{AzureNodePool, AzureNodePoolSpec};
pub use release::{Release, ReleaseComponent, ReleaseSpec};
pub use status::{
    Condition, ReconcileStatus, StateMachineStatus, StatusCarrier, CONDITION_READY,
};
