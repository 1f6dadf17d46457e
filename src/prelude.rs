//! # Prelude
//!
//! Re-exports the types most callers need.
//!
//! ```rust
//! use azure_cluster_operator::prelude::*;
//! ```

pub use crate::crd::*;

pub use crate::azure::{ClusterAutoscaler, DeploymentsClient, ScaleSetsClient, VmCapabilities};

pub use crate::controller::{
    Collaborators, Context, MasterReconciler, NodePoolReconciler, ReconcilerError,
    MASTER_MACHINE, NODE_POOL_MACHINE,
};

pub use crate::config::ControllerConfig;

pub use crate::statemachine::{MachineState, NextAction, StateMachine, TransitionGraph};
pub use crate::status::{MemoryStatusStore, StatusKey, StatusStore, StatusStoreError, TargetRef};
