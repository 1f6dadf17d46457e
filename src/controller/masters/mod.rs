//! # Master Reconciler
//!
//! Provisions the control plane's master scale set through an ARM deployment
//! and rolls master instances one at a time when the cluster release moves
//! forward.
//!
//! ```text
//! Empty / DeploymentUninitialized ──▶ DeploymentInitialized ──▶ ProvisioningSuccessful
//!        ▲            ▲                      │ failed                    │
//!        │            └──────────────────────┘                           ▼
//!        │                               ClusterUpgradeRequirementCheck
//!        │ drift / deployment gone           │                  │
//!        │                                   ▼                  │
//!        │                        MasterInstancesUpgrading      │
//!        │                                   │                  │
//!        └────────────────────────── DeploymentCompleted ◀──────┘
//! ```

mod transitions;

pub use transitions::MasterGraph;

use crate::controller::context::Collaborators;
use crate::controller::error::ReconcilerError;
use crate::controller::pipeline;
use crate::crd::AzureControlPlane;
use crate::statemachine::{MachineState, NextAction, StateMachine};
use crate::status::StatusStore;
use std::sync::Arc;
use tracing::info;

/// Status slot and metrics name of the master state machine
pub const MASTER_MACHINE: &str = "masters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterState {
    Empty,
    DeploymentUninitialized,
    DeploymentInitialized,
    ProvisioningSuccessful,
    ClusterUpgradeRequirementCheck,
    MasterInstancesUpgrading,
    DeploymentCompleted,
}

impl MachineState for MasterState {
    const INITIAL: Self = Self::Empty;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::DeploymentUninitialized => "DeploymentUninitialized",
            Self::DeploymentInitialized => "DeploymentInitialized",
            Self::ProvisioningSuccessful => "ProvisioningSuccessful",
            Self::ClusterUpgradeRequirementCheck => "ClusterUpgradeRequirementCheck",
            Self::MasterInstancesUpgrading => "MasterInstancesUpgrading",
            Self::DeploymentCompleted => "DeploymentCompleted",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "" => Some(Self::Empty),
            "DeploymentUninitialized" => Some(Self::DeploymentUninitialized),
            "DeploymentInitialized" => Some(Self::DeploymentInitialized),
            "ProvisioningSuccessful" => Some(Self::ProvisioningSuccessful),
            "ClusterUpgradeRequirementCheck" => Some(Self::ClusterUpgradeRequirementCheck),
            "MasterInstancesUpgrading" => Some(Self::MasterInstancesUpgrading),
            "DeploymentCompleted" => Some(Self::DeploymentCompleted),
            _ => None,
        }
    }
}

/// Control plane reconciler
pub struct MasterReconciler {
    machine: StateMachine<MasterGraph>,
    store: Arc<dyn StatusStore<AzureControlPlane>>,
}

impl std::fmt::Debug for MasterReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterReconciler")
            .field("machine", &self.machine.name())
            .finish_non_exhaustive()
    }
}

impl MasterReconciler {
    pub fn new(collaborators: Collaborators) -> Self {
        let store = Arc::clone(&collaborators.master_status);
        Self {
            machine: StateMachine::new(MASTER_MACHINE, MasterGraph::new(collaborators)),
            store,
        }
    }

    pub fn name(&self) -> &'static str {
        self.machine.name()
    }

    /// Run one pass: a state machine step, then the status summary
    ///
    /// # Errors
    /// Returns transition and status store failures
    pub async fn ensure_created(
        &self,
        control_plane: &AzureControlPlane,
    ) -> Result<NextAction, ReconcilerError> {
        let outcome = pipeline::step(&self.machine, self.store.as_ref(), control_plane).await?;
        if outcome.next_action == NextAction::StopPipeline {
            return Ok(NextAction::StopPipeline);
        }
        let ready = outcome.state == MasterState::DeploymentCompleted;
        pipeline::summarize(
            self.store.as_ref(),
            control_plane,
            self.machine.name(),
            outcome.state.as_str(),
            ready,
        )
        .await?;
        Ok(NextAction::Continue)
    }

    /// Master resources are removed together with the cluster resource group
    ///
    /// # Errors
    /// Never fails; kept fallible for symmetry with the node pool reconciler
    pub async fn ensure_deleted(
        &self,
        control_plane: &AzureControlPlane,
    ) -> Result<(), ReconcilerError> {
        info!(
            cluster = %control_plane.spec.cluster_id,
            "Master resources are deleted with the resource group, nothing to do"
        );
        Ok(())
    }
}
