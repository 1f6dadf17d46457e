//! # Node Pool Reconciler
//!
//! Provisions a worker scale set and replaces its instances with a surge
//! rollout whenever anything but the replica count changes:
//!
//! ```text
//! DeploymentUninitialized ──▶ ScaleUpWorkerVMSS ──▶ CordonOldWorkers ──▶ WaitForWorkersToBecomeReady
//!          ▲                                                                        │
//!          │                                                                        ▼
//! ScaleDownWorkerVMSS ◀── TerminateOldWorkerInstances ◀────────────── DrainOldWorkerNodes
//! ```
//!
//! The scale set grows to twice the desired size, old nodes are cordoned and
//! drained once the new ones joined, old instances are deleted and the scale
//! set shrinks back. A pool never moves while the masters of its cluster are
//! being upgraded.

mod transitions;

pub use transitions::NodePoolGraph;

use crate::controller::context::Collaborators;
use crate::controller::error::ReconcilerError;
use crate::controller::masters::{MasterState, MASTER_MACHINE};
use crate::controller::pipeline;
use crate::crd::AzureNodePool;
use crate::statemachine::{MachineState, NextAction, StateMachine};
use crate::status::{StatusKey, StatusStore, StatusStoreError, TargetRef};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Status slot and metrics name of the node pool state machine
pub const NODE_POOL_MACHINE: &str = "nodepool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodePoolState {
    DeploymentUninitialized,
    ScaleUpWorkerVMSS,
    CordonOldWorkers,
    WaitForWorkersToBecomeReady,
    DrainOldWorkerNodes,
    TerminateOldWorkerInstances,
    ScaleDownWorkerVMSS,
}

impl MachineState for NodePoolState {
    const INITIAL: Self = Self::DeploymentUninitialized;

    fn as_str(&self) -> &'static str {
        match self {
            Self::DeploymentUninitialized => "DeploymentUninitialized",
            Self::ScaleUpWorkerVMSS => "ScaleUpWorkerVMSS",
            Self::CordonOldWorkers => "CordonOldWorkers",
            Self::WaitForWorkersToBecomeReady => "WaitForWorkersToBecomeReady",
            Self::DrainOldWorkerNodes => "DrainOldWorkerNodes",
            Self::TerminateOldWorkerInstances => "TerminateOldWorkerInstances",
            Self::ScaleDownWorkerVMSS => "ScaleDownWorkerVMSS",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "DeploymentUninitialized" => Some(Self::DeploymentUninitialized),
            "ScaleUpWorkerVMSS" => Some(Self::ScaleUpWorkerVMSS),
            "CordonOldWorkers" => Some(Self::CordonOldWorkers),
            "WaitForWorkersToBecomeReady" => Some(Self::WaitForWorkersToBecomeReady),
            "DrainOldWorkerNodes" => Some(Self::DrainOldWorkerNodes),
            "TerminateOldWorkerInstances" => Some(Self::TerminateOldWorkerInstances),
            "ScaleDownWorkerVMSS" => Some(Self::ScaleDownWorkerVMSS),
            _ => None,
        }
    }
}

/// Worker scale set reconciler
pub struct NodePoolReconciler {
    machine: StateMachine<NodePoolGraph>,
    store: Arc<dyn StatusStore<AzureNodePool>>,
    collaborators: Collaborators,
}

impl std::fmt::Debug for NodePoolReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePoolReconciler")
            .field("machine", &self.machine.name())
            .finish_non_exhaustive()
    }
}

impl NodePoolReconciler {
    pub fn new(collaborators: Collaborators, drain_timeout: Duration) -> Self {
        Self {
            store: Arc::clone(&collaborators.node_pool_status),
            machine: StateMachine::new(
                NODE_POOL_MACHINE,
                NodePoolGraph::new(collaborators.clone(), drain_timeout),
            ),
            collaborators,
        }
    }

    pub fn name(&self) -> &'static str {
        self.machine.name()
    }

    /// Whether the masters of the pool's cluster are being upgraded
    async fn masters_upgrading(&self, node_pool: &AzureNodePool) -> Result<bool, ReconcilerError> {
        let target = TargetRef::of(node_pool);
        let control_plane = TargetRef::new(target.namespace, &node_pool.spec.control_plane_ref);
        let token = match self
            .collaborators
            .master_status
            .get(&control_plane, MASTER_MACHINE, StatusKey::State)
            .await
        {
            Ok(token) => token,
            Err(StatusStoreError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(token.as_deref().and_then(MasterState::from_token)
            == Some(MasterState::MasterInstancesUpgrading))
    }

    /// Run one pass: the master upgrade gate, a state machine step, then the
    /// status summary
    ///
    /// # Errors
    /// Returns transition and status store failures
    pub async fn ensure_created(
        &self,
        node_pool: &AzureNodePool,
    ) -> Result<NextAction, ReconcilerError> {
        if self.masters_upgrading(node_pool).await? {
            info!(
                node_pool = %TargetRef::of(node_pool),
                control_plane = %node_pool.spec.control_plane_ref,
                "Masters are being upgraded, node pool waits"
            );
            return Ok(NextAction::StopPipeline);
        }

        let outcome = pipeline::step(&self.machine, self.store.as_ref(), node_pool).await?;
        if outcome.next_action == NextAction::StopPipeline {
            return Ok(NextAction::StopPipeline);
        }

        let ready = outcome.state == NodePoolState::DeploymentUninitialized
            && self
                .collaborators
                .deployments
                .get(&node_pool.spec.resource_group, &node_pool.deployment_name())
                .await
                .context("fetching worker deployment")?
                .is_some_and(|d| d.provisioning_state.is_succeeded());
        pipeline::summarize(
            self.store.as_ref(),
            node_pool,
            self.machine.name(),
            outcome.state.as_str(),
            ready,
        )
        .await?;
        Ok(NextAction::Continue)
    }

    /// Remove the pool's deployment record, scale set and drain requests
    ///
    /// # Errors
    /// Returns Azure and Kubernetes API failures; absent resources are not errors
    pub async fn ensure_deleted(&self, node_pool: &AzureNodePool) -> Result<(), ReconcilerError> {
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let vmss = node_pool.scale_set_name();

        self.collaborators
            .deployments
            .delete(&spec.resource_group, &node_pool.deployment_name())
            .await
            .context("deleting worker deployment")?;
        self.collaborators
            .scale_sets
            .delete(&spec.resource_group, &vmss)
            .await
            .context("deleting worker scale set")?;
        self.collaborators
            .drains
            .delete_all(&target.namespace, &spec.cluster_id, &target.name)
            .await?;

        info!(node_pool = %target, vmss = %vmss, "Node pool resources deleted");
        Ok(())
    }
}
