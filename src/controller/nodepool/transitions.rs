//! # Node Pool Transitions

use crate::azure::{DeploymentParameters, ScaleSet};
use crate::controller::context::Collaborators;
use crate::controller::deployment::{self, DeploymentDescriptor};
use crate::controller::instances::classify;
use crate::controller::nodepool::{NodePoolState, NODE_POOL_MACHINE};
use crate::controller::transient::remain_on_transient;
use crate::controller::version::ReleaseVersion;
use crate::crd::AzureNodePool;
use crate::statemachine::TransitionGraph;
use crate::status::{StatusKey, TargetRef};
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

const PREMIUM_STORAGE: &str = "Premium_LRS";
const STANDARD_STORAGE: &str = "Standard_LRS";
const REPLICAS_PARAMETER: &str = "replicas";

fn reconciling_version(node_pool: &AzureNodePool) -> anyhow::Result<ReleaseVersion> {
    node_pool
        .spec
        .release_version
        .parse()
        .map_err(anyhow::Error::msg)
        .context("parsing spec.releaseVersion")
}

/// Transition graph of one worker scale set
pub struct NodePoolGraph {
    collaborators: Collaborators,
    drain_timeout: Duration,
}

impl std::fmt::Debug for NodePoolGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePoolGraph")
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}

impl NodePoolGraph {
    pub fn new(collaborators: Collaborators, drain_timeout: Duration) -> Self {
        Self {
            collaborators,
            drain_timeout,
        }
    }

    async fn scale_set(&self, node_pool: &AzureNodePool) -> anyhow::Result<Option<ScaleSet>> {
        self.collaborators
            .scale_sets
            .get(&node_pool.spec.resource_group, &node_pool.scale_set_name())
            .await
            .context("fetching worker scale set")
    }

    /// Storage account type and accelerated networking of the workers
    ///
    /// Values of an existing scale set are kept; a new scale set gets what
    /// the VM size supports.
    async fn disk_and_network(&self, node_pool: &AzureNodePool) -> anyhow::Result<(String, bool)> {
        let existing = self.scale_set(node_pool).await?;
        let storage = existing.as_ref().and_then(|s| s.storage_account_type.clone());
        let accelerated = existing.as_ref().and_then(|s| s.accelerated_networking);
        if let (Some(storage), Some(accelerated)) = (&storage, accelerated) {
            return Ok((storage.clone(), accelerated));
        }

        let capabilities = self
            .collaborators
            .capabilities
            .capabilities(&node_pool.spec.location, &node_pool.spec.vm_size)
            .await
            .context("looking up VM size capabilities")?;
        let storage = storage.unwrap_or_else(|| {
            if capabilities.premium_io {
                PREMIUM_STORAGE
            } else {
                STANDARD_STORAGE
            }
            .to_string()
        });
        Ok((
            storage,
            accelerated.unwrap_or(capabilities.accelerated_networking),
        ))
    }

    async fn desired_deployment(
        &self,
        node_pool: &AzureNodePool,
    ) -> anyhow::Result<DeploymentDescriptor> {
        let spec = &node_pool.spec;
        let release = self
            .collaborators
            .releases
            .components(&spec.release_version)
            .await?;
        let template = self.collaborators.templates.worker_template()?;
        let (storage_account_type, accelerated_networking) =
            self.disk_and_network(node_pool).await?;

        let mut parameters = DeploymentParameters::default();
        parameters.insert("clusterId", spec.cluster_id.as_str());
        parameters.insert("nodePoolId", kube::ResourceExt::name_any(node_pool));
        parameters.insert("location", spec.location.as_str());
        parameters.insert("vmSize", spec.vm_size.as_str());
        parameters.insert(REPLICAS_PARAMETER, spec.replicas);
        parameters.insert("zones", spec.failure_domains.clone());
        parameters.insert("subnetName", spec.subnet_name.as_str());
        parameters.insert("releaseVersion", spec.release_version.as_str());
        parameters.insert("kubernetesVersion", release.kubernetes);
        parameters.insert("imageVersion", release.image);
        parameters.insert("storageAccountType", storage_account_type);
        parameters.insert("acceleratedNetworking", accelerated_networking);

        Ok(DeploymentDescriptor::new(
            node_pool.deployment_name(),
            template,
            parameters,
        ))
    }

    async fn submit(
        &self,
        node_pool: &AzureNodePool,
        descriptor: &DeploymentDescriptor,
    ) -> anyhow::Result<bool> {
        deployment::submit(
            self.collaborators.deployments.as_ref(),
            self.collaborators.node_pool_status.as_ref(),
            &TargetRef::of(node_pool),
            NODE_POOL_MACHINE,
            &node_pool.spec.resource_group,
            descriptor,
        )
        .await
    }

    /// The control plane of the pool is gone or being deleted
    async fn cluster_deleting(&self, node_pool: &AzureNodePool) -> anyhow::Result<bool> {
        let target = TargetRef::of(node_pool);
        let deleting = self
            .collaborators
            .control_planes
            .is_deleting(&target.namespace, &node_pool.spec.control_plane_ref)
            .await
            .context("checking control plane deletion")?;
        if deleting {
            info!(node_pool = %target, "Cluster is being deleted, skipping");
        }
        Ok(deleting)
    }

    async fn deployment_uninitialized(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let desired = self.desired_deployment(node_pool).await?;

        let applied = self
            .collaborators
            .deployments
            .get(&spec.resource_group, &desired.name)
            .await
            .context("fetching worker deployment")?;
        let applied = match applied {
            None => {
                info!(node_pool = %target, deployment = %desired.name, "Creating worker deployment");
                self.submit(node_pool, &desired).await?;
                return Ok(state);
            }
            Some(applied) if applied.provisioning_state.is_terminal_failure() => {
                warn!(
                    node_pool = %target,
                    provisioning_state = %applied.provisioning_state,
                    "Worker deployment failed, resubmitting"
                );
                self.submit(node_pool, &desired).await?;
                return Ok(state);
            }
            Some(applied) if !applied.provisioning_state.is_succeeded() => {
                info!(
                    node_pool = %target,
                    provisioning_state = %applied.provisioning_state,
                    "Worker deployment in progress"
                );
                return Ok(state);
            }
            Some(applied) => applied,
        };

        let stored_template = self
            .collaborators
            .node_pool_status
            .get(&target, NODE_POOL_MACHINE, StatusKey::DeploymentTemplateChecksum)
            .await
            .context("reading deploymentTemplateChecksum")?;
        let template_changed = stored_template.as_deref() != Some(desired.template_checksum().as_str());
        let changed = applied.parameters.changed_keys(&desired.parameters);

        if !template_changed && changed.is_empty() {
            let instances = self
                .collaborators
                .scale_sets
                .list_instances(&spec.resource_group, &node_pool.scale_set_name())
                .await
                .context("listing worker instances")?;
            let stale = instances.iter().filter(|i| !i.latest_model_applied).count();
            if stale == 0 {
                self.collaborators
                    .watchdog
                    .delete_failed_vmss(&spec.resource_group, &node_pool.scale_set_name());
                return Ok(state);
            }
            // Applied by an earlier pass whose rollout was never recorded.
            info!(
                node_pool = %target,
                stale,
                "Worker instances behind the applied deployment, rolling instances"
            );
            if !self.submit(node_pool, &desired).await? {
                return Ok(state);
            }
            return Ok(NodePoolState::ScaleUpWorkerVMSS);
        }

        if !template_changed && changed.iter().all(|k| k == REPLICAS_PARAMETER) {
            info!(node_pool = %target, replicas = spec.replicas, "Resizing worker scale set");
            self.submit(node_pool, &desired).await?;
            return Ok(state);
        }

        info!(
            node_pool = %target,
            template_changed,
            parameters = ?changed,
            "Worker deployment changed, rolling instances"
        );
        if !self.submit(node_pool, &desired).await? {
            return Ok(state);
        }
        Ok(NodePoolState::ScaleUpWorkerVMSS)
    }

    async fn scale_up(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let vmss = node_pool.scale_set_name();

        let deployment = self
            .collaborators
            .deployments
            .get(&spec.resource_group, &node_pool.deployment_name())
            .await
            .context("fetching worker deployment")?;
        match deployment {
            Some(d) if d.provisioning_state.is_succeeded() => {}
            Some(d) if !d.provisioning_state.is_terminal_failure() => {
                info!(node_pool = %target, provisioning_state = %d.provisioning_state, "Worker deployment in progress");
                return Ok(state);
            }
            _ => {
                warn!(node_pool = %target, "Worker deployment missing or failed, starting over");
                return Ok(NodePoolState::DeploymentUninitialized);
            }
        }

        let instances = self
            .collaborators
            .scale_sets
            .list_instances(&spec.resource_group, &vmss)
            .await
            .context("listing worker instances")?;
        if instances
            .iter()
            .any(|i| i.provisioning_state.is_terminal_failure())
        {
            warn!(node_pool = %target, vmss = %vmss, "Failed worker instances, guarding scale set");
            self.collaborators
                .watchdog
                .guard_vmss(&spec.resource_group, &vmss);
            return Ok(state);
        }
        if let Some(busy) = instances
            .iter()
            .find(|i| !i.provisioning_state.is_succeeded())
        {
            info!(
                node_pool = %target,
                instance_id = %busy.instance_id,
                provisioning_state = %busy.provisioning_state,
                "Waiting for worker instances"
            );
            return Ok(state);
        }

        self.collaborators
            .autoscaler
            .disable(&spec.resource_group, &vmss)
            .await
            .context("disabling cluster autoscaler")?;

        let surge = spec
            .replicas
            .checked_mul(2)
            .with_context(|| format!("surge capacity for {} replicas overflows", spec.replicas))?;
        let capacity = self.scale_set(node_pool).await?.map(|s| s.capacity);
        if capacity != Some(surge) {
            info!(node_pool = %target, vmss = %vmss, capacity = surge, "Scaling worker scale set up");
            self.collaborators
                .scale_sets
                .set_capacity(&spec.resource_group, &vmss, surge)
                .await
                .context("scaling worker scale set up")?;
            return Ok(state);
        }
        if instances.len() != surge as usize {
            info!(
                node_pool = %target,
                instances = instances.len(),
                capacity = surge,
                "Waiting for surge instances"
            );
            return Ok(state);
        }
        Ok(NodePoolState::CordonOldWorkers)
    }

    async fn cordon_old_workers(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let reconciling = reconciling_version(node_pool)?;

        let Some((client, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };
        let instances = self
            .collaborators
            .scale_sets
            .list_instances(&spec.resource_group, &node_pool.scale_set_name())
            .await
            .context("listing worker instances")?;
        let classification = classify(&instances, &nodes, &reconciling);
        if classification.new.len() < classification.old.len() {
            info!(
                node_pool = %target,
                old = classification.old.len(),
                new = classification.new.len(),
                "Not enough new workers yet"
            );
            return Ok(state);
        }

        let by_name: HashMap<&str, bool> = nodes
            .iter()
            .map(|n| (n.name.as_str(), n.unschedulable))
            .collect();
        let mut cordoned = 0;
        for old in &classification.old {
            if by_name.get(old.node_name.as_str()).copied().unwrap_or(true) {
                continue;
            }
            client
                .cordon(&old.node_name)
                .await
                .with_context(|| format!("cordoning node {}", old.node_name))?;
            info!(node_pool = %target, node = %old.node_name, "Cordoned old worker");
            cordoned += 1;
        }
        if cordoned > 0 {
            return Ok(state);
        }
        Ok(NodePoolState::WaitForWorkersToBecomeReady)
    }

    async fn wait_for_workers(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        let target = TargetRef::of(node_pool);
        let Some((_, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &node_pool.spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };
        if nodes.iter().any(|n| n.has_role("worker") && n.ready) {
            return Ok(NodePoolState::DrainOldWorkerNodes);
        }
        info!(node_pool = %target, "Waiting for a Ready worker node");
        Ok(state)
    }

    async fn request_drain(
        &self,
        target: &TargetRef,
        cluster_id: &str,
        node: &str,
    ) -> anyhow::Result<()> {
        self.collaborators
            .drains
            .create(&target.namespace, cluster_id, &target.name, node, self.drain_timeout)
            .await
    }

    async fn drain_old_workers(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        if self.cluster_deleting(node_pool).await? {
            return Ok(state);
        }
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let reconciling = reconciling_version(node_pool)?;

        let Some((_, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };
        let instances = self
            .collaborators
            .scale_sets
            .list_instances(&spec.resource_group, &node_pool.scale_set_name())
            .await
            .context("listing worker instances")?;
        let classification = classify(&instances, &nodes, &reconciling);

        let drains = &self.collaborators.drains;
        let requests = drains
            .list(&target.namespace, &spec.cluster_id, &target.name)
            .await?;
        let by_node: HashMap<&str, _> = requests
            .iter()
            .map(|r| (r.spec.node_name.as_str(), r))
            .collect();

        let mut pending = 0;
        for old in &classification.old {
            let node = old.node_name.as_str();
            match by_node.get(node) {
                None => {
                    self.request_drain(&target, &spec.cluster_id, node).await?;
                    info!(node_pool = %target, node, "Requested drain");
                    pending += 1;
                }
                Some(request) if request.is_timed_out() => {
                    warn!(node_pool = %target, node, "Drain timed out, requesting again");
                    drains
                        .delete(&target.namespace, &kube::ResourceExt::name_any(*request))
                        .await?;
                    self.request_drain(&target, &spec.cluster_id, node).await?;
                }
                Some(request) if request.is_drained() => {}
                Some(_) => pending += 1,
            }
        }
        if pending > 0 {
            info!(node_pool = %target, pending, "Waiting for old workers to drain");
            return Ok(state);
        }

        drains
            .delete_all(&target.namespace, &spec.cluster_id, &target.name)
            .await?;
        Ok(NodePoolState::TerminateOldWorkerInstances)
    }

    async fn terminate_old_instances(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        if self.cluster_deleting(node_pool).await? {
            return Ok(state);
        }
        let spec = &node_pool.spec;
        let target = TargetRef::of(node_pool);
        let vmss = node_pool.scale_set_name();
        let reconciling = reconciling_version(node_pool)?;

        let Some((_, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };
        let instances = self
            .collaborators
            .scale_sets
            .list_instances(&spec.resource_group, &vmss)
            .await
            .context("listing worker instances")?;
        let old_ids = classify(&instances, &nodes, &reconciling).old_instance_ids();
        if !old_ids.is_empty() {
            info!(node_pool = %target, vmss = %vmss, instances = ?old_ids, "Deleting old worker instances");
            self.collaborators
                .scale_sets
                .delete_instances(&spec.resource_group, &vmss, &old_ids)
                .await
                .context("deleting old worker instances")?;
        }
        Ok(NodePoolState::ScaleDownWorkerVMSS)
    }

    async fn scale_down(&self, node_pool: &AzureNodePool) -> anyhow::Result<NodePoolState> {
        let spec = &node_pool.spec;
        let vmss = node_pool.scale_set_name();
        let (min, max) = node_pool.autoscaler_bounds();

        self.collaborators
            .scale_sets
            .set_capacity(&spec.resource_group, &vmss, spec.replicas)
            .await
            .context("scaling worker scale set down")?;
        self.collaborators
            .autoscaler
            .enable(&spec.resource_group, &vmss, min, max)
            .await
            .context("enabling cluster autoscaler")?;
        info!(node_pool = %TargetRef::of(node_pool), capacity = spec.replicas, "Rolling upgrade finished");
        Ok(NodePoolState::DeploymentUninitialized)
    }
}

#[async_trait]
impl TransitionGraph for NodePoolGraph {
    type Target = AzureNodePool;
    type State = NodePoolState;

    async fn transition(
        &self,
        node_pool: &AzureNodePool,
        state: NodePoolState,
    ) -> anyhow::Result<NodePoolState> {
        let result = match state {
            NodePoolState::DeploymentUninitialized => {
                self.deployment_uninitialized(node_pool, state).await
            }
            NodePoolState::ScaleUpWorkerVMSS => self.scale_up(node_pool, state).await,
            NodePoolState::CordonOldWorkers => self.cordon_old_workers(node_pool, state).await,
            NodePoolState::WaitForWorkersToBecomeReady => {
                self.wait_for_workers(node_pool, state).await
            }
            NodePoolState::DrainOldWorkerNodes => self.drain_old_workers(node_pool, state).await,
            NodePoolState::TerminateOldWorkerInstances => {
                self.terminate_old_instances(node_pool, state).await
            }
            NodePoolState::ScaleDownWorkerVMSS => self.scale_down(node_pool).await,
        };
        remain_on_transient(&TargetRef::of(node_pool), state, result)
    }
}
