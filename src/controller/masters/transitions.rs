//! # Master Transitions

use crate::azure::DeploymentParameters;
use crate::controller::context::Collaborators;
use crate::controller::deployment::{self, DeploymentDescriptor};
use crate::controller::instances::{classify, node_version};
use crate::controller::masters::{MasterState, MASTER_MACHINE};
use crate::controller::transient::remain_on_transient;
use crate::controller::version::ReleaseVersion;
use crate::crd::AzureControlPlane;
use crate::kubernetes::TenantNode;
use crate::statemachine::TransitionGraph;
use crate::status::{StatusKey, TargetRef};
use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};

fn is_master(node: &TenantNode) -> bool {
    node.has_role("control-plane") || node.has_role("master")
}

fn reconciling_version(control_plane: &AzureControlPlane) -> anyhow::Result<ReleaseVersion> {
    control_plane
        .spec
        .release_version
        .parse()
        .map_err(anyhow::Error::msg)
        .context("parsing spec.releaseVersion")
}

/// Transition graph of the master scale set
pub struct MasterGraph {
    collaborators: Collaborators,
}

impl std::fmt::Debug for MasterGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterGraph").finish_non_exhaustive()
    }
}

impl MasterGraph {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    async fn desired_deployment(
        &self,
        control_plane: &AzureControlPlane,
    ) -> anyhow::Result<DeploymentDescriptor> {
        let spec = &control_plane.spec;
        let release = self
            .collaborators
            .releases
            .components(&spec.release_version)
            .await?;
        let template = self.collaborators.templates.master_template()?;

        let mut parameters = DeploymentParameters::default();
        parameters.insert("clusterId", spec.cluster_id.as_str());
        parameters.insert("location", spec.location.as_str());
        parameters.insert("vmSize", spec.vm_size.as_str());
        parameters.insert("replicas", spec.replicas);
        parameters.insert("availabilityZones", spec.availability_zones.clone());
        parameters.insert("subnetName", spec.subnet_name.as_str());
        parameters.insert("releaseVersion", spec.release_version.as_str());
        parameters.insert("kubernetesVersion", release.kubernetes);
        parameters.insert("imageVersion", release.image);

        Ok(DeploymentDescriptor::new(
            control_plane.deployment_name(),
            template,
            parameters,
        ))
    }

    async fn stored(&self, target: &TargetRef, key: StatusKey) -> anyhow::Result<Option<String>> {
        self.collaborators
            .master_status
            .get(target, MASTER_MACHINE, key)
            .await
            .with_context(|| format!("reading {}", key.field()))
    }

    async fn deployment_uninitialized(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let spec = &control_plane.spec;
        let target = TargetRef::of(control_plane);

        let available = self
            .collaborators
            .bootstrap
            .is_available(&target.namespace, &spec.cluster_id)
            .await
            .context("checking master bootstrap data")?;
        if !available {
            info!(cluster = %spec.cluster_id, "Master bootstrap data not published yet");
            return Ok(state);
        }

        let descriptor = self.desired_deployment(control_plane).await?;
        let recorded = deployment::submit(
            self.collaborators.deployments.as_ref(),
            self.collaborators.master_status.as_ref(),
            &target,
            MASTER_MACHINE,
            &spec.resource_group,
            &descriptor,
        )
        .await?;
        if !recorded {
            return Ok(state);
        }

        self.collaborators
            .watchdog
            .delete_failed_vmss(&spec.resource_group, &control_plane.scale_set_name());
        Ok(MasterState::DeploymentInitialized)
    }

    async fn deployment_initialized(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let spec = &control_plane.spec;
        let name = control_plane.deployment_name();
        let Some(deployment) = self
            .collaborators
            .deployments
            .get(&spec.resource_group, &name)
            .await
            .context("fetching master deployment")?
        else {
            info!(cluster = %spec.cluster_id, deployment = %name, "Master deployment not found yet");
            return Ok(state);
        };

        if deployment.provisioning_state.is_succeeded() {
            return Ok(MasterState::ProvisioningSuccessful);
        }
        if deployment.provisioning_state.is_terminal_failure() {
            warn!(
                cluster = %spec.cluster_id,
                deployment = %name,
                provisioning_state = %deployment.provisioning_state,
                "Master deployment failed, starting over"
            );
            return Ok(MasterState::Empty);
        }
        info!(
            cluster = %spec.cluster_id,
            provisioning_state = %deployment.provisioning_state,
            "Master deployment in progress"
        );
        Ok(state)
    }

    async fn cluster_upgrade_requirement_check(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let spec = &control_plane.spec;
        let target = TargetRef::of(control_plane);

        if self.stored(&target, StatusKey::CreatedAt).await?.is_none() {
            info!(cluster = %spec.cluster_id, "Cluster is being created, no upgrade needed");
            return Ok(MasterState::DeploymentCompleted);
        }

        let reconciling = reconciling_version(control_plane)?;
        let Some((_, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };

        let outdated = nodes
            .iter()
            .filter(|n| is_master(n))
            .any(|n| node_version(n).is_some_and(|v| v < reconciling));
        if outdated {
            info!(cluster = %spec.cluster_id, release = %reconciling, "Masters need an upgrade");
            Ok(MasterState::MasterInstancesUpgrading)
        } else {
            Ok(MasterState::DeploymentCompleted)
        }
    }

    async fn master_instances_upgrading(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let spec = &control_plane.spec;
        let target = TargetRef::of(control_plane);
        let vmss = control_plane.scale_set_name();
        let reconciling = reconciling_version(control_plane)?;

        let Some((_, nodes)) = self
            .collaborators
            .tenant_nodes(&target.namespace, &spec.cluster_id)
            .await?
        else {
            return Ok(state);
        };
        let masters: Vec<&TenantNode> = nodes.iter().filter(|n| is_master(n)).collect();
        if masters.is_empty() || masters.iter().any(|n| !n.ready) {
            info!(cluster = %spec.cluster_id, "Waiting for every master node to be Ready");
            return Ok(state);
        }

        let instances = self
            .collaborators
            .scale_sets
            .list_instances(&spec.resource_group, &vmss)
            .await
            .context("listing master instances")?;
        if let Some(busy) = instances
            .iter()
            .find(|i| !i.provisioning_state.is_succeeded())
        {
            info!(
                vmss = %vmss,
                instance_id = %busy.instance_id,
                provisioning_state = %busy.provisioning_state,
                "Waiting for master instance operation to finish"
            );
            return Ok(state);
        }

        if let Some(stale) = instances.iter().find(|i| !i.latest_model_applied) {
            info!(vmss = %vmss, instance_id = %stale.instance_id, "Updating master instance model");
            self.collaborators
                .scale_sets
                .update_instances(&spec.resource_group, &vmss, &[stale.instance_id.clone()])
                .await
                .context("updating master instance model")?;
            return Ok(state);
        }

        let classification = classify(&instances, &nodes, &reconciling);
        if let Some(old) = classification.old.first() {
            info!(
                vmss = %vmss,
                instance_id = %old.instance.instance_id,
                node = %old.node_name,
                "Reimaging master instance"
            );
            self.collaborators
                .scale_sets
                .reimage(&spec.resource_group, &vmss, &[old.instance.instance_id.clone()])
                .await
                .context("reimaging master instance")?;
            return Ok(state);
        }

        info!(cluster = %spec.cluster_id, release = %reconciling, "Masters upgraded");
        Ok(MasterState::DeploymentCompleted)
    }

    async fn deployment_completed(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let spec = &control_plane.spec;
        let target = TargetRef::of(control_plane);

        if self.stored(&target, StatusKey::CreatedAt).await?.is_none() {
            let now = chrono::Utc::now().to_rfc3339();
            match self
                .collaborators
                .master_status
                .set(&target, MASTER_MACHINE, StatusKey::CreatedAt, &now)
                .await
            {
                Ok(()) => info!(cluster = %spec.cluster_id, "Cluster creation completed"),
                Err(e) if e.is_conflict() => return Ok(state),
                Err(e) => return Err(e).context("recording cluster creation time"),
            }
        }

        let name = control_plane.deployment_name();
        let Some(deployment) = self
            .collaborators
            .deployments
            .get(&spec.resource_group, &name)
            .await
            .context("fetching master deployment")?
        else {
            warn!(cluster = %spec.cluster_id, deployment = %name, "Master deployment disappeared");
            return Ok(MasterState::Empty);
        };
        if deployment.provisioning_state.is_terminal_failure() {
            warn!(
                cluster = %spec.cluster_id,
                provisioning_state = %deployment.provisioning_state,
                "Master deployment failed, starting over"
            );
            return Ok(MasterState::Empty);
        }

        let desired = self.desired_deployment(control_plane).await?;
        let template_checksum = self
            .stored(&target, StatusKey::DeploymentTemplateChecksum)
            .await?;
        let parameters_checksum = self
            .stored(&target, StatusKey::DeploymentParametersChecksum)
            .await?;
        if !desired.matches(template_checksum.as_deref(), parameters_checksum.as_deref()) {
            info!(cluster = %spec.cluster_id, "Master deployment drifted, starting over");
            return Ok(MasterState::Empty);
        }
        Ok(state)
    }
}

#[async_trait]
impl TransitionGraph for MasterGraph {
    type Target = AzureControlPlane;
    type State = MasterState;

    async fn transition(
        &self,
        control_plane: &AzureControlPlane,
        state: MasterState,
    ) -> anyhow::Result<MasterState> {
        let result = match state {
            MasterState::Empty | MasterState::DeploymentUninitialized => {
                self.deployment_uninitialized(control_plane, state).await
            }
            MasterState::DeploymentInitialized => {
                self.deployment_initialized(control_plane, state).await
            }
            MasterState::ProvisioningSuccessful => Ok(MasterState::ClusterUpgradeRequirementCheck),
            MasterState::ClusterUpgradeRequirementCheck => {
                self.cluster_upgrade_requirement_check(control_plane, state)
                    .await
            }
            MasterState::MasterInstancesUpgrading => {
                self.master_instances_upgrading(control_plane, state).await
            }
            MasterState::DeploymentCompleted => {
                self.deployment_completed(control_plane, state).await
            }
        };
        remain_on_transient(&TargetRef::of(control_plane), state, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::{AzureError, Deployment, ProvisioningState};
    use crate::controller::context::tests::MockCollaborators;
    use crate::controller::fixtures::{
        control_plane, deployment, instance, master_node, release_info, tenant_with_nodes,
    };
    use crate::controller::masters::MasterReconciler;
    use crate::statemachine::NextAction;
    use crate::status::{MemoryStatusStore, StatusStore};
    use serde_json::json;
    use std::sync::Arc;

    fn target() -> TargetRef {
        TargetRef::of(&control_plane("14.1.0"))
    }

    fn with_release_and_template(mocks: &mut MockCollaborators) {
        mocks.releases.expect_components().returning(|_| Ok(release_info()));
        mocks
            .templates
            .expect_master_template()
            .returning(|| Ok(json!({"resources": ["master"]})));
    }

    async fn state_of(store: &MemoryStatusStore) -> Option<String> {
        StatusStore::<AzureControlPlane>::get(store, &target(), MASTER_MACHINE, StatusKey::State)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_pass_submits_deployment_and_stops() {
        let mut mocks = MockCollaborators::new();
        with_release_and_template(&mut mocks);
        mocks.bootstrap.expect_is_available().returning(|_, _| Ok(true));
        mocks
            .deployments
            .expect_create_or_update()
            .withf(|rg, name, _| rg == "c7f2a" && name == "c7f2a-masters")
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks
            .watchdog
            .expect_delete_failed_vmss()
            .withf(|rg, vmss| rg == "c7f2a" && vmss == "c7f2a-master")
            .times(1)
            .returning(|_, _| true);
        let store = Arc::new(MemoryStatusStore::new());
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::StopPipeline);
        assert_eq!(state_of(&store).await.as_deref(), Some("DeploymentInitialized"));
        let slot = store.status(&target()).unwrap().state_machines[MASTER_MACHINE].clone();
        assert!(slot.deployment_template_checksum.is_some());
        assert!(slot.deployment_parameters_checksum.is_some());
        // the summary step did not run
        assert!(store.status(&target()).unwrap().conditions.is_empty());
    }

    #[tokio::test]
    async fn test_missing_bootstrap_data_waits() {
        let mut mocks = MockCollaborators::new();
        mocks.bootstrap.expect_is_available().returning(|_, _| Ok(false));
        mocks.deployments.expect_create_or_update().times(0);
        let store = Arc::new(MemoryStatusStore::new());
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::Continue);
        assert!(store.state_history().is_empty());
        let status = store.status(&target()).unwrap();
        assert_eq!(status.conditions[0].status, "False");
    }

    #[tokio::test]
    async fn test_failed_deployment_resets_to_empty() {
        let mut mocks = MockCollaborators::new();
        mocks.deployments.expect_get().returning(|_, _| {
            Ok(Some(deployment("c7f2a-masters", ProvisioningState::Failed)))
        });
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "DeploymentInitialized");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_running_deployment_waits() {
        let mut mocks = MockCollaborators::new();
        mocks.deployments.expect_get().returning(|_, _| {
            Ok(Some(deployment(
                "c7f2a-masters",
                ProvisioningState::InProgress("Running".to_string()),
            )))
        });
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "DeploymentInitialized");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::Continue);
        assert_eq!(state_of(&store).await.as_deref(), Some("DeploymentInitialized"));
    }

    #[tokio::test]
    async fn test_new_cluster_skips_upgrade_check() {
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "ClusterUpgradeRequirementCheck");
        let reconciler = MasterReconciler::new(MockCollaborators::new().build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some("DeploymentCompleted"));
    }

    #[tokio::test]
    async fn test_outdated_master_starts_upgrade() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![master_node("c7f2a-master000000", "14.0.0", true)];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "ClusterUpgradeRequirementCheck");
        store.seed(&target(), MASTER_MACHINE, StatusKey::CreatedAt, "2026-01-01T00:00:00Z");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some("MasterInstancesUpgrading"));
    }

    #[tokio::test]
    async fn test_upgrade_waits_for_ready_masters() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![
            master_node("c7f2a-master000000", "14.0.0", true),
            master_node("c7f2a-master000001", "14.1.0", false),
        ];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        mocks.scale_sets.expect_list_instances().times(0);
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "MasterInstancesUpgrading");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::Continue);
        assert_eq!(state_of(&store).await.as_deref(), Some("MasterInstancesUpgrading"));
    }

    #[tokio::test]
    async fn test_stale_model_is_updated_before_reimage() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![
            master_node("c7f2a-master000000", "14.0.0", true),
            master_node("c7f2a-master000001", "14.0.0", true),
        ];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        mocks.scale_sets.expect_list_instances().returning(|_, _| {
            let mut stale = instance("c7f2a-master", "1", ProvisioningState::Succeeded);
            stale.latest_model_applied = false;
            Ok(vec![
                instance("c7f2a-master", "0", ProvisioningState::Succeeded),
                stale,
            ])
        });
        mocks
            .scale_sets
            .expect_update_instances()
            .withf(|_, vmss, ids| vmss == "c7f2a-master" && ids.len() == 1 && ids[0] == "1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        mocks.scale_sets.expect_reimage().times(0);
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "MasterInstancesUpgrading");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some("MasterInstancesUpgrading"));
    }

    #[tokio::test]
    async fn test_one_old_master_is_reimaged_per_pass() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![
            master_node("c7f2a-master000000", "14.1.0", true),
            master_node("c7f2a-master000001", "14.0.0", true),
            master_node("c7f2a-master000002", "14.0.0", true),
        ];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        mocks.scale_sets.expect_list_instances().returning(|_, _| {
            Ok((0..3)
                .map(|i| instance("c7f2a-master", &i.to_string(), ProvisioningState::Succeeded))
                .collect())
        });
        mocks
            .scale_sets
            .expect_reimage()
            .withf(|_, _, ids| ids.len() == 1 && ids[0] == "1")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "MasterInstancesUpgrading");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some("MasterInstancesUpgrading"));
    }

    #[tokio::test]
    async fn test_throttled_reimage_retries_on_next_pass() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![master_node("c7f2a-master000000", "14.0.0", true)];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        mocks.scale_sets.expect_list_instances().returning(|_, _| {
            Ok(vec![instance("c7f2a-master", "0", ProvisioningState::Succeeded)])
        });
        mocks.scale_sets.expect_reimage().times(1).returning(|_, _, _| {
            Err(AzureError::Http {
                operation: "reimage".to_string(),
                status: 429,
                message: "too many requests".to_string(),
            })
        });
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "MasterInstancesUpgrading");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::Continue);
        assert_eq!(state_of(&store).await.as_deref(), Some("MasterInstancesUpgrading"));
    }

    #[tokio::test]
    async fn test_upgraded_masters_complete() {
        let mut mocks = MockCollaborators::new();
        let nodes = vec![master_node("c7f2a-master000000", "14.1.0", true)];
        mocks.tenants = tenant_with_nodes(nodes, 0);
        mocks.scale_sets.expect_list_instances().returning(|_, _| {
            Ok(vec![instance("c7f2a-master", "0", ProvisioningState::Succeeded)])
        });
        let store = Arc::new(MemoryStatusStore::new());
        store.seed(&target(), MASTER_MACHINE, StatusKey::State, "MasterInstancesUpgrading");
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some("DeploymentCompleted"));
    }

    /// Seed the slot as if `release` had been submitted
    async fn seed_completed(store: &MemoryStatusStore, release: &str) {
        let mut mocks = MockCollaborators::new();
        with_release_and_template(&mut mocks);
        let graph = MasterGraph::new(mocks.build(&Arc::new(MemoryStatusStore::new())));
        let descriptor = graph
            .desired_deployment(&control_plane(release))
            .await
            .unwrap();
        let target = target();
        store.seed(&target, MASTER_MACHINE, StatusKey::State, "DeploymentCompleted");
        store.seed(&target, MASTER_MACHINE, StatusKey::CreatedAt, "2026-01-01T00:00:00Z");
        store.seed(
            &target,
            MASTER_MACHINE,
            StatusKey::DeploymentTemplateChecksum,
            &descriptor.template_checksum(),
        );
        store.seed(
            &target,
            MASTER_MACHINE,
            StatusKey::DeploymentParametersChecksum,
            &descriptor.parameters_checksum(),
        );
    }

    fn succeeded_deployment(mocks: &mut MockCollaborators) {
        mocks.deployments.expect_get().returning(|_, _| {
            Ok(Some(deployment("c7f2a-masters", ProvisioningState::Succeeded)))
        });
    }

    #[tokio::test]
    async fn test_converged_master_stays_and_reports_ready() {
        let store = Arc::new(MemoryStatusStore::new());
        seed_completed(&store, "14.1.0").await;
        let mut mocks = MockCollaborators::new();
        with_release_and_template(&mut mocks);
        succeeded_deployment(&mut mocks);
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::Continue);
        assert!(store.state_history().is_empty());
        let status = store.status(&target()).unwrap();
        assert_eq!(status.conditions[0].status, "True");
        assert_eq!(status.observed_generation, Some(1));
    }

    #[tokio::test]
    async fn test_checksum_drift_resets_to_initial() {
        let store = Arc::new(MemoryStatusStore::new());
        seed_completed(&store, "14.0.0").await;
        let mut mocks = MockCollaborators::new();
        with_release_and_template(&mut mocks);
        succeeded_deployment(&mut mocks);
        let reconciler = MasterReconciler::new(mocks.build(&store));

        let action = reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(action, NextAction::StopPipeline);
        assert_eq!(state_of(&store).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_vanished_deployment_resets_to_initial() {
        let store = Arc::new(MemoryStatusStore::new());
        seed_completed(&store, "14.1.0").await;
        let mut mocks = MockCollaborators::new();
        mocks.deployments.expect_get().returning(|_, _| Ok(None::<Deployment>));
        let reconciler = MasterReconciler::new(mocks.build(&store));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        assert_eq!(state_of(&store).await.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_first_completion_records_creation_time() {
        let store = Arc::new(MemoryStatusStore::new());
        seed_completed(&store, "14.1.0").await;
        let fresh = Arc::new(MemoryStatusStore::new());
        let slot = store.status(&target()).unwrap().state_machines[MASTER_MACHINE].clone();
        for (key, value) in [
            (StatusKey::State, slot.state),
            (StatusKey::DeploymentTemplateChecksum, slot.deployment_template_checksum),
            (StatusKey::DeploymentParametersChecksum, slot.deployment_parameters_checksum),
        ] {
            fresh.seed(&target(), MASTER_MACHINE, key, &value.unwrap());
        }
        let mut mocks = MockCollaborators::new();
        with_release_and_template(&mut mocks);
        succeeded_deployment(&mut mocks);
        let reconciler = MasterReconciler::new(mocks.build(&fresh));

        reconciler
            .ensure_created(&control_plane("14.1.0"))
            .await
            .unwrap();

        let created_at = StatusStore::<AzureControlPlane>::get(
            fresh.as_ref(),
            &target(),
            MASTER_MACHINE,
            StatusKey::CreatedAt,
        )
        .await
        .unwrap();
        assert!(created_at.is_some());
    }
}
