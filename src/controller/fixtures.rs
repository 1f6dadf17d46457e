//! Builders shared by the transition tests

use crate::azure::{Deployment, DeploymentParameters, ProvisioningState, ScaleSetInstance};
use crate::constants::RELEASE_VERSION_LABEL;
use crate::crd::{AzureControlPlane, AzureControlPlaneSpec, AzureNodePool, AzureNodePoolSpec};
use crate::kubernetes::{MockTenantClusters, MockTenantNodes, ReleaseInfo, TenantNode, TenantNodes};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) fn control_plane(release: &str) -> AzureControlPlane {
    let mut control_plane = AzureControlPlane::new(
        "c7f2a",
        AzureControlPlaneSpec {
            cluster_id: "c7f2a".to_string(),
            resource_group: "c7f2a".to_string(),
            location: "westeurope".to_string(),
            replicas: 3,
            vm_size: "Standard_D4s_v3".to_string(),
            release_version: release.to_string(),
            availability_zones: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            subnet_name: "c7f2a-master-subnet".to_string(),
        },
    );
    control_plane.metadata.namespace = Some("org-acme".to_string());
    control_plane.metadata.generation = Some(1);
    control_plane
}

pub(crate) fn node_pool(release: &str, replicas: u32) -> AzureNodePool {
    let mut node_pool = AzureNodePool::new(
        "np01",
        AzureNodePoolSpec {
            cluster_id: "c7f2a".to_string(),
            control_plane_ref: "c7f2a".to_string(),
            resource_group: "c7f2a".to_string(),
            location: "westeurope".to_string(),
            replicas,
            min_replicas: None,
            max_replicas: None,
            vm_size: "Standard_D4s_v3".to_string(),
            release_version: release.to_string(),
            failure_domains: vec!["1".to_string()],
            subnet_name: "np01".to_string(),
        },
    );
    node_pool.metadata.namespace = Some("org-acme".to_string());
    node_pool.metadata.generation = Some(1);
    node_pool
}

pub(crate) fn release_info() -> ReleaseInfo {
    ReleaseInfo {
        kubernetes: "1.30.4".to_string(),
        image: "3975.2.0".to_string(),
    }
}

pub(crate) fn deployment(name: &str, provisioning_state: ProvisioningState) -> Deployment {
    Deployment {
        name: name.to_string(),
        provisioning_state,
        parameters: DeploymentParameters::default(),
    }
}

/// Instance `id` of `vmss`; its computer name follows the Azure
/// `<prefix><6-digit id>` scheme
pub(crate) fn instance(vmss: &str, id: &str, provisioning_state: ProvisioningState) -> ScaleSetInstance {
    ScaleSetInstance {
        instance_id: id.to_string(),
        computer_name: format!("{vmss}{id:0>6}"),
        provisioning_state,
        latest_model_applied: true,
    }
}

fn node(name: &str, role: &str, release: &str, ready: bool) -> TenantNode {
    TenantNode {
        name: name.to_string(),
        labels: BTreeMap::from([
            (format!("node-role.kubernetes.io/{role}"), String::new()),
            (RELEASE_VERSION_LABEL.to_string(), release.to_string()),
        ]),
        ready,
        unschedulable: false,
    }
}

pub(crate) fn master_node(name: &str, release: &str, ready: bool) -> TenantNode {
    node(name, "control-plane", release, ready)
}

pub(crate) fn worker_node(name: &str, release: &str, ready: bool) -> TenantNode {
    node(name, "worker", release, ready)
}

/// Tenant cluster serving `nodes`, expecting exactly `cordons` cordon calls
pub(crate) fn tenant_with_nodes(nodes: Vec<TenantNode>, cordons: usize) -> MockTenantClusters {
    let mut client = MockTenantNodes::new();
    client
        .expect_list_nodes()
        .returning(move || Ok(nodes.clone()));
    client
        .expect_cordon()
        .times(cordons)
        .returning(|_| Ok(()));
    let client: Arc<dyn TenantNodes> = Arc::new(client);

    let mut tenants = MockTenantClusters::new();
    tenants
        .expect_nodes_client()
        .returning(move |_, _| Ok(Some(Arc::clone(&client))));
    tenants
}
