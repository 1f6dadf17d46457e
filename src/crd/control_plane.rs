//! # AzureControlPlane
//!
//! Desired state of a cluster's master virtual machine scale set.

use crate::crd::{ReconcileStatus, StatusCarrier};
use serde::{Deserialize, Serialize};

/// AzureControlPlane Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: infrastructure.azure-cluster.io/v1alpha1
/// kind: AzureControlPlane
/// metadata:
///   name: c7f2a
///   namespace: org-acme
/// spec:
///   clusterId: c7f2a
///   resourceGroup: c7f2a
///   location: westeurope
///   replicas: 3
///   vmSize: Standard_D4s_v3
///   releaseVersion: 14.1.0
///   availabilityZones: ["1", "2", "3"]
///   subnetName: c7f2a-master-subnet
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AzureControlPlane",
    group = "infrastructure.azure-cluster.io",
    version = "v1alpha1",
    namespaced,
    status = "ReconcileStatus",
    shortname = "azcp",
    printcolumn = r#"{"name":"Release", "type":"string", "jsonPath":".spec.releaseVersion"}, {"name":"State", "type":"string", "jsonPath":".status.stateMachines.masters.state"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureControlPlaneSpec {
    /// Cluster identifier, also the prefix of every Azure resource of the cluster
    pub cluster_id: String,
    /// Resource group holding the cluster's Azure resources
    pub resource_group: String,
    /// Azure region
    pub location: String,
    /// Number of master instances
    #[serde(default = "default_master_replicas")]
    pub replicas: u32,
    /// Virtual machine size of every master instance
    pub vm_size: String,
    /// Release the masters should run; nodes carry it as a label once bootstrapped
    pub release_version: String,
    /// Availability zones the scale set spreads over
    #[serde(default)]
    pub availability_zones: Vec<String>,
    /// Subnet the master instances join (allocated outside this operator)
    pub subnet_name: String,
}

fn default_master_replicas() -> u32 {
    1
}

impl AzureControlPlane {
    /// Name of the master scale set
    pub fn scale_set_name(&self) -> String {
        format!("{}-master", self.spec.cluster_id)
    }

    /// Name of the ARM deployment that provisions the master scale set
    pub fn deployment_name(&self) -> String {
        format!("{}-masters", self.spec.cluster_id)
    }
}

impl StatusCarrier for AzureControlPlane {
    fn reconcile_status(&self) -> Option<&ReconcileStatus> {
        self.status.as_ref()
    }
}
