//! # AzureNodePool
//!
//! Desired state of one worker virtual machine scale set.

use crate::crd::{ReconcileStatus, StatusCarrier};
use serde::{Deserialize, Serialize};

/// AzureNodePool Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: infrastructure.azure-cluster.io/v1alpha1
/// kind: AzureNodePool
/// metadata:
///   name: np01
///   namespace: org-acme
/// spec:
///   clusterId: c7f2a
///   controlPlaneRef: c7f2a
///   resourceGroup: c7f2a
///   location: westeurope
///   replicas: 3
///   minReplicas: 3
///   maxReplicas: 10
///   vmSize: Standard_D4s_v3
///   releaseVersion: 14.1.0
///   failureDomains: ["1", "2"]
///   subnetName: np01
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AzureNodePool",
    group = "infrastructure.azure-cluster.io",
    version = "v1alpha1",
    namespaced,
    status = "ReconcileStatus",
    shortname = "aznp",
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}, {"name":"Release", "type":"string", "jsonPath":".spec.releaseVersion"}, {"name":"State", "type":"string", "jsonPath":".status.stateMachines.nodepool.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureNodePoolSpec {
    /// Cluster identifier the pool belongs to
    pub cluster_id: String,
    /// Name of the `AzureControlPlane` of the cluster, in the same namespace
    pub control_plane_ref: String,
    /// Resource group holding the cluster's Azure resources
    pub resource_group: String,
    /// Azure region
    pub location: String,
    /// Desired number of worker instances
    ///
    /// At most half of the 1000 instances a scale set can hold, so that a
    /// rolling upgrade can run both generations side by side.
    #[schemars(range(max = 500))]
    pub replicas: u32,
    /// Autoscaler lower bound, defaults to `replicas`
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// Autoscaler upper bound, defaults to `replicas`
    #[serde(default)]
    pub max_replicas: Option<u32>,
    /// Virtual machine size of every worker instance
    pub vm_size: String,
    /// Release the workers should run
    pub release_version: String,
    /// Availability zones the scale set spreads over
    #[serde(default)]
    pub failure_domains: Vec<String>,
    /// Subnet the worker instances join (allocated outside this operator)
    pub subnet_name: String,
}

impl AzureNodePool {
    /// Name of the worker scale set
    pub fn scale_set_name(&self) -> String {
        format!("nodepool-{}", kube::ResourceExt::name_any(self))
    }

    /// Name of the ARM deployment that provisions the worker scale set
    pub fn deployment_name(&self) -> String {
        format!("nodepool-{}", kube::ResourceExt::name_any(self))
    }

    /// Autoscaler bounds, falling back to the fixed replica count
    pub fn autoscaler_bounds(&self) -> (u32, u32) {
        let min = self.spec.min_replicas.unwrap_or(self.spec.replicas);
        let max = self.spec.max_replicas.unwrap_or(self.spec.replicas).max(min);
        (min, max)
    }
}

impl StatusCarrier for AzureNodePool {
    fn reconcile_status(&self) -> Option<&ReconcileStatus> {
        self.status.as_ref()
    }
}
