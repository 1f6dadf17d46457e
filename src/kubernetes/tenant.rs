//! # Tenant Clusters
//!
//! Access to the nodes of the workload cluster an `AzureControlPlane`
//! provisions. Clients are built from the `<clusterId>-kubeconfig` Secret in
//! the target's namespace; until that Secret exists there is no client.

use crate::constants::{FIELD_MANAGER, LEGACY_ROLE_LABEL, RELEASE_VERSION_LABEL};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

/// Key of the kubeconfig inside the tenant kubeconfig Secret
const KUBECONFIG_KEY: &str = "value";

#[derive(Debug, Error)]
pub enum TenantError {
    /// The kubeconfig Secret exists but cannot be turned into a client
    #[error("invalid kubeconfig for cluster {cluster}: {message}")]
    Kubeconfig { cluster: String, message: String },

    /// The tenant API server could not be reached or refused the call
    #[error("tenant API error: {0}")]
    Api(#[from] kube::Error),
}

impl TenantError {
    /// The tenant API is temporarily unavailable; callers wait
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Api(_))
    }
}

/// The parts of a tenant node the reconcilers look at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ready: bool,
    pub unschedulable: bool,
}

impl TenantNode {
    pub fn from_node(node: &Node) -> Self {
        let ready = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            });
        Self {
            name: node.metadata.name.clone().unwrap_or_default(),
            labels: node.metadata.labels.clone().unwrap_or_default(),
            ready,
            unschedulable: node
                .spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false),
        }
    }

    /// Release version the node was bootstrapped with
    pub fn release_version(&self) -> Option<&str> {
        self.labels.get(RELEASE_VERSION_LABEL).map(String::as_str)
    }

    /// Whether the node carries `node-role.kubernetes.io/<role>` or the legacy role label
    pub fn has_role(&self, role: &str) -> bool {
        self.labels
            .contains_key(&format!("node-role.kubernetes.io/{role}"))
            || self.labels.get(LEGACY_ROLE_LABEL).map(String::as_str) == Some(role)
    }
}

/// Node operations on one tenant cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantNodes: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<TenantNode>, TenantError>;

    /// Mark a node unschedulable
    async fn cordon(&self, node_name: &str) -> Result<(), TenantError>;
}

/// Factory of tenant cluster clients
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantClusters: Send + Sync {
    /// Client for the tenant cluster; `None` while its kubeconfig is not published
    async fn nodes_client(
        &self,
        namespace: &str,
        cluster_id: &str,
    ) -> Result<Option<Arc<dyn TenantNodes>>, TenantError>;
}

/// [`TenantNodes`] backed by a kube client
#[derive(Clone)]
pub struct KubeTenantNodes {
    nodes: Api<Node>,
}

impl std::fmt::Debug for KubeTenantNodes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeTenantNodes").finish_non_exhaustive()
    }
}

impl KubeTenantNodes {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }
}

#[async_trait]
impl TenantNodes for KubeTenantNodes {
    async fn list_nodes(&self) -> Result<Vec<TenantNode>, TenantError> {
        let nodes = self.nodes.list(&ListParams::default()).await?;
        Ok(nodes.items.iter().map(TenantNode::from_node).collect())
    }

    async fn cordon(&self, node_name: &str) -> Result<(), TenantError> {
        let patch = serde_json::json!({ "spec": { "unschedulable": true } });
        self.nodes
            .patch(node_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        debug!(node = node_name, "Cordoned node");
        Ok(())
    }
}

/// [`TenantClusters`] reading kubeconfig Secrets from the management cluster
#[derive(Clone)]
pub struct KubeconfigTenantClusters {
    client: Client,
}

impl std::fmt::Debug for KubeconfigTenantClusters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeconfigTenantClusters").finish_non_exhaustive()
    }
}

impl KubeconfigTenantClusters {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn secret_name(cluster_id: &str) -> String {
        format!("{cluster_id}-kubeconfig")
    }
}

#[async_trait]
impl TenantClusters for KubeconfigTenantClusters {
    async fn nodes_client(
        &self,
        namespace: &str,
        cluster_id: &str,
    ) -> Result<Option<Arc<dyn TenantNodes>>, TenantError> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = secrets.get_opt(&Self::secret_name(cluster_id)).await? else {
            debug!(cluster = cluster_id, "Tenant kubeconfig not published yet");
            return Ok(None);
        };

        let invalid = |message: String| TenantError::Kubeconfig {
            cluster: cluster_id.to_string(),
            message,
        };
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(KUBECONFIG_KEY))
            .ok_or_else(|| invalid(format!("secret has no '{KUBECONFIG_KEY}' key")))?;
        let yaml = std::str::from_utf8(&raw.0).map_err(|e| invalid(e.to_string()))?;
        let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| invalid(e.to_string()))?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| invalid(e.to_string()))?;
        let client = Client::try_from(config)?;
        Ok(Some(Arc::new(KubeTenantNodes::new(client))))
    }
}
