//! # Cluster Lookups
//!
//! Small reads about the cluster as a whole: whether the master bootstrap
//! data has been published and whether the control plane is going away.

use crate::crd::AzureControlPlane;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;

#[cfg(test)]
use mockall::automock;

/// Prerequisite artifact of the master deployment
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BootstrapData: Send + Sync {
    async fn is_available(&self, namespace: &str, cluster_id: &str) -> anyhow::Result<bool>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlaneLookup: Send + Sync {
    /// The control plane is marked for deletion or already gone
    async fn is_deleting(&self, namespace: &str, name: &str) -> anyhow::Result<bool>;
}

/// [`BootstrapData`] published as the `<clusterId>-master-bootstrap` Secret
#[derive(Clone)]
pub struct SecretBootstrapData {
    client: Client,
}

impl std::fmt::Debug for SecretBootstrapData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBootstrapData").finish_non_exhaustive()
    }
}

impl SecretBootstrapData {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn secret_name(cluster_id: &str) -> String {
        format!("{cluster_id}-master-bootstrap")
    }
}

#[async_trait]
impl BootstrapData for SecretBootstrapData {
    async fn is_available(&self, namespace: &str, cluster_id: &str) -> anyhow::Result<bool> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(secrets.get_opt(&Self::secret_name(cluster_id)).await?.is_some())
    }
}

#[derive(Clone)]
pub struct KubeControlPlaneLookup {
    client: Client,
}

impl std::fmt::Debug for KubeControlPlaneLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeControlPlaneLookup").finish_non_exhaustive()
    }
}

impl KubeControlPlaneLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ControlPlaneLookup for KubeControlPlaneLookup {
    async fn is_deleting(&self, namespace: &str, name: &str) -> anyhow::Result<bool> {
        let control_planes: Api<AzureControlPlane> = Api::namespaced(self.client.clone(), namespace);
        Ok(match control_planes.get_opt(name).await? {
            Some(cp) => cp.metadata.deletion_timestamp.is_some(),
            None => true,
        })
    }
}
