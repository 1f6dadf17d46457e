//! # Drain Requests
//!
//! `NodeDrainRequest` objects are created next to the node pool and served by
//! the external drain controller. They are labelled with the cluster and the
//! node pool so that all requests of a pool can be listed and removed at once.

use crate::constants::{CLUSTER_LABEL, NODE_POOL_LABEL};
use crate::crd::{NodeDrainRequest, NodeDrainRequestSpec};
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Object name of the drain request for one node
pub fn drain_request_name(cluster_id: &str, node_name: &str) -> String {
    format!("{cluster_id}-{node_name}").to_lowercase()
}

/// Drain request for `node_name`, labelled for its cluster and node pool
pub fn new_drain_request(
    cluster_id: &str,
    node_pool: &str,
    node_name: &str,
    timeout: Duration,
) -> NodeDrainRequest {
    let mut request = NodeDrainRequest::new(
        &drain_request_name(cluster_id, node_name),
        NodeDrainRequestSpec {
            cluster_id: cluster_id.to_string(),
            node_name: node_name.to_string(),
            timeout_seconds: Some(timeout.as_secs()),
        },
    );
    request.metadata.labels = Some(BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster_id.to_string()),
        (NODE_POOL_LABEL.to_string(), node_pool.to_string()),
    ]));
    request
}

fn pool_selector(cluster_id: &str, node_pool: &str) -> ListParams {
    ListParams::default().labels(&format!(
        "{CLUSTER_LABEL}={cluster_id},{NODE_POOL_LABEL}={node_pool}"
    ))
}

/// CRUD on the drain requests of one node pool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DrainRequests: Send + Sync {
    async fn list(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<Vec<NodeDrainRequest>>;

    /// Create the request for a node; an existing request is left alone
    async fn create(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
        node_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()>;

    /// Delete one request; a missing request is not an error
    async fn delete(&self, namespace: &str, name: &str) -> anyhow::Result<()>;

    /// Delete every request of the node pool
    async fn delete_all(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct KubeDrainRequests {
    client: Client,
}

impl std::fmt::Debug for KubeDrainRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDrainRequests").finish_non_exhaustive()
    }
}

impl KubeDrainRequests {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<NodeDrainRequest> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DrainRequests for KubeDrainRequests {
    async fn list(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<Vec<NodeDrainRequest>> {
        let list = self
            .api(namespace)
            .list(&pool_selector(cluster_id, node_pool))
            .await?;
        Ok(list.items)
    }

    async fn create(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
        node_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let request = new_drain_request(cluster_id, node_pool, node_name, timeout);
        match self.api(namespace).create(&PostParams::default(), &request).await {
            Ok(_) => {
                info!(cluster = cluster_id, node_pool, node = node_name, "Requested node drain");
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                debug!(node = node_name, "Drain request already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> anyhow::Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<()> {
        self.api(namespace)
            .delete_collection(&DeleteParams::default(), &pool_selector(cluster_id, node_pool))
            .await?;
        info!(cluster = cluster_id, node_pool, "Deleted drain requests");
        Ok(())
    }
}
