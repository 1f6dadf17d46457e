//! # Context
//!
//! Collaborators shared by both reconcilers and the per-resource backoff
//! bookkeeping used by the error policy.

use crate::azure::{ClusterAutoscaler, DeploymentsClient, ScaleSetsClient, VmCapabilities};
use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::deployment::TemplateSource;
use crate::controller::masters::MasterReconciler;
use crate::controller::nodepool::NodePoolReconciler;
use crate::crd::{AzureControlPlane, AzureNodePool};
use crate::kubernetes::{
    BootstrapData, ControlPlaneLookup, DrainRequests, ReleaseCatalog, TenantClusters, TenantNode,
    TenantNodes,
};
use crate::status::StatusStore;
use crate::watchdog::Watchdog;
use anyhow::Context as _;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// External systems the transition graphs talk to
#[derive(Clone)]
pub struct Collaborators {
    pub deployments: Arc<dyn DeploymentsClient>,
    pub scale_sets: Arc<dyn ScaleSetsClient>,
    pub capabilities: Arc<dyn VmCapabilities>,
    pub autoscaler: Arc<dyn ClusterAutoscaler>,
    pub watchdog: Arc<dyn Watchdog>,
    pub tenants: Arc<dyn TenantClusters>,
    pub drains: Arc<dyn DrainRequests>,
    pub releases: Arc<dyn ReleaseCatalog>,
    pub bootstrap: Arc<dyn BootstrapData>,
    pub control_planes: Arc<dyn ControlPlaneLookup>,
    pub templates: Arc<dyn TemplateSource>,
    pub master_status: Arc<dyn StatusStore<AzureControlPlane>>,
    pub node_pool_status: Arc<dyn StatusStore<AzureNodePool>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Client and current nodes of a tenant cluster
    ///
    /// `None` while the cluster's kubeconfig is not published or its API is
    /// unreachable; callers stay in their state and retry on the next pass.
    /// # Errors
    /// Fails when the published kubeconfig is unusable
    pub async fn tenant_nodes(
        &self,
        namespace: &str,
        cluster_id: &str,
    ) -> anyhow::Result<Option<(Arc<dyn TenantNodes>, Vec<TenantNode>)>> {
        let client = match self.tenants.nodes_client(namespace, cluster_id).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                debug!(cluster = cluster_id, "No tenant cluster client yet");
                return Ok(None);
            }
            Err(e) if e.is_unavailable() => {
                warn!(cluster = cluster_id, "Tenant cluster client unavailable: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e).context("building tenant cluster client"),
        };
        match client.list_nodes().await {
            Ok(nodes) => Ok(Some((client, nodes))),
            Err(e) if e.is_unavailable() => {
                warn!(cluster = cluster_id, "Listing tenant nodes failed: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("listing tenant nodes"),
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared state handed to every reconciliation
pub struct Context {
    pub config: ControllerConfig,
    pub masters: MasterReconciler,
    pub node_pools: NodePoolReconciler,
    /// Backoff per resource, keyed by `kind/namespace/name`
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("subscription_id", &self.config.subscription_id)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(config: ControllerConfig, collaborators: Collaborators) -> Self {
        let drain_timeout = config.drain_timeout();
        Self {
            masters: MasterReconciler::new(collaborators.clone()),
            node_pools: NodePoolReconciler::new(collaborators, drain_timeout),
            config,
            backoff_states: Mutex::new(HashMap::new()),
        }
    }

    /// Next error delay for `key`; advances its backoff
    pub fn next_backoff(&self, key: &str) -> (u64, u32) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        (state.backoff.next_backoff_seconds(), state.error_count)
    }

    /// Forget the backoff of `key` after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        let mut states = self
            .backoff_states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = states.get_mut(key) {
            state.reset();
        }
    }
}
