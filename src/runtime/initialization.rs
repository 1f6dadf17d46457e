//! # Initialization
//!
//! Startup: rustls provider, configuration, tracing, metrics, the probe
//! server, the Kubernetes and Azure clients and the reconciler context.

use crate::azure::{
    build_credential, ArmClient, ClusterAutoscaler, DeploymentsClient, ScaleSetsClient,
    TagAutoscaler, VmCapabilities,
};
use crate::config::ControllerConfig;
use crate::controller::deployment::FileTemplateSource;
use crate::controller::{Collaborators, Context};
use crate::crd::{AzureControlPlane, AzureNodePool};
use crate::kubernetes::{
    KubeControlPlaneLookup, KubeDrainRequests, KubeReleaseCatalog, KubeconfigTenantClusters,
    SecretBootstrapData,
};
use crate::observability::{logging, metrics};
use crate::server::{start_server, ServerState};
use crate::status::KubeStatusStore;
use crate::watchdog::InstanceWatchdog;
use anyhow::{Context as _, Result};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long startup waits for the probe server to bind
const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub context: Arc<Context>,
    pub server_state: Arc<ServerState>,
    /// Kept to shut the worker pool down after the watch loop ends
    pub watchdog: Arc<InstanceWatchdog>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("watchdog", &self.watchdog)
            .finish_non_exhaustive()
    }
}

/// Initialize the operator runtime
///
/// # Errors
/// Fails when logging, metrics, the probe server or any client cannot be set up
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|provider| anyhow::anyhow!("rustls crypto provider already installed: {provider:?}"))?;

    let config = ControllerConfig::from_env();
    logging::init_tracing(config.log_format)?;
    info!("Starting Azure cluster operator {}", env!("CARGO_PKG_VERSION"));
    info!(config = ?config, "Loaded configuration");

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let server_port = config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("creating Kubernetes client")?;

    let credential = build_credential(&config)?;
    let arm = Arc::new(ArmClient::from_config(&config, credential).context("creating ARM client")?);
    let scale_sets: Arc<dyn ScaleSetsClient> = Arc::clone(&arm) as Arc<dyn ScaleSetsClient>;
    let deployments: Arc<dyn DeploymentsClient> = Arc::clone(&arm) as Arc<dyn DeploymentsClient>;
    let capabilities: Arc<dyn VmCapabilities> = arm;
    let autoscaler: Arc<dyn ClusterAutoscaler> =
        Arc::new(TagAutoscaler::new(Arc::clone(&scale_sets)));

    let watchdog = Arc::new(InstanceWatchdog::start(
        config.watchdog_workers,
        config.watchdog_cooldown(),
        Arc::clone(&scale_sets),
    ));

    let collaborators = Collaborators {
        deployments,
        scale_sets,
        capabilities,
        autoscaler,
        watchdog: Arc::clone(&watchdog) as Arc<dyn crate::watchdog::Watchdog>,
        tenants: Arc::new(KubeconfigTenantClusters::new(client.clone())),
        drains: Arc::new(KubeDrainRequests::new(client.clone())),
        releases: Arc::new(KubeReleaseCatalog::new(client.clone())),
        bootstrap: Arc::new(SecretBootstrapData::new(client.clone())),
        control_planes: Arc::new(KubeControlPlaneLookup::new(client.clone())),
        templates: Arc::new(FileTemplateSource::new(config.template_dir.clone())),
        master_status: Arc::new(KubeStatusStore::<AzureControlPlane>::new(client.clone())),
        node_pool_status: Arc::new(KubeStatusStore::<AzureNodePool>::new(client.clone())),
    };
    let context = Arc::new(Context::new(config, collaborators));

    info!("Operator initialized, starting watch loops");
    Ok(InitializationResult {
        client,
        context,
        server_state,
        watchdog,
    })
}

/// Wait for the probe server to bind
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = std::time::Instant::now();
    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }
        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}
