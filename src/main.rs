//! # Azure Cluster Operator
//!
//! Kubernetes operator that keeps tenant clusters hosted on Azure converged
//! with their declared shape.
//!
//! ## Overview
//!
//! For every `AzureControlPlane` and `AzureNodePool` the operator drives a
//! resumable state machine whose state is persisted on the resource status:
//!
//! 1. **Masters** - submits the master ARM deployment and rolls outdated
//!    master instances one at a time
//! 2. **Node pools** - submits the worker deployment and replaces workers
//!    with a surge rollout: scale to 2N, cordon, drain, terminate, scale to N
//! 3. **Watchdog** - background workers that reimage or delete broken
//!    instances between passes
//!
//! ## Features
//!
//! - **Resumable**: every pass reads the persisted state and makes at most
//!   one transition
//! - **Ordered upgrades**: node pools wait while their control plane upgrades
//! - **Prometheus metrics**: exposed on `/metrics` together with health probes

use anyhow::Result;
use azure_cluster_operator::runtime::initialization::initialize;
use azure_cluster_operator::runtime::watch_loop::run_watch_loop;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(init.client, init.context, init.server_state).await;

    init.watchdog.shutdown().await;
    info!("Azure cluster operator stopped");
    Ok(())
}
