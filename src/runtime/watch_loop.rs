//! # Watch Loop
//!
//! One `Controller` per owned resource kind. Every pass runs behind the
//! operator's finalizer: `Apply` runs the reconciler's pipeline, `Cleanup`
//! its deletion.

use crate::constants::FINALIZER;
use crate::controller::{Context, MasterReconciler, NodePoolReconciler, ReconcilerError};
use crate::crd::{AzureControlPlane, AzureNodePool};
use crate::observability::metrics;
use crate::runtime::error_policy::{backoff_key, handle_reconciliation_error};
use crate::server::ServerState;
use crate::statemachine::NextAction;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::Api;
use kube::{Client, Resource, ResourceExt};
use kube_runtime::controller::Action;
use kube_runtime::finalizer::{finalizer, Event};
use kube_runtime::{watcher, Controller};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// The reconciler half of one resource kind
#[async_trait]
pub trait Reconcile<K>: Send + Sync {
    async fn ensure_created(&self, obj: &K) -> Result<NextAction, ReconcilerError>;

    async fn ensure_deleted(&self, obj: &K) -> Result<(), ReconcilerError>;
}

#[async_trait]
impl Reconcile<AzureControlPlane> for MasterReconciler {
    async fn ensure_created(&self, obj: &AzureControlPlane) -> Result<NextAction, ReconcilerError> {
        MasterReconciler::ensure_created(self, obj).await
    }

    async fn ensure_deleted(&self, obj: &AzureControlPlane) -> Result<(), ReconcilerError> {
        MasterReconciler::ensure_deleted(self, obj).await
    }
}

#[async_trait]
impl Reconcile<AzureNodePool> for NodePoolReconciler {
    async fn ensure_created(&self, obj: &AzureNodePool) -> Result<NextAction, ReconcilerError> {
        NodePoolReconciler::ensure_created(self, obj).await
    }

    async fn ensure_deleted(&self, obj: &AzureNodePool) -> Result<(), ReconcilerError> {
        NodePoolReconciler::ensure_deleted(self, obj).await
    }
}

/// Resource kinds owned by this operator
pub trait Owned:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
    fn reconciler(ctx: &Context) -> &dyn Reconcile<Self>;
}

impl Owned for AzureControlPlane {
    fn reconciler(ctx: &Context) -> &dyn Reconcile<Self> {
        &ctx.masters
    }
}

impl Owned for AzureNodePool {
    fn reconciler(ctx: &Context) -> &dyn Reconcile<Self> {
        &ctx.node_pools
    }
}

/// Requeue interval for the outcome of a pass
pub fn requeue_action(ctx: &Context, next: NextAction) -> Action {
    match next {
        NextAction::StopPipeline => Action::requeue(ctx.config.transition_requeue()),
        NextAction::Continue => Action::requeue(ctx.config.steady_requeue()),
    }
}

/// One reconciliation pass for `obj`
///
/// # Errors
/// Returns reconciler and finalizer failures
pub async fn reconcile<K: Owned>(
    obj: Arc<K>,
    ctx: Arc<Context>,
    client: Client,
) -> Result<Action, ReconcilerError> {
    let kind = K::kind(&());
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let span = tracing::info_span!(
        "reconcile",
        resource.kind = %kind,
        resource.name = %obj.name_any(),
        resource.namespace = %namespace,
        resource.generation = obj.meta().generation.unwrap_or(0),
    );

    async move {
        let started = Instant::now();
        metrics::increment_reconciliations(&kind);
        let key = backoff_key(obj.as_ref());
        let api: Api<K> = Api::namespaced(client, &namespace);
        let context = ctx.as_ref();
        let reconciler = K::reconciler(context);

        let result = finalizer(&api, FINALIZER, obj, |event| async move {
            match event {
                Event::Apply(obj) => {
                    let next = reconciler.ensure_created(obj.as_ref()).await?;
                    Ok::<_, ReconcilerError>(requeue_action(context, next))
                }
                Event::Cleanup(obj) => {
                    reconciler.ensure_deleted(obj.as_ref()).await?;
                    info!("Cleanup finished, releasing finalizer");
                    Ok::<_, ReconcilerError>(Action::await_change())
                }
            }
        })
        .await
        .map_err(|e| ReconcilerError::Finalizer(Box::new(e)));

        metrics::observe_reconciliation_duration(&kind, started.elapsed().as_secs_f64());
        if let Ok(action) = &result {
            debug!(action = ?action, "watch.event.reconciled");
            ctx.reset_backoff(&key);
        }
        result
    }
    .instrument(span)
    .await
}

async fn run_controller<K: Owned>(client: Client, ctx: Arc<Context>) {
    let api: Api<K> = Api::all(client.clone());
    info!(kind = %K::kind(&()), "Starting controller watch loop");

    Controller::new(api, watcher::Config::default().any_semantic())
        .shutdown_on_signal()
        .run(
            move |obj, ctx| reconcile::<K>(obj, ctx, client.clone()),
            handle_reconciliation_error::<K>,
            ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok((obj_ref, _)) => debug!(object = %obj_ref, "watch.event.success"),
                Err(e) => warn!("Controller stream error: {:?}", e),
            }
        })
        .await;
}

/// Run both controllers until a shutdown signal arrives
pub async fn run_watch_loop(client: Client, ctx: Arc<Context>, server_state: Arc<ServerState>) {
    futures::join!(
        run_controller::<AzureControlPlane>(client.clone(), Arc::clone(&ctx)),
        run_controller::<AzureNodePool>(client, ctx),
    );

    server_state.set_ready(false);
    info!("Controllers stopped");
}
