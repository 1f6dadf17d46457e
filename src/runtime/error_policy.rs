//! # Error Policy
//!
//! Requeue delays for failed reconciliation passes. Backoff is tracked per
//! resource so that one failing target never slows down the others.

use crate::controller::{Context, ReconcilerError};
use crate::observability::metrics;
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Backoff key of a resource: `kind/namespace/name`
pub fn backoff_key<K>(obj: &K) -> String
where
    K: Resource<DynamicType = ()>,
{
    format!(
        "{}/{}/{}",
        K::kind(&()),
        obj.meta().namespace.as_deref().unwrap_or("default"),
        obj.meta().name.as_deref().unwrap_or("unknown")
    )
}

/// Requeue a failed pass after the resource's next Fibonacci delay
pub fn handle_reconciliation_error<K>(
    obj: Arc<K>,
    error: &ReconcilerError,
    ctx: Arc<Context>,
) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    let name = obj.meta().name.as_deref().unwrap_or("unknown");
    let namespace = obj.meta().namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.kind = %kind,
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {:?}", namespace, name, error);
    metrics::increment_reconciliation_errors(&kind);

    let (backoff_seconds, error_count) = ctx.next_backoff(&backoff_key(obj.as_ref()));
    let delay = Duration::from_secs(backoff_seconds);
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    info!(
        backoff_seconds,
        error_count,
        next_retry = %next_trigger_time.to_rfc3339(),
        "Retrying with Fibonacci backoff"
    );

    Action::requeue(delay)
}
