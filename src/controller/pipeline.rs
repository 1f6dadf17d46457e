//! # Pass Pipeline
//!
//! The steps every reconciliation pass runs for one target: the state
//! machine step, then (unless the step stopped the pipeline) the status
//! summary step.

use crate::controller::error::ReconcilerError;
use crate::statemachine::{drive, PassOutcome, StateMachine, TransitionGraph};
use crate::status::{StatusStore, StatusSummary, TargetRef};
use tracing::debug;

/// Reason of the `Ready` condition in the converged state
pub const REASON_CONVERGED: &str = "Converged";

/// Reason of the `Ready` condition while a state machine is working
pub const REASON_RECONCILING: &str = "Reconciling";

/// Run the state machine step for `target`
///
/// # Errors
/// Returns transition and status store failures
pub async fn step<G, K>(
    machine: &StateMachine<G>,
    store: &dyn StatusStore<K>,
    target: &K,
) -> Result<PassOutcome<G::State>, ReconcilerError>
where
    G: TransitionGraph<Target = K>,
    K: kube::Resource + Send + Sync,
{
    let target_ref = TargetRef::of(target);
    Ok(drive(machine, store, &target_ref, target).await?)
}

/// Write the `Ready` condition and the observed generation
///
/// A conflicting write is dropped; the next pass writes the summary again.
/// # Errors
/// Returns status store failures other than conflicts
pub async fn summarize<K: kube::Resource>(
    store: &dyn StatusStore<K>,
    target: &K,
    machine: &str,
    state: &str,
    ready: bool,
) -> Result<(), ReconcilerError> {
    let target_ref = TargetRef::of(target);
    let shown_state = if state.is_empty() { "initial" } else { state };
    let summary = StatusSummary {
        ready,
        reason: if ready { REASON_CONVERGED } else { REASON_RECONCILING }.to_string(),
        message: format!("{machine} state machine is in state {shown_state}"),
        observed_generation: target.meta().generation,
    };
    match store.set_summary(&target_ref, &summary).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => {
            debug!(target = %target_ref, "Target changed while writing status summary");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
