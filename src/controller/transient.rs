//! # Transient Failures
//!
//! Azure failures that a later pass is expected to get past on its own
//! (throttling, conflicts with in-flight operations, server errors, resources
//! that do not exist yet) leave the state machine where it is instead of
//! failing the pass.

use crate::azure::AzureError;
use crate::statemachine::MachineState;
use crate::status::TargetRef;
use tracing::warn;

/// Whether any error in the chain is a transient Azure failure
pub fn is_transient(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|e| e.downcast_ref::<AzureError>())
        .any(AzureError::is_transient)
}

/// Turn a transient failure of the transition out of `state` into staying there
pub fn remain_on_transient<S: MachineState>(
    target: &TargetRef,
    state: S,
    result: anyhow::Result<S>,
) -> anyhow::Result<S> {
    match result {
        Err(e) if is_transient(&e) => {
            warn!(
                target = %target,
                state = state.as_str(),
                "Transient Azure failure, retrying on next pass: {:#}",
                e
            );
            Ok(state)
        }
        other => other,
    }
}
