//! # Pass Driver
//!
//! Runs one state machine step for one target and persists the outcome.

use crate::observability::metrics;
use crate::statemachine::{MachineState, StateMachine, StateMachineError, TransitionGraph};
use crate::status::{StatusKey, StatusStore, TargetRef};
use tracing::{debug, info, warn};

/// What the rest of the pass should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// State unchanged; later pipeline steps run
    Continue,
    /// State changed (or the write was abandoned); the pass ends here
    StopPipeline,
}

/// Result of one state machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassOutcome<S> {
    pub next_action: NextAction,
    /// State the target is in after this step, as far as this pass knows
    pub state: S,
}

/// Run one step of `machine` for `target`
///
/// The current token is read fresh from `store`. The transition's result is
/// written back only when it differs from the current state; a write that
/// loses an optimistic-concurrency race is abandoned and the pass stops.
/// # Errors
/// Returns transition failures and status store failures other than conflicts
pub async fn drive<G, K>(
    machine: &StateMachine<G>,
    store: &dyn StatusStore<K>,
    target_ref: &TargetRef,
    target: &G::Target,
) -> Result<PassOutcome<G::State>, StateMachineError>
where
    G: TransitionGraph,
{
    let token = store
        .get(target_ref, machine.name(), StatusKey::State)
        .await
        .map_err(|source| StateMachineError::Status {
            machine: machine.name(),
            source,
        })?;

    let (current, next) = machine.execute(target, token.as_deref()).await?;

    if next == current {
        debug!(
            target = %target_ref,
            machine = machine.name(),
            state = current.as_str(),
            "State unchanged"
        );
        return Ok(PassOutcome {
            next_action: NextAction::Continue,
            state: current,
        });
    }

    match store
        .set(target_ref, machine.name(), StatusKey::State, next.as_str())
        .await
    {
        Ok(()) => {
            info!(
                target = %target_ref,
                machine = machine.name(),
                state = current.as_str(),
                next_state = next.as_str(),
                "State machine advanced"
            );
            metrics::record_state_transition(machine.name(), current.as_str(), next.as_str());
            Ok(PassOutcome {
                next_action: NextAction::StopPipeline,
                state: next,
            })
        }
        Err(e) if e.is_conflict() => {
            warn!(
                target = %target_ref,
                machine = machine.name(),
                state = current.as_str(),
                next_state = next.as_str(),
                "Target changed while persisting state, retrying on next pass"
            );
            metrics::increment_state_write_conflicts(machine.name());
            Ok(PassOutcome {
                next_action: NextAction::StopPipeline,
                state: current,
            })
        }
        Err(source) => Err(StateMachineError::Status {
            machine: machine.name(),
            source,
        }),
    }
}
