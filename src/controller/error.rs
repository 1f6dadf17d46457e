//! # Reconciler Errors

use crate::statemachine::StateMachineError;
use crate::status::StatusStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error("Status update failed: {0}")]
    Status(#[from] StatusStoreError),

    #[error("Finalizer failed: {0}")]
    Finalizer(#[source] Box<kube_runtime::finalizer::Error<ReconcilerError>>),
}
