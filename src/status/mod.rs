//! # Status Store
//!
//! Persists state machine positions and deployment checksums on the
//! reconciled resources.
//!
//! Every value lives in the `status.stateMachines.<machine>` slot of the
//! target. Writes re-fetch the object first and carry its
//! `resourceVersion`, so a concurrent writer makes the write fail with
//! [`StatusStoreError::Conflict`] instead of being silently overwritten.
//!
//! - `api.rs` - store backed by the Kubernetes status subresource
//! - `memory.rs` - in-process store used by tests and local tooling

mod api;
mod memory;

pub use api::KubeStatusStore;
pub use memory::MemoryStatusStore;

use crate::crd::{Condition, ReconcileStatus, StateMachineStatus, CONDITION_READY};
use async_trait::async_trait;
use thiserror::Error;

/// Identity of a namespaced target resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub namespace: String,
    pub name: String,
}

impl TargetRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: kube::Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.meta().namespace.clone().unwrap_or_else(|| "default".to_string()),
            name: obj.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl std::fmt::Display for TargetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Field of a state machine slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKey {
    State,
    DeploymentTemplateChecksum,
    DeploymentParametersChecksum,
    CreatedAt,
}

impl StatusKey {
    /// JSON field name inside the slot
    pub fn field(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::DeploymentTemplateChecksum => "deploymentTemplateChecksum",
            Self::DeploymentParametersChecksum => "deploymentParametersChecksum",
            Self::CreatedAt => "createdAt",
        }
    }

    pub fn read(self, slot: &StateMachineStatus) -> Option<&str> {
        match self {
            Self::State => slot.state.as_deref(),
            Self::DeploymentTemplateChecksum => slot.deployment_template_checksum.as_deref(),
            Self::DeploymentParametersChecksum => slot.deployment_parameters_checksum.as_deref(),
            Self::CreatedAt => slot.created_at.as_deref(),
        }
    }

    pub fn write(self, slot: &mut StateMachineStatus, value: &str) {
        let value = Some(value.to_string());
        match self {
            Self::State => slot.state = value,
            Self::DeploymentTemplateChecksum => slot.deployment_template_checksum = value,
            Self::DeploymentParametersChecksum => slot.deployment_parameters_checksum = value,
            Self::CreatedAt => slot.created_at = value,
        }
    }
}

/// Summary written after a pass that did not stop early
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub ready: bool,
    pub reason: String,
    pub message: String,
    pub observed_generation: Option<i64>,
}

impl StatusSummary {
    /// Merge into `status`; returns whether anything changed
    ///
    /// The `Ready` condition keeps its transition time while its status
    /// stays the same.
    pub(crate) fn apply(&self, status: &mut ReconcileStatus) -> bool {
        let ready_status = if self.ready { "True" } else { "False" };
        let mut changed = status.observed_generation != self.observed_generation;
        status.observed_generation = self.observed_generation;

        match status
            .conditions
            .iter_mut()
            .find(|c| c.r#type == CONDITION_READY)
        {
            Some(existing) => {
                if existing.status != ready_status {
                    existing.status = ready_status.to_string();
                    existing.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
                    changed = true;
                }
                if existing.reason.as_deref() != Some(self.reason.as_str())
                    || existing.message.as_deref() != Some(self.message.as_str())
                {
                    existing.reason = Some(self.reason.clone());
                    existing.message = Some(self.message.clone());
                    changed = true;
                }
            }
            None => {
                status.conditions.push(Condition {
                    r#type: CONDITION_READY.to_string(),
                    status: ready_status.to_string(),
                    last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
                    reason: Some(self.reason.clone()),
                    message: Some(self.message.clone()),
                });
                changed = true;
            }
        }
        changed
    }
}

#[derive(Debug, Error)]
pub enum StatusStoreError {
    #[error("{target} not found")]
    NotFound { target: String },

    #[error("{target} was modified concurrently")]
    Conflict { target: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl StatusStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Durable storage of state machine slots for targets of kind `K`
#[async_trait]
pub trait StatusStore<K>: Send + Sync {
    /// Read one field of a machine's slot from the current object
    async fn get(
        &self,
        target: &TargetRef,
        machine: &str,
        key: StatusKey,
    ) -> Result<Option<String>, StatusStoreError>;

    /// Write one field of a machine's slot
    async fn set(
        &self,
        target: &TargetRef,
        machine: &str,
        key: StatusKey,
        value: &str,
    ) -> Result<(), StatusStoreError>;

    /// Write the `Ready` condition and observed generation
    async fn set_summary(
        &self,
        target: &TargetRef,
        summary: &StatusSummary,
    ) -> Result<(), StatusStoreError>;
}
