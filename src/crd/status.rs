//! # Reconcile Status
//!
//! Status shared by `AzureControlPlane` and `AzureNodePool`.
//!
//! Every reconciler owns one slot in `stateMachines`, keyed by its name. The
//! slot is the durable position of that reconciler's state machine; nothing
//! else in the status is needed to resume an interrupted rolling upgrade.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition type summarising whether the target is converged
pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStatus {
    /// Per-reconciler state machine slots, keyed by reconciler name
    #[serde(default)]
    pub state_machines: BTreeMap<String, StateMachineStatus>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation observed by the last completed pass
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Durable position of one state machine
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StateMachineStatus {
    /// Current state token; absent means the initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Checksum of the last submitted deployment template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_template_checksum: Option<String>,
    /// Checksum of the last submitted deployment parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_parameters_checksum: Option<String>,
    /// First time the machine reached its converged state (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    /// Whether this condition has status `True`
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Access to the reconcile status of a target resource
pub trait StatusCarrier {
    fn reconcile_status(&self) -> Option<&ReconcileStatus>;

    /// State machine slot of the named reconciler, if any was ever written
    fn state_machine(&self, machine: &str) -> Option<&StateMachineStatus> {
        self.reconcile_status()
            .and_then(|s| s.state_machines.get(machine))
    }

    /// Condition of the given type, if present
    fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.reconcile_status()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == condition_type))
    }
}
