//! # NodeDrainRequest
//!
//! Request for the external drain controller to evict workloads from one
//! tenant node. The operator only creates, lists and deletes these objects;
//! the drain controller reports progress through status conditions.

use crate::crd::Condition;
use serde::{Deserialize, Serialize};

/// Condition set by the drain controller once the node is drained
pub const CONDITION_DRAINED: &str = "Drained";

/// Condition set by the drain controller once it gave up on the node
pub const CONDITION_TIMED_OUT: &str = "TimedOut";

#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "NodeDrainRequest",
    group = "operations.azure-cluster.io",
    version = "v1alpha1",
    namespaced,
    status = "NodeDrainRequestStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainRequestSpec {
    /// Tenant cluster the node belongs to
    pub cluster_id: String,
    /// Name of the tenant node to drain
    pub node_name: String,
    /// Time the drain controller may spend before reporting `TimedOut`
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainRequestStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl NodeDrainRequest {
    fn has_true_condition(&self, condition_type: &str) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.r#type == condition_type && c.is_true())
        })
    }

    /// The drain controller finished evicting the node
    pub fn is_drained(&self) -> bool {
        self.has_true_condition(CONDITION_DRAINED)
    }

    /// The drain controller gave up on the node
    pub fn is_timed_out(&self) -> bool {
        self.has_true_condition(CONDITION_TIMED_OUT)
    }
}
