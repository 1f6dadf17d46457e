//! # Azure
//!
//! Collaborator seams towards Azure Resource Manager and their REST
//! implementation.
//!
//! The reconcilers only ever talk to the traits defined here, so every
//! transition can be exercised against mocks or in-memory fakes. The
//! production implementation is [`ArmClient`], a thin REST client over
//! `reqwest` authenticated with an `azure_core` token credential.
//!
//! ## Module Structure
//!
//! - `arm.rs` - HTTP plumbing, token caching and the deployments API
//! - `scale_sets.rs` - Virtual machine scale set and instance operations
//! - `capabilities.rs` - VM size capability lookup (resource SKUs)
//! - `autoscaler.rs` - cluster-autoscaler toggle through scale set tags
//! - `credentials.rs` - Token credential selection

mod arm;
mod autoscaler;
mod capabilities;
mod credentials;
mod scale_sets;

pub use arm::ArmClient;
pub use autoscaler::TagAutoscaler;
pub use credentials::{build_credential, StaticTokenCredential};

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors returned by Azure collaborators
#[derive(Debug, Error)]
pub enum AzureError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Azure returned HTTP {status} for {operation}: {message}")]
    Http {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("failed to acquire Azure token: {0}")]
    Credential(String),

    #[error("request to Azure failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected Azure response for {operation}: {message}")]
    Decode { operation: String, message: String },
}

impl AzureError {
    /// The addressed resource does not exist (yet)
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Http { status, .. } => *status == 404,
            _ => false,
        }
    }

    /// Worth retrying on a later pass without operator intervention
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Http { status, .. } => matches!(*status, 404 | 409 | 429) || *status >= 500,
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            Self::Credential(_) | Self::Decode { .. } => false,
        }
    }
}

/// Provisioning state of a deployment or a scale set instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Succeeded,
    Failed,
    Canceled,
    /// Any non-terminal state (`Accepted`, `Running`, `Updating`, `Deleting`, ...)
    InProgress(String),
}

impl ProvisioningState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::InProgress(raw.to_string()),
        }
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// `Failed` or `Canceled`; the operation will not make further progress
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::InProgress(raw) => raw,
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat view of ARM deployment parameters (`name -> value`)
///
/// ARM wraps every value as `{"value": ...}` on the way in and as
/// `{"type": ..., "value": ...}` on the way out; this type holds the bare
/// values so that desired and applied parameters compare directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentParameters(pub BTreeMap<String, serde_json::Value>);

impl DeploymentParameters {
    /// Parse the `parameters` object of an ARM deployment
    pub fn from_arm(raw: &serde_json::Value) -> Self {
        let values = raw
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(name, wrapped)| {
                        let value = wrapped.get("value").cloned().unwrap_or(serde_json::Value::Null);
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self(values)
    }

    /// Render as the `parameters` object of an ARM deployment request
    pub fn to_arm(&self) -> serde_json::Value {
        let map = self
            .0
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!({ "value": value })))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }

    /// Render as plain JSON (`name -> value`), the input of the parameters checksum
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone().into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(name.to_string(), value.into());
    }

    /// Names whose values differ between `self` and `other`, in either direction
    pub fn changed_keys(&self, other: &Self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .0
            .keys()
            .chain(other.0.keys())
            .filter(|k| self.0.get(*k) != other.0.get(*k))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// An ARM deployment as observed
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub name: String,
    pub provisioning_state: ProvisioningState,
    pub parameters: DeploymentParameters,
}

/// Body of a deployment `PUT`
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentRequest {
    pub template: serde_json::Value,
    pub parameters: DeploymentParameters,
}

/// A virtual machine scale set as observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleSet {
    pub name: String,
    pub capacity: u32,
    /// OS disk storage account type (`Premium_LRS`, `Standard_LRS`, ...)
    pub storage_account_type: Option<String>,
    /// Accelerated networking flag of the primary network interface
    pub accelerated_networking: Option<bool>,
    pub tags: BTreeMap<String, String>,
}

/// One virtual machine inside a scale set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleSetInstance {
    pub instance_id: String,
    /// Host name; the tenant node registers under this name
    pub computer_name: String,
    pub provisioning_state: ProvisioningState,
    /// The instance runs the latest scale set model
    pub latest_model_applied: bool,
}

impl ScaleSetInstance {
    /// Tenant node name backed by this instance
    pub fn node_name(&self) -> String {
        self.computer_name.to_ascii_lowercase()
    }
}

/// Capabilities of a VM size in a region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmSizeCapabilities {
    pub accelerated_networking: bool,
    pub premium_io: bool,
}

/// ARM deployments of one subscription
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeploymentsClient: Send + Sync {
    /// Fetch a deployment; `None` when it does not exist
    async fn get(&self, resource_group: &str, name: &str)
        -> Result<Option<Deployment>, AzureError>;

    /// Submit a deployment; returns once ARM accepted it
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
    ) -> Result<(), AzureError>;

    /// Delete a deployment record; deployed resources are not affected
    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError>;
}

/// Virtual machine scale sets of one subscription
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScaleSetsClient: Send + Sync {
    /// Fetch a scale set; `None` when it does not exist
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<ScaleSet>, AzureError>;

    /// List every instance of a scale set
    async fn list_instances(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<ScaleSetInstance>, AzureError>;

    /// Set the scale set capacity
    async fn set_capacity(
        &self,
        resource_group: &str,
        name: &str,
        capacity: u32,
    ) -> Result<(), AzureError>;

    /// Replace the scale set tags
    async fn set_tags(
        &self,
        resource_group: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), AzureError>;

    /// Delete instances in one batch
    async fn delete_instances(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError>;

    /// Roll instances forward to the latest scale set model
    async fn update_instances(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError>;

    /// Reimage instances from the scale set's image
    async fn reimage(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError>;

    /// Delete the scale set and all of its instances
    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError>;
}

/// VM size capability lookup
#[cfg_attr(test, automock)]
#[async_trait]
pub trait VmCapabilities: Send + Sync {
    async fn capabilities(
        &self,
        location: &str,
        vm_size: &str,
    ) -> Result<VmSizeCapabilities, AzureError>;
}

/// External cluster-autoscaler switch for one scale set
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterAutoscaler: Send + Sync {
    async fn enable(
        &self,
        resource_group: &str,
        scale_set: &str,
        min: u32,
        max: u32,
    ) -> Result<(), AzureError>;

    async fn disable(&self, resource_group: &str, scale_set: &str) -> Result<(), AzureError>;
}
