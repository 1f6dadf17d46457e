//! # Kubernetes Collaborators
//!
//! Everything the reconcilers read from or write to Kubernetes besides their
//! own targets' status.
//!
//! ## Module Structure
//!
//! - `tenant.rs` - Tenant cluster clients and node operations
//! - `drain.rs` - `NodeDrainRequest` management
//! - `release.rs` - Release metadata lookup
//! - `cluster.rs` - Bootstrap data availability and control plane lifecycle

mod cluster;
mod drain;
mod release;
mod tenant;

pub use cluster::{BootstrapData, ControlPlaneLookup, KubeControlPlaneLookup, SecretBootstrapData};
pub use drain::{drain_request_name, new_drain_request, DrainRequests, KubeDrainRequests};
pub use release::{KubeReleaseCatalog, ReleaseCatalog, ReleaseInfo};
pub use tenant::{KubeconfigTenantClusters, TenantClusters, TenantError, TenantNode, TenantNodes};

#[cfg(test)]
pub use cluster::{MockBootstrapData, MockControlPlaneLookup};
#[cfg(test)]
pub use drain::MockDrainRequests;
#[cfg(test)]
pub use release::MockReleaseCatalog;
#[cfg(test)]
pub use tenant::{MockTenantClusters, MockTenantNodes};
