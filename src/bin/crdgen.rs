//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions owned by the operator as one
//! multi-document YAML stream. `NodeDrainRequest` and `Release` belong to
//! the drain controller and the release pipeline and are installed by them.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/azure-cluster-operator.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::Result;
use azure_cluster_operator::crd::{AzureControlPlane, AzureNodePool};
use kube::core::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [AzureControlPlane::crd(), AzureNodePool::crd()];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
