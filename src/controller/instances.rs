//! # Instance Classification
//!
//! Splits the instances of a scale set into old and new by the release
//! version label of the tenant node each one backs. An instance whose node
//! is not registered yet, or carries no parseable version label, is still
//! bootstrapping and belongs to neither set.

use crate::azure::ScaleSetInstance;
use crate::controller::version::ReleaseVersion;
use crate::kubernetes::TenantNode;
use std::collections::HashMap;
use tracing::debug;

/// An instance together with the name of its tenant node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedInstance {
    pub instance: ScaleSetInstance,
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Instances running a release older than the one reconciling
    pub old: Vec<ClassifiedInstance>,
    /// Instances running the reconciling release or a newer one
    pub new: Vec<ClassifiedInstance>,
}

impl Classification {
    pub fn old_instance_ids(&self) -> Vec<String> {
        self.old
            .iter()
            .map(|c| c.instance.instance_id.clone())
            .collect()
    }
}

/// Version label of a node, if present and parseable
pub fn node_version(node: &TenantNode) -> Option<ReleaseVersion> {
    let raw = node.release_version()?;
    match raw.parse() {
        Ok(version) => Some(version),
        Err(e) => {
            debug!(node = %node.name, "Ignoring node version label: {}", e);
            None
        }
    }
}

/// Classify `instances` against `reconciling`
pub fn classify(
    instances: &[ScaleSetInstance],
    nodes: &[TenantNode],
    reconciling: &ReleaseVersion,
) -> Classification {
    let by_name: HashMap<&str, &TenantNode> =
        nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut classification = Classification::default();
    for instance in instances {
        let node_name = instance.node_name();
        let Some(version) = by_name.get(node_name.as_str()).and_then(|n| node_version(n)) else {
            continue;
        };
        let classified = ClassifiedInstance {
            instance: instance.clone(),
            node_name,
        };
        if version < *reconciling {
            classification.old.push(classified);
        } else {
            classification.new.push(classified);
        }
    }
    classification
}
