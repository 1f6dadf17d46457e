//! # Release
//!
//! Cluster-scoped release metadata, one object per release, named `v<version>`.

use serde::{Deserialize, Serialize};

#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Release",
    group = "release.azure-cluster.io",
    version = "v1alpha1"
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Component versions making up this release
    #[serde(default)]
    pub components: Vec<ReleaseComponent>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseComponent {
    pub name: String,
    pub version: String,
}

impl Release {
    /// Object name of the release with the given version
    pub fn object_name(version: &str) -> String {
        format!("v{}", version.trim_start_matches('v'))
    }

    /// Version of the named component, if the release ships it
    pub fn component(&self, name: &str) -> Option<&str> {
        self.spec
            .components
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.version.as_str())
    }
}
