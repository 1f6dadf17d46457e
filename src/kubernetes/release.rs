//! # Release Metadata
//!
//! Component versions of a release, read from the cluster-scoped `Release`
//! object named after it.

use crate::crd::Release;
use anyhow::Context;
use async_trait::async_trait;
use kube::api::Api;
use kube::Client;

#[cfg(test)]
use mockall::automock;

/// Component carrying the Kubernetes version
pub const KUBERNETES_COMPONENT: &str = "kubernetes";

/// Component carrying the machine image version
pub const IMAGE_COMPONENT: &str = "image";

/// Component versions the deployment parameters are built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub kubernetes: String,
    pub image: String,
}

impl ReleaseInfo {
    /// # Errors
    /// Fails when the release does not ship one of the required components
    pub fn from_release(release: &Release) -> anyhow::Result<Self> {
        let component = |name: &str| {
            release
                .component(name)
                .map(str::to_string)
                .with_context(|| {
                    format!(
                        "release {} has no '{name}' component",
                        kube::ResourceExt::name_any(release)
                    )
                })
        };
        Ok(Self {
            kubernetes: component(KUBERNETES_COMPONENT)?,
            image: component(IMAGE_COMPONENT)?,
        })
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    async fn components(&self, release_version: &str) -> anyhow::Result<ReleaseInfo>;
}

#[derive(Clone)]
pub struct KubeReleaseCatalog {
    releases: Api<Release>,
}

impl std::fmt::Debug for KubeReleaseCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeReleaseCatalog").finish_non_exhaustive()
    }
}

impl KubeReleaseCatalog {
    pub fn new(client: Client) -> Self {
        Self {
            releases: Api::all(client),
        }
    }
}

#[async_trait]
impl ReleaseCatalog for KubeReleaseCatalog {
    async fn components(&self, release_version: &str) -> anyhow::Result<ReleaseInfo> {
        let name = Release::object_name(release_version);
        let release = self
            .releases
            .get(&name)
            .await
            .with_context(|| format!("fetching release {name}"))?;
        ReleaseInfo::from_release(&release)
    }
}
