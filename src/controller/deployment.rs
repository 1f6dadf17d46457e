//! # Deployment Descriptors
//!
//! An ARM deployment request together with the checksums of its template
//! and parameters. The checksums are persisted in the target's state machine
//! slot on every submission and compared against freshly computed ones to
//! detect drift.
//!
//! Templates are opaque JSON documents rendered outside the operator and read
//! from the template directory.

use crate::azure::{DeploymentParameters, DeploymentRequest, DeploymentsClient};
use crate::status::{StatusKey, StatusStore, StatusStoreError, TargetRef};
use anyhow::Context;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{info, warn};

#[cfg(test)]
use mockall::automock;

/// SHA-256 of the canonical JSON encoding of `value`
///
/// `serde_json` maps keep their keys sorted, so equal documents always
/// serialize to the same bytes.
pub fn checksum(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A deployment about to be submitted
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentDescriptor {
    pub name: String,
    pub template: Value,
    pub parameters: DeploymentParameters,
}

impl DeploymentDescriptor {
    pub fn new(name: impl Into<String>, template: Value, parameters: DeploymentParameters) -> Self {
        Self {
            name: name.into(),
            template,
            parameters,
        }
    }

    pub fn template_checksum(&self) -> String {
        checksum(&self.template)
    }

    pub fn parameters_checksum(&self) -> String {
        checksum(&self.parameters.to_json())
    }

    pub fn request(&self) -> DeploymentRequest {
        DeploymentRequest {
            template: self.template.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Whether the checksums stored for the last submission still match
    ///
    /// Missing stored checksums count as drift.
    pub fn matches(&self, template_checksum: Option<&str>, parameters_checksum: Option<&str>) -> bool {
        template_checksum == Some(self.template_checksum().as_str())
            && parameters_checksum == Some(self.parameters_checksum().as_str())
    }
}

/// Submit `descriptor` and record its checksums in the machine's slot
///
/// Returns `false` when the checksums could not be written because the
/// target changed concurrently. The submission itself already happened; the
/// caller stays in its state and re-derives what is left to do on the next
/// pass from what Azure reports.
/// # Errors
/// Returns submission failures and status store failures other than conflicts
pub async fn submit<K>(
    deployments: &dyn DeploymentsClient,
    store: &dyn StatusStore<K>,
    target: &TargetRef,
    machine: &str,
    resource_group: &str,
    descriptor: &DeploymentDescriptor,
) -> anyhow::Result<bool> {
    deployments
        .create_or_update(resource_group, &descriptor.name, &descriptor.request())
        .await
        .with_context(|| format!("submitting deployment {}", descriptor.name))?;
    info!(
        target = %target,
        resource_group,
        deployment = %descriptor.name,
        "Submitted deployment"
    );

    for (key, value) in [
        (StatusKey::DeploymentTemplateChecksum, descriptor.template_checksum()),
        (StatusKey::DeploymentParametersChecksum, descriptor.parameters_checksum()),
    ] {
        match store.set(target, machine, key, &value).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                warn!(target = %target, "Target changed while recording deployment checksums");
                return Ok(false);
            }
            Err(e) => return Err(checksum_error(e)),
        }
    }
    Ok(true)
}

fn checksum_error(e: StatusStoreError) -> anyhow::Error {
    anyhow::Error::new(e).context("recording deployment checksums")
}

/// Source of the opaque deployment templates
#[cfg_attr(test, automock)]
pub trait TemplateSource: Send + Sync {
    fn master_template(&self) -> anyhow::Result<Value>;

    fn worker_template(&self) -> anyhow::Result<Value>;
}

/// Templates read from `master.json` and `worker.json` in a directory
///
/// Files are read on every call so that rendered templates can be replaced
/// without restarting the operator.
#[derive(Debug, Clone)]
pub struct FileTemplateSource {
    dir: PathBuf,
}

impl FileTemplateSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read(&self, file: &str) -> anyhow::Result<Value> {
        let path = self.dir.join(file);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading deployment template {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing deployment template {}", path.display()))
    }
}

impl TemplateSource for FileTemplateSource {
    fn master_template(&self) -> anyhow::Result<Value> {
        self.read("master.json")
    }

    fn worker_template(&self) -> anyhow::Result<Value> {
        self.read("worker.json")
    }
}
