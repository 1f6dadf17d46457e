//! # Kubernetes Status Store
//!
//! [`StatusStore`] backed by the status subresource of the target.

use crate::constants::FIELD_MANAGER;
use crate::crd::StatusCarrier;
use crate::status::{StatusKey, StatusStore, StatusStoreError, StatusSummary, TargetRef};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// Status store for namespaced targets of kind `K`
pub struct KubeStatusStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStatusStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> KubeStatusStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + StatusCarrier
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, target: &TargetRef) -> Api<K> {
        Api::namespaced(self.client.clone(), &target.namespace)
    }

    /// Fetch the current object from the API server
    async fn fetch(&self, target: &TargetRef) -> Result<K, StatusStoreError> {
        self.api(target)
            .get_opt(&target.name)
            .await?
            .ok_or_else(|| StatusStoreError::NotFound {
                target: target.to_string(),
            })
    }

    /// Merge-patch the status, guarded by the resource version that was read
    async fn patch_status(
        &self,
        target: &TargetRef,
        resource_version: Option<String>,
        status: serde_json::Value,
    ) -> Result<(), StatusStoreError> {
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        match self
            .api(target)
            .patch_status(
                &target.name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 409 => Err(StatusStoreError::Conflict {
                target: target.to_string(),
            }),
            Err(kube::Error::Api(err)) if err.code == 404 => Err(StatusStoreError::NotFound {
                target: target.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<K> StatusStore<K> for KubeStatusStore<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + StatusCarrier
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(
        &self,
        target: &TargetRef,
        machine: &str,
        key: StatusKey,
    ) -> Result<Option<String>, StatusStoreError> {
        let obj = self.fetch(target).await?;
        Ok(obj
            .state_machine(machine)
            .and_then(|slot| key.read(slot))
            .map(str::to_string))
    }

    async fn set(
        &self,
        target: &TargetRef,
        machine: &str,
        key: StatusKey,
        value: &str,
    ) -> Result<(), StatusStoreError> {
        let obj = self.fetch(target).await?;
        let current = obj.state_machine(machine).and_then(|slot| key.read(slot));
        if current == Some(value) {
            debug!(target = %target, machine, field = key.field(), "Status field unchanged, skipping write");
            return Ok(());
        }

        let status = json!({
            "stateMachines": {
                machine: { key.field(): value }
            }
        });
        self.patch_status(target, obj.meta().resource_version.clone(), status)
            .await
    }

    async fn set_summary(
        &self,
        target: &TargetRef,
        summary: &StatusSummary,
    ) -> Result<(), StatusStoreError> {
        let obj = self.fetch(target).await?;
        let mut status = obj.reconcile_status().cloned().unwrap_or_default();
        if !summary.apply(&mut status) {
            debug!(target = %target, "Status summary unchanged, skipping write");
            return Ok(());
        }

        let patch = json!({
            "conditions": status.conditions,
            "observedGeneration": status.observed_generation,
        });
        self.patch_status(target, obj.meta().resource_version.clone(), patch)
            .await
    }
}
