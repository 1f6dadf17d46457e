//! # Cluster Autoscaler Toggle
//!
//! The tenant's cluster-autoscaler discovers node pools through scale set
//! tags. Turning it off for a pool means flipping the discovery tag so the
//! autoscaler leaves the capacity alone during a rolling replacement.

use crate::azure::{AzureError, ClusterAutoscaler, ScaleSetsClient};
use crate::constants::{AUTOSCALER_ENABLED_TAG, AUTOSCALER_MAX_TAG, AUTOSCALER_MIN_TAG};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// [`ClusterAutoscaler`] backed by scale set tags
pub struct TagAutoscaler {
    scale_sets: Arc<dyn ScaleSetsClient>,
}

impl std::fmt::Debug for TagAutoscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAutoscaler").finish_non_exhaustive()
    }
}

impl TagAutoscaler {
    pub fn new(scale_sets: Arc<dyn ScaleSetsClient>) -> Self {
        Self { scale_sets }
    }

    /// Apply `update` to the scale set tags and write them back if anything changed
    async fn update_tags(
        &self,
        resource_group: &str,
        scale_set: &str,
        update: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), AzureError> {
        let current = self
            .scale_sets
            .get(resource_group, scale_set)
            .await?
            .ok_or_else(|| AzureError::NotFound {
                resource: format!("scale set {resource_group}/{scale_set}"),
            })?;

        let mut tags = current.tags.clone();
        update(&mut tags);
        if tags == current.tags {
            debug!(resource_group, scale_set, "Autoscaler tags already up to date");
            return Ok(());
        }
        self.scale_sets
            .set_tags(resource_group, scale_set, &tags)
            .await
    }
}

#[async_trait]
impl ClusterAutoscaler for TagAutoscaler {
    async fn enable(
        &self,
        resource_group: &str,
        scale_set: &str,
        min: u32,
        max: u32,
    ) -> Result<(), AzureError> {
        info!(resource_group, scale_set, min, max, "Enabling cluster autoscaler");
        self.update_tags(resource_group, scale_set, |tags| {
            tags.insert(AUTOSCALER_ENABLED_TAG.to_string(), "true".to_string());
            tags.insert(AUTOSCALER_MIN_TAG.to_string(), min.to_string());
            tags.insert(AUTOSCALER_MAX_TAG.to_string(), max.to_string());
        })
        .await
    }

    async fn disable(&self, resource_group: &str, scale_set: &str) -> Result<(), AzureError> {
        info!(resource_group, scale_set, "Disabling cluster autoscaler");
        self.update_tags(resource_group, scale_set, |tags| {
            tags.insert(AUTOSCALER_ENABLED_TAG.to_string(), "false".to_string());
        })
        .await
    }
}
