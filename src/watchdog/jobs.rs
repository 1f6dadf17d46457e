//! # Watchdog Jobs
//!
//! The two repair jobs run against a single scale set. Each `run` call does
//! at most one unit of work and returns early while the job's cooldown has
//! not elapsed.

use crate::azure::{ProvisioningState, ScaleSetInstance, ScaleSetsClient};
use crate::constants::{GUARD_HEALTHY_CHECKS, GUARD_MAX_REIMAGE_ROUNDS, INSTANCE_DELETE_ATTEMPTS};
use crate::watchdog::{Job, JobAction, JobKey};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

fn failed_instances(instances: &[ScaleSetInstance]) -> Vec<&ScaleSetInstance> {
    instances
        .iter()
        .filter(|i| i.provisioning_state == ProvisioningState::Failed)
        .collect()
}

/// Shared cooldown bookkeeping
#[derive(Debug)]
struct Cooldown {
    period: Duration,
    next_run: Instant,
}

impl Cooldown {
    fn new(period: Duration) -> Self {
        Self {
            period,
            next_run: Instant::now(),
        }
    }

    /// `true` if a unit of work may run now; arms the next cooldown
    fn ready(&mut self) -> bool {
        let now = Instant::now();
        if now < self.next_run {
            return false;
        }
        self.next_run = now + self.period;
        true
    }
}

/// Reimages failed instances until the scale set stays healthy
pub struct GuardJob {
    key: JobKey,
    scale_sets: Arc<dyn ScaleSetsClient>,
    cooldown: Cooldown,
    healthy_checks: u32,
    reimage_rounds: u32,
    done: bool,
}

impl std::fmt::Debug for GuardJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardJob")
            .field("key", &self.key)
            .field("healthy_checks", &self.healthy_checks)
            .field("reimage_rounds", &self.reimage_rounds)
            .finish_non_exhaustive()
    }
}

impl GuardJob {
    pub fn new(
        resource_group: &str,
        scale_set: &str,
        scale_sets: Arc<dyn ScaleSetsClient>,
        cooldown: Duration,
    ) -> Self {
        Self {
            key: JobKey::new(resource_group, scale_set, JobAction::Guard),
            scale_sets,
            cooldown: Cooldown::new(cooldown),
            healthy_checks: 0,
            reimage_rounds: 0,
            done: false,
        }
    }
}

#[async_trait]
impl Job for GuardJob {
    fn key(&self) -> &JobKey {
        &self.key
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        if !self.cooldown.ready() {
            return Ok(());
        }
        let (rg, vmss) = (&self.key.resource_group, &self.key.scale_set);

        let instances = match self.scale_sets.list_instances(rg, vmss).await {
            Ok(instances) => instances,
            Err(e) if e.is_not_found() => {
                info!(resource_group = %rg, vmss = %vmss, "Scale set gone, stopping guard");
                self.done = true;
                return Ok(());
            }
            Err(e) => return Err(e).context("listing instances to guard"),
        };

        let Some(failed) = failed_instances(&instances).first().copied() else {
            self.healthy_checks += 1;
            if self.healthy_checks >= GUARD_HEALTHY_CHECKS {
                info!(resource_group = %rg, vmss = %vmss, "Scale set healthy, guard finished");
                self.done = true;
            }
            return Ok(());
        };

        self.healthy_checks = 0;
        if self.reimage_rounds >= GUARD_MAX_REIMAGE_ROUNDS {
            warn!(
                resource_group = %rg,
                vmss = %vmss,
                rounds = self.reimage_rounds,
                "Instances keep failing after reimage, giving up"
            );
            self.done = true;
            return Ok(());
        }

        info!(
            resource_group = %rg,
            vmss = %vmss,
            instance_id = %failed.instance_id,
            "Reimaging failed instance"
        );
        self.reimage_rounds += 1;
        self.scale_sets
            .reimage(rg, vmss, &[failed.instance_id.clone()])
            .await
            .with_context(|| format!("reimaging instance {}", failed.instance_id))
    }

    fn finished(&self) -> bool {
        self.done
    }
}

/// Deletes failed instances one at a time until none is left
pub struct DeleteFailedJob {
    key: JobKey,
    scale_sets: Arc<dyn ScaleSetsClient>,
    cooldown: Cooldown,
    done: bool,
}

impl std::fmt::Debug for DeleteFailedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteFailedJob")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DeleteFailedJob {
    pub fn new(
        resource_group: &str,
        scale_set: &str,
        scale_sets: Arc<dyn ScaleSetsClient>,
        cooldown: Duration,
    ) -> Self {
        Self {
            key: JobKey::new(resource_group, scale_set, JobAction::DeleteFailed),
            scale_sets,
            cooldown: Cooldown::new(cooldown),
            done: false,
        }
    }
}

#[async_trait]
impl Job for DeleteFailedJob {
    fn key(&self) -> &JobKey {
        &self.key
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        if !self.cooldown.ready() {
            return Ok(());
        }
        let (rg, vmss) = (&self.key.resource_group, &self.key.scale_set);

        let instances = match self.scale_sets.list_instances(rg, vmss).await {
            Ok(instances) => instances,
            Err(e) if e.is_not_found() => {
                self.done = true;
                return Ok(());
            }
            Err(e) => return Err(e).context("listing instances to clean up"),
        };

        let Some(failed) = failed_instances(&instances).first().copied() else {
            self.done = true;
            return Ok(());
        };

        let ids = [failed.instance_id.clone()];
        let mut last_error = None;
        for attempt in 1..=INSTANCE_DELETE_ATTEMPTS {
            match self.scale_sets.delete_instances(rg, vmss, &ids).await {
                Ok(()) => {
                    info!(
                        resource_group = %rg,
                        vmss = %vmss,
                        instance_id = %failed.instance_id,
                        "Deleted failed instance"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        resource_group = %rg,
                        vmss = %vmss,
                        instance_id = %failed.instance_id,
                        attempt,
                        "Deleting failed instance did not succeed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e).with_context(|| {
                format!(
                    "deleting instance {} after {INSTANCE_DELETE_ATTEMPTS} attempts",
                    failed.instance_id
                )
            }),
            None => Ok(()),
        }
    }

    fn finished(&self) -> bool {
        self.done
    }
}
