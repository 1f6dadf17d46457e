//! # Instance Watchdog
//!
//! Background repair of scale set instances, decoupled from reconciliation.
//!
//! Reconcilers ask for a job with [`Watchdog::guard_vmss`] or
//! [`Watchdog::delete_failed_vmss`]; both calls only claim the job key and
//! enqueue, so they never block a pass. At most one job per
//! `(resource group, scale set, action)` is in flight at a time.
//!
//! ## Module Structure
//!
//! - `registry.rs` - in-flight job keys
//! - `pool.rs` - worker tasks and the shared queue
//! - `jobs.rs` - guard and delete-failed jobs

mod jobs;
mod pool;
mod registry;

pub use jobs::{DeleteFailedJob, GuardJob};
pub use pool::WorkerPool;
pub use registry::{JobAction, JobKey, JobRegistry};

use crate::azure::ScaleSetsClient;
use crate::observability::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

/// A repeatable unit of background work
#[async_trait]
pub trait Job: Send {
    fn key(&self) -> &JobKey;

    /// Do at most one unit of work; returns immediately while cooling down
    async fn run(&mut self) -> anyhow::Result<()>;

    /// The job has nothing left to do and can be released
    fn finished(&self) -> bool;
}

/// Job submission seam used by the reconcilers
#[cfg_attr(test, automock)]
pub trait Watchdog: Send + Sync {
    /// Start reimaging failed instances of a scale set; `false` if already running
    fn guard_vmss(&self, resource_group: &str, scale_set: &str) -> bool;

    /// Start deleting failed instances of a scale set; `false` if already running
    fn delete_failed_vmss(&self, resource_group: &str, scale_set: &str) -> bool;
}

/// [`Watchdog`] running jobs on a [`WorkerPool`]
pub struct InstanceWatchdog {
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    scale_sets: Arc<dyn ScaleSetsClient>,
    cooldown: Duration,
}

impl std::fmt::Debug for InstanceWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceWatchdog")
            .field("registry", &self.registry)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

impl InstanceWatchdog {
    /// Start the worker pool
    pub fn start(
        workers: usize,
        cooldown: Duration,
        scale_sets: Arc<dyn ScaleSetsClient>,
    ) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let pool = WorkerPool::start(workers, Arc::clone(&registry));
        Self {
            registry,
            pool,
            scale_sets,
            cooldown,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Claim the job's key and queue it
    pub fn submit(&self, job: Box<dyn Job>) -> bool {
        let key = job.key().clone();
        if !self.registry.try_claim(&key) {
            debug!(job = %key, "Watchdog job already in flight");
            metrics::increment_watchdog_jobs_deduplicated();
            return false;
        }
        match self.pool.enqueue(job) {
            Ok(()) => {
                info!(job = %key, "Watchdog job queued");
                true
            }
            Err(_) => {
                warn!(job = %key, "Watchdog is shut down, job dropped");
                self.registry.release(&key);
                false
            }
        }
    }

    /// Close the queue and wait for the workers to exit
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}

impl Watchdog for InstanceWatchdog {
    fn guard_vmss(&self, resource_group: &str, scale_set: &str) -> bool {
        self.submit(Box::new(GuardJob::new(
            resource_group,
            scale_set,
            Arc::clone(&self.scale_sets),
            self.cooldown,
        )))
    }

    fn delete_failed_vmss(&self, resource_group: &str, scale_set: &str) -> bool {
        self.submit(Box::new(DeleteFailedJob::new(
            resource_group,
            scale_set,
            Arc::clone(&self.scale_sets),
            self.cooldown,
        )))
    }
}
