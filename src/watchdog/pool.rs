//! # Worker Pool
//!
//! Fixed set of tokio tasks pulling jobs from a shared queue.
//!
//! A worker runs one unit of a job, then either releases the job's key (the
//! job finished) or puts it back on the queue after a short random delay.
//! Closing the pool drops the only strong sender; workers exit once the
//! queue is drained.

use crate::constants::{JOB_REQUEUE_JITTER_MAX_MS, JOB_REQUEUE_JITTER_MIN_MS};
use crate::observability::metrics;
use crate::watchdog::{Job, JobRegistry};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type BoxedJob = Box<dyn Job>;

pub struct WorkerPool {
    sender: std::sync::Mutex<Option<UnboundedSender<BoxedJob>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `workers` tasks; finished jobs are released from `registry`
    pub fn start(workers: usize, registry: Arc<JobRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<BoxedJob>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let handles = (0..workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    sender.downgrade(),
                    Arc::clone(&registry),
                ))
            })
            .collect();
        info!(workers, "Watchdog worker pool started");
        Self {
            sender: std::sync::Mutex::new(Some(sender)),
            workers: std::sync::Mutex::new(handles),
        }
    }

    /// Queue a job; hands it back when the pool is closed
    pub fn enqueue(&self, job: BoxedJob) -> Result<(), BoxedJob> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|rejected| rejected.0),
            None => Err(job),
        }
    }

    /// Stop accepting jobs and wait for the workers to drain the queue
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let handles: Vec<_> = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Watchdog worker ended abnormally: {}", e);
            }
        }
        info!("Watchdog worker pool stopped");
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<BoxedJob>>>,
    requeue: WeakUnboundedSender<BoxedJob>,
    registry: Arc<JobRegistry>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(mut job) = next else {
            debug!(worker = id, "Job queue closed, worker exiting");
            return;
        };

        let key = job.key().clone();
        match job.run().await {
            Ok(()) => metrics::record_watchdog_job_run(key.action.as_str(), true),
            Err(e) => {
                error!(worker = id, job = %key, "Watchdog job run failed: {:#}", e);
                metrics::record_watchdog_job_run(key.action.as_str(), false);
            }
        }

        if job.finished() {
            info!(worker = id, job = %key, "Watchdog job finished");
            registry.release(&key);
            continue;
        }

        let delay = Duration::from_millis(
            rand::rng().random_range(JOB_REQUEUE_JITTER_MIN_MS..=JOB_REQUEUE_JITTER_MAX_MS),
        );
        let requeue = requeue.clone();
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let sent = match requeue.upgrade() {
                Some(sender) => sender.send(job).is_ok(),
                None => false,
            };
            if !sent {
                debug!(job = %key, "Job queue closed, dropping unfinished job");
                registry.release(&key);
            }
        });
    }
}
