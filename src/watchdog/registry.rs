//! # Job Registry
//!
//! Set of in-flight job keys. A job may only be queued after claiming its
//! key; the worker pool releases the key once the job finished.

use crate::observability::metrics;
use std::collections::HashSet;
use std::sync::Mutex;

/// What a watchdog job does to its scale set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobAction {
    Guard,
    DeleteFailed,
}

impl JobAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Guard => "guard",
            Self::DeleteFailed => "delete-failed",
        }
    }
}

/// Identity of a watchdog job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub resource_group: String,
    pub scale_set: String,
    pub action: JobAction,
}

impl JobKey {
    pub fn new(resource_group: &str, scale_set: &str, action: JobAction) -> Self {
        Self {
            resource_group: resource_group.to_string(),
            scale_set: scale_set.to_string(),
            action,
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.resource_group,
            self.scale_set,
            self.action.as_str()
        )
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    active: Mutex<HashSet<JobKey>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key` unless already present; `true` when this call inserted it
    pub fn try_claim(&self, key: &JobKey) -> bool {
        let mut active = self.active.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let claimed = active.insert(key.clone());
        metrics::set_watchdog_jobs_active(active.len());
        claimed
    }

    pub fn release(&self, key: &JobKey) {
        let mut active = self.active.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        active.remove(key);
        metrics::set_watchdog_jobs_active(active.len());
    }

    pub fn is_active(&self, key: &JobKey) -> bool {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(key)
    }
}
