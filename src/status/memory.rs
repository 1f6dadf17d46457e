//! # In-Memory Status Store
//!
//! Keeps reconcile statuses in a map. Used by transition tests and by the
//! end-to-end rolling upgrade tests, where it also records every state the
//! machines passed through.

use crate::crd::ReconcileStatus;
use crate::status::{StatusKey, StatusStore, StatusStoreError, StatusSummary, TargetRef};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<TargetRef, ReconcileStatus>>,
    history: Mutex<Vec<(TargetRef, String, String)>>,
    conflicts_to_inject: AtomicUsize,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one field of a machine slot
    pub fn seed(&self, target: &TargetRef, machine: &str, key: StatusKey, value: &str) {
        let mut statuses = self.statuses.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = statuses
            .entry(target.clone())
            .or_default()
            .state_machines
            .entry(machine.to_string())
            .or_default();
        key.write(slot, value);
    }

    /// Full status of a target
    pub fn status(&self, target: &TargetRef) -> Option<ReconcileStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Every `(target, machine, state)` written so far, in order
    pub fn state_history(&self) -> Vec<(TargetRef, String, String)> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Make the next `count` writes fail with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    fn take_conflict(&self, target: &TargetRef) -> Result<(), StatusStoreError> {
        let injected = self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StatusStoreError::Conflict {
                target: target.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<K> StatusStore<K> for MemoryStatusStore {
    async fn get(
        &self,
        target: &TargetRef,
        machine: &str,
        key: StatusKey,
    ) -> Result<Option<String>, StatusStoreError> {
        let statuses = self.statuses.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(statuses
            .get(target)
            .and_then(|s| s.state_machines.get(machine))
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
        self.take_conflict(target)?;
        self.seed(target, machine, key, value);
        if key == StatusKey::State {
            self.history
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((target.clone(), machine.to_string(), value.to_string()));
        }
        Ok(())
    }

    async fn set_summary(
        &self,
        target: &TargetRef,
        summary: &StatusSummary,
    ) -> Result<(), StatusStoreError> {
        self.take_conflict(target)?;
        let mut statuses = self.statuses.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        summary.apply(statuses.entry(target.clone()).or_default());
        Ok(())
    }
}
