//! Checkpoint store
//!
//! The [`CheckpointStore`] owns every [`CheckpointEntry`] transition. Calls
//! for the same unit are serialized through a per-unit lock; calls for
//! distinct units never contend. Each transition is flushed to storage
//! before the call returns.

use super::entry::{CheckpointEntry, UnitCounters, UnitStatus};
use crate::adapters::checkpoint::CheckpointStorage;
use crate::core::controller::RunSummary;
use crate::domain::{Result, SieveError, WorkUnitId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type UnitLocks = Mutex<HashMap<WorkUnitId, Arc<AsyncMutex<()>>>>;

/// Held for the duration of one transition
///
/// On drop the unit's lock is released and, when no other caller is queued
/// on it, removed from the table.
struct UnitGuard<'a> {
    locks: &'a UnitLocks,
    unit_id: WorkUnitId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.unit_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.unit_id);
        }
    }
}

/// Durable record of which work units are done
pub struct CheckpointStore {
    storage: Arc<dyn CheckpointStorage>,
    locks: UnitLocks,
}

impl CheckpointStore {
    /// Create a store over a storage backend
    ///
    /// # Arguments
    ///
    /// * `storage` - Durable backend for entries and run history
    pub fn new(storage: Arc<dyn CheckpointStorage>) -> Self {
        Self {
            storage,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_unit(&self, unit_id: &WorkUnitId) -> UnitGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(unit_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let mut unit = UnitGuard {
            locks: &self.locks,
            unit_id: unit_id.clone(),
            guard: None,
        };
        unit.guard = Some(lock.lock_owned().await);
        unit
    }

    /// Units with a lock currently held or awaited
    pub fn locked_units(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn current(&self, unit_id: &WorkUnitId) -> Result<CheckpointEntry> {
        Ok(self
            .storage
            .load(unit_id)
            .await?
            .unwrap_or_else(|| CheckpointEntry::pending(unit_id.clone())))
    }

    /// Whether the unit has been committed
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read.
    pub async fn is_complete(&self, unit_id: &WorkUnitId) -> Result<bool> {
        Ok(self.status(unit_id).await? == UnitStatus::Complete)
    }

    /// Status of a unit as a fresh process sees it
    ///
    /// Units with no entry are `pending`; an `in_progress` entry left by a
    /// crashed process is also reported as `pending`.
    pub async fn status(&self, unit_id: &WorkUnitId) -> Result<UnitStatus> {
        Ok(self
            .storage
            .load(unit_id)
            .await?
            .map(|e| e.effective_status())
            .unwrap_or(UnitStatus::Pending))
    }

    /// Move a unit to `in_progress`
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::State`] if the unit is already complete, or a
    /// checkpoint error if the transition cannot be persisted.
    pub async fn begin_unit(&self, unit_id: &WorkUnitId) -> Result<CheckpointEntry> {
        let _guard = self.lock_unit(unit_id).await;
        let mut entry = self.current(unit_id).await?;

        if entry.is_complete() {
            return Err(SieveError::State(format!(
                "Unit {} is already complete",
                unit_id
            )));
        }

        entry.mark_started();
        self.storage.save(&entry).await?;

        tracing::debug!(unit = %unit_id, attempt = entry.attempts, "Unit marked in progress");
        Ok(entry)
    }

    /// Mark a unit complete with its final counters
    ///
    /// This is the only transition that makes a unit skippable on resume.
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::State`] unless the unit is `in_progress`.
    pub async fn commit_unit(&self, unit_id: &WorkUnitId, counters: &UnitCounters) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let mut entry = self.current(unit_id).await?;

        if entry.status != UnitStatus::InProgress {
            return Err(SieveError::State(format!(
                "Cannot commit unit {} from status {}",
                unit_id, entry.status
            )));
        }

        entry.mark_complete(counters.clone());
        self.storage.save(&entry).await?;

        tracing::info!(
            unit = %unit_id,
            records_written = counters.records_written,
            "Checkpoint committed"
        );
        Ok(())
    }

    /// Mark a unit failed, keeping the counters gathered so far
    ///
    /// # Errors
    ///
    /// Returns [`SieveError::State`] if the unit is already complete.
    pub async fn fail_unit(
        &self,
        unit_id: &WorkUnitId,
        counters: &UnitCounters,
        error: &str,
    ) -> Result<()> {
        let _guard = self.lock_unit(unit_id).await;
        let mut entry = self.current(unit_id).await?;

        if entry.is_complete() {
            return Err(SieveError::State(format!(
                "Cannot fail unit {}: already complete",
                unit_id
            )));
        }

        entry.mark_failed(counters.clone(), error);
        self.storage.save(&entry).await?;

        tracing::warn!(unit = %unit_id, error = %error, "Checkpoint marked failed");
        Ok(())
    }

    /// Full-scan view of every entry, sorted by unit
    pub async fn entries(&self) -> Result<Vec<CheckpointEntry>> {
        self.storage.load_all().await
    }

    /// Aggregate summary over every known unit
    pub async fn snapshot(&self) -> Result<RunSummary> {
        let entries = self.entries().await?;
        Ok(RunSummary::from_entries(&entries))
    }

    /// Forget every entry so the next run starts fresh
    pub async fn reset(&self) -> Result<usize> {
        let removed = self.storage.clear().await?;
        tracing::info!(removed, "Checkpoint store reset");
        Ok(removed)
    }

    /// Persist a finalized run summary for audit
    pub async fn record_run(&self, summary: &RunSummary) -> Result<()> {
        self.storage.save_run(summary).await
    }

    /// Most recent run summaries, newest last
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut runs = self.storage.load_runs().await?;
        let skip = runs.len().saturating_sub(limit);
        Ok(runs.split_off(skip))
    }
}
