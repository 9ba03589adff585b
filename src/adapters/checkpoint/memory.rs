//! In-memory checkpoint storage
//!
//! Not durable across processes. Restarts are simulated by handing the same
//! instance to a second controller.

use super::CheckpointStorage;
use crate::core::checkpoint::CheckpointEntry;
use crate::core::controller::RunSummary;
use crate::domain::{Result, SieveError, WorkUnitId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Checkpoint storage held in process memory
#[derive(Default)]
pub struct MemoryCheckpointStorage {
    entries: Mutex<BTreeMap<WorkUnitId, CheckpointEntry>>,
    runs: Mutex<Vec<RunSummary>>,
    fail_writes: AtomicBool,
}

impl MemoryCheckpointStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail, simulating an unwritable store
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SieveError::Checkpoint(
                "checkpoint storage is not writable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStorage for MemoryCheckpointStorage {
    async fn load(&self, unit_id: &WorkUnitId) -> Result<Option<CheckpointEntry>> {
        Ok(self.entries.lock().await.get(unit_id).cloned())
    }

    async fn save(&self, entry: &CheckpointEntry) -> Result<()> {
        self.check_writable()?;
        self.entries
            .lock()
            .await
            .insert(entry.unit_id.clone(), entry.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<CheckpointEntry>> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }

    async fn clear(&self) -> Result<usize> {
        self.check_writable()?;
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        self.check_writable()?;
        self.runs.lock().await.push(summary.clone());
        Ok(())
    }

    async fn load_runs(&self) -> Result<Vec<RunSummary>> {
        Ok(self.runs.lock().await.clone())
    }
}
