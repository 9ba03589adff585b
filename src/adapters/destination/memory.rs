//! In-process destination
//!
//! Backed by a `BTreeMap` behind a mutex. Used by the `memory` destination
//! kind and throughout the test suite; failures can be injected to exercise
//! rollback paths.

use super::{Destination, DestinationRow, RowFingerprint, UpsertOutcome};
use crate::domain::{DestinationError, NaturalKey, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Destination held entirely in memory
#[derive(Default)]
pub struct MemoryDestination {
    rows: Mutex<BTreeMap<NaturalKey, DestinationRow>>,
    transactions: AtomicU64,
    lookups: AtomicU64,
    fail_after: Mutex<Option<usize>>,
    attempted: AtomicUsize,
}

impl MemoryDestination {
    /// Create an empty destination
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every transaction after the first `n` have committed
    pub fn fail_after_transactions(&self, n: usize) {
        if let Ok(mut guard) = self.fail_after.lock() {
            *guard = Some(n);
        }
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        if let Ok(mut guard) = self.fail_after.lock() {
            *guard = None;
        }
        self.attempted.store(0, Ordering::SeqCst);
    }

    /// Copy of all stored rows in key order
    pub fn rows(&self) -> Vec<DestinationRow> {
        self.rows
            .lock()
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Stored row for `key`
    pub fn get(&self, key: &str) -> Option<DestinationRow> {
        let key = NaturalKey::new(key).ok()?;
        self.rows.lock().ok()?.get(&key).cloned()
    }

    /// Committed transactions so far
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Single-key lookups served so far
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }

    fn poisoned() -> DestinationError {
        DestinationError::TransactionFailed("memory destination lock poisoned".to_string())
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    fn name(&self) -> &str {
        "memory"
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn transactional_upsert(&self, rows: &[DestinationRow]) -> Result<UpsertOutcome> {
        let attempt = self.attempted.fetch_add(1, Ordering::SeqCst);
        let limit = *self.fail_after.lock().map_err(|_| Self::poisoned())?;
        if matches!(limit, Some(n) if attempt >= n) {
            return Err(DestinationError::TransactionFailed(format!(
                "injected failure on transaction {}",
                attempt + 1
            ))
            .into());
        }

        let mut stored = self.rows.lock().map_err(|_| Self::poisoned())?;
        let mut outcome = UpsertOutcome::default();
        for row in rows {
            match stored.get(&row.key) {
                None => outcome.inserted += 1,
                Some(existing) if existing.content_hash == row.content_hash => {
                    outcome.unchanged += 1;
                    continue;
                }
                Some(existing) if row.fingerprint().supersedes(&existing.fingerprint()) => {
                    outcome.updated += 1
                }
                Some(_) => {
                    outcome.stale += 1;
                    continue;
                }
            }
            stored.insert(row.key.clone(), row.clone());
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn lookup(&self, key: &NaturalKey) -> Result<Option<RowFingerprint>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let stored = self
            .rows
            .lock()
            .map_err(|_| DestinationError::LookupFailed("lock poisoned".to_string()))?;
        Ok(stored.get(key).map(DestinationRow::fingerprint))
    }

    async fn count(&self) -> Result<u64> {
        let stored = self
            .rows
            .lock()
            .map_err(|_| DestinationError::LookupFailed("lock poisoned".to_string()))?;
        Ok(stored.len() as u64)
    }
}
