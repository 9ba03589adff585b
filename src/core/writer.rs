//! Idempotent writer
//!
//! Takes classified records, runs them through the deduplicator and writes
//! the survivors in bounded transactions. A unit is only committed to the
//! checkpoint store after every transaction for it has landed, so a crash
//! replays at most the current unit, and replaying is harmless because
//! writes are upserts by natural key.

use super::checkpoint::UnitCounters;
use super::dedup::Deduplicator;
use crate::adapters::destination::{Destination, DestinationRow};
use crate::domain::{AcceptedRecord, Result};
use std::sync::Arc;

/// Outcome of one flushed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Rows sent to the destination
    pub written: u64,
    /// Exact duplicates dropped
    pub duplicates: u64,
    /// Conflicting versions seen
    pub conflicts: u64,
    /// Conflicts that replaced the stored version
    pub overwritten: u64,
}

impl FlushStats {
    /// Fold these stats into unit counters
    pub fn apply(&self, counters: &mut UnitCounters) {
        counters.records_written += self.written;
        counters.records_duplicate += self.duplicates;
        counters.records_conflict += self.conflicts;
        counters.records_overwritten += self.overwritten;
    }
}

/// Writes accepted records through the deduplicator
pub struct IdempotentWriter {
    destination: Arc<dyn Destination>,
    dedup: Arc<Deduplicator>,
    batch_size: usize,
    dry_run: bool,
}

impl IdempotentWriter {
    /// Create a writer; `batch_size` bounds each transaction
    pub fn new(
        destination: Arc<dyn Destination>,
        dedup: Arc<Deduplicator>,
        batch_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            destination,
            dedup,
            batch_size: batch_size.max(1),
            dry_run,
        }
    }

    /// Maximum records per transaction
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether writes are suppressed
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Deduplicate and write one transaction's worth of records
    ///
    /// Callers hand over at most [`IdempotentWriter::batch_size`] records at
    /// a time. The admission's keys stay reserved until the transaction
    /// settles; if it fails, or this future is dropped mid-write, they are
    /// freed so another worker or a retry writes them.
    ///
    /// # Errors
    ///
    /// Returns the destination error after rolling back.
    pub async fn flush(&self, records: Vec<AcceptedRecord>) -> Result<FlushStats> {
        if records.is_empty() {
            return Ok(FlushStats::default());
        }

        let mut admission = self.dedup.admit(records).await?;
        let mut stats = FlushStats {
            written: admission.rows.len() as u64,
            duplicates: admission.duplicates,
            conflicts: admission.conflicts,
            overwritten: admission.overwritten,
        };

        if admission.is_empty() {
            stats.written = 0;
            return Ok(stats);
        }

        if self.dry_run {
            tracing::info!(
                count = admission.rows.len(),
                "DRY RUN: Would write {} records to {}",
                admission.rows.len(),
                self.destination.name()
            );
            self.dedup.confirm(admission, 0).await;
            return Ok(stats);
        }

        let rows: Vec<DestinationRow> = std::mem::take(&mut admission.rows)
            .into_iter()
            .map(DestinationRow::from)
            .collect();

        let outcome = self.destination.transactional_upsert(&rows).await?;
        tracing::debug!(
            rows = rows.len(),
            inserted = outcome.inserted,
            updated = outcome.updated,
            stale = outcome.stale,
            "Batch written"
        );
        self.dedup.confirm(admission, outcome.stale).await;

        stats.written = stats.written.saturating_sub(outcome.stale);
        Ok(stats)
    }

    /// Write a whole slice of records in transactions of `batch_size`
    ///
    /// The controller drains each unit's remaining records through here.
    ///
    /// # Errors
    ///
    /// Stops at the first failed transaction; earlier transactions stay
    /// committed.
    pub async fn write_all(&self, records: Vec<AcceptedRecord>) -> Result<FlushStats> {
        let mut total = FlushStats::default();
        let mut records = records.into_iter().peekable();
        while records.peek().is_some() {
            let chunk: Vec<AcceptedRecord> = records.by_ref().take(self.batch_size).collect();
            let stats = self.flush(chunk).await?;
            total.written += stats.written;
            total.duplicates += stats.duplicates;
            total.conflicts += stats.conflicts;
            total.overwritten += stats.overwritten;
        }
        Ok(total)
    }
}
