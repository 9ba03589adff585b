//! Integration tests for resume behavior
//!
//! These tests verify that:
//! - A crash between the last write and the commit replays the unit
//!   without duplicating rows
//! - A shutdown signal stops workers at a transaction boundary
//! - An interrupted run resumes where it stopped

mod common;

use async_trait::async_trait;
use common::{classifier, controller, no_shutdown, options, solar_works, StaticSource};
use sieve::adapters::checkpoint::{CheckpointStorage, MemoryCheckpointStorage};
use sieve::adapters::destination::MemoryDestination;
use sieve::core::checkpoint::{CheckpointEntry, UnitStatus};
use sieve::core::controller::RunSummary;
use sieve::domain::{Result, SieveError, WorkUnitId};
use std::sync::Arc;
use tokio::sync::watch;

/// Delegates to memory storage but refuses to record one unit as complete
struct CrashBeforeCommit {
    inner: Arc<MemoryCheckpointStorage>,
    unit: WorkUnitId,
}

#[async_trait]
impl CheckpointStorage for CrashBeforeCommit {
    async fn load(&self, unit_id: &WorkUnitId) -> Result<Option<CheckpointEntry>> {
        self.inner.load(unit_id).await
    }

    async fn save(&self, entry: &CheckpointEntry) -> Result<()> {
        if entry.unit_id == self.unit && entry.status == UnitStatus::Complete {
            return Err(SieveError::Checkpoint("process killed".to_string()));
        }
        self.inner.save(entry).await
    }

    async fn load_all(&self) -> Result<Vec<CheckpointEntry>> {
        self.inner.load_all().await
    }

    async fn clear(&self) -> Result<usize> {
        self.inner.clear().await
    }

    async fn save_run(&self, summary: &RunSummary) -> Result<()> {
        self.inner.save_run(summary).await
    }

    async fn load_runs(&self) -> Result<Vec<RunSummary>> {
        self.inner.load_runs().await
    }
}

fn five_units() -> StaticSource {
    (1..=5).fold(StaticSource::new(10), |source, i| {
        source.with_unit(&format!("unit-{i}"), solar_works(&format!("u{i}"), 25))
    })
}

async fn status(storage: &MemoryCheckpointStorage, unit: &str) -> Option<UnitStatus> {
    storage
        .load(&WorkUnitId::new(unit).unwrap())
        .await
        .unwrap()
        .map(|e| e.status)
}

#[tokio::test]
async fn test_crash_before_commit_replays_unit_without_duplicates() {
    let source = Arc::new(five_units());
    let destination = Arc::new(MemoryDestination::new());
    let memory = Arc::new(MemoryCheckpointStorage::new());

    let crashing = Arc::new(CrashBeforeCommit {
        inner: memory.clone(),
        unit: WorkUnitId::new("unit-3").unwrap(),
    });
    let first = controller(
        source.clone(),
        destination.clone(),
        crashing,
        classifier(),
        options(1, 10),
        no_shutdown(),
    );
    let summary = first.run().await.unwrap();

    assert!(summary.aborted.is_some());
    assert_eq!(summary.units_committed, 2);
    assert_eq!(status(&memory, "unit-1").await, Some(UnitStatus::Complete));
    assert_eq!(status(&memory, "unit-2").await, Some(UnitStatus::Complete));
    assert_eq!(status(&memory, "unit-3").await, Some(UnitStatus::InProgress));
    assert_eq!(status(&memory, "unit-4").await, None);
    assert_eq!(status(&memory, "unit-5").await, None);
    // unit-3's rows reached the destination before the crash
    assert_eq!(destination.rows().len(), 75);

    let second = controller(
        source.clone(),
        destination.clone(),
        memory.clone(),
        classifier(),
        options(1, 10),
        no_shutdown(),
    );
    let summary = second.run().await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.units_skipped, 2);
    assert_eq!(summary.units_committed, 3);
    assert_eq!(summary.totals.records_duplicate, 25);
    assert_eq!(source.opens("unit-1"), 1);
    assert_eq!(source.opens("unit-3"), 2);
    assert_eq!(destination.rows().len(), 125);

    let entry = memory
        .load(&WorkUnitId::new("unit-3").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, UnitStatus::Complete);
    assert_eq!(entry.attempts, 2);
}

#[tokio::test]
async fn test_unwritable_checkpoints_abort_the_run() {
    let memory = Arc::new(MemoryCheckpointStorage::new());
    memory.set_fail_writes(true);
    let destination = Arc::new(MemoryDestination::new());

    let ctl = controller(
        Arc::new(five_units()),
        destination.clone(),
        memory.clone(),
        classifier(),
        options(2, 10),
        no_shutdown(),
    );
    let summary = ctl.run().await.unwrap();

    assert!(summary.aborted.is_some());
    assert_eq!(summary.units_committed, 0);
    assert_eq!(summary.units_not_started, 5);
    assert!(destination.rows().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_at_transaction_boundary_and_resumes() {
    let (tx, rx) = watch::channel(false);
    let tx = Arc::new(tx);

    let source = Arc::new(five_units().shutdown_during("unit-2", tx.clone()));
    let destination = Arc::new(MemoryDestination::new());
    let memory = Arc::new(MemoryCheckpointStorage::new());

    let ctl = controller(
        source.clone(),
        destination.clone(),
        memory.clone(),
        classifier(),
        options(1, 10),
        rx,
    );
    let summary = ctl.run().await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.aborted.is_none());
    assert_eq!(summary.units_committed, 1);
    assert_eq!(summary.units_not_started, 4);
    assert_eq!(status(&memory, "unit-1").await, Some(UnitStatus::Complete));
    // Stopped mid-unit: left uncommitted so it is replayed from the start
    assert_eq!(status(&memory, "unit-2").await, Some(UnitStatus::InProgress));
    assert_eq!(status(&memory, "unit-3").await, None);

    // Whole transactions only: unit-2 contributed a multiple of the batch size
    let partial = destination.rows().len() - 25;
    assert!(partial > 0 && partial < 25);
    assert_eq!(partial % 10, 0);

    let resumed = controller(
        source.clone(),
        destination.clone(),
        memory.clone(),
        classifier(),
        options(1, 10),
        no_shutdown(),
    );
    let summary = resumed.run().await.unwrap();

    assert!(summary.is_successful());
    assert_eq!(summary.units_skipped, 1);
    assert_eq!(summary.units_committed, 4);
    assert_eq!(summary.totals.records_duplicate as usize, partial);
    assert_eq!(destination.rows().len(), 125);
}

#[tokio::test]
async fn test_signal_before_start_claims_nothing() {
    let (tx, rx) = watch::channel(false);
    tx.send(true).unwrap();

    let source = Arc::new(five_units());
    let memory = Arc::new(MemoryCheckpointStorage::new());
    let ctl = controller(
        source.clone(),
        Arc::new(MemoryDestination::new()),
        memory.clone(),
        classifier(),
        options(2, 10),
        rx,
    );
    let summary = ctl.run().await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.units_not_started, 5);
    assert_eq!(source.opens("unit-1"), 0);
    assert!(memory.load_all().await.unwrap().is_empty());
}
