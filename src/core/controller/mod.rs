//! Run controller
//!
//! Drives a bounded pool of concurrent workers over the enumerated work
//! units. Each unit is fetched, classified, deduplicated and written in
//! bounded transactions, then committed to the checkpoint store.
//!
//! Cancellation (a shutdown signal or a fatal-run error in another worker)
//! is observed before a worker claims a unit and after every transaction,
//! so a stopped unit is always left uncommitted and is replayed from its
//! start on the next run.

pub mod summary;

use crate::adapters::checkpoint::FileCheckpointStorage;
use crate::adapters::destination::{create_destination, Destination};
use crate::adapters::source::{create_source, Source};
use crate::config::SieveConfig;
use crate::core::checkpoint::{CheckpointStore, UnitCounters, UnitStatus};
use crate::core::classify::{Classifier, ClassifierPolicy, Verdict};
use crate::core::dedup::{ConflictPolicy, Deduplicator};
use crate::core::fetch::{BatchFetcher, FetchOptions};
use crate::core::quality::{QualityReport, QualityReporter};
use crate::core::writer::IdempotentWriter;
use crate::domain::{AcceptedRecord, Result, SieveError, WorkUnit, WorkUnitId};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub use summary::{FailedUnit, RunSummary};

/// Knobs for one run
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Units processed concurrently
    pub workers: usize,
    /// Records per destination transaction
    pub batch_size: usize,
    /// Wall-clock limit for one unit
    pub unit_timeout: Duration,
    /// Fetch settings
    pub fetch: FetchOptions,
    /// Classify and dedupe only; no writes, no checkpoint transitions
    pub dry_run: bool,
    /// Skip units whose last attempt failed
    pub exclude_failed: bool,
    /// Conflict policy for the deduplicator
    pub conflict_policy: ConflictPolicy,
    /// Where to write the JSON quality report
    pub report_path: Option<String>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 500,
            unit_timeout: Duration::from_secs(4 * 60 * 60),
            fetch: FetchOptions::default(),
            dry_run: false,
            exclude_failed: false,
            conflict_policy: ConflictPolicy::default(),
            report_path: None,
        }
    }
}

impl ControllerOptions {
    /// Options from a loaded configuration
    pub fn from_config(config: &SieveConfig) -> Self {
        let run = &config.run;
        Self {
            workers: run.workers,
            batch_size: run.batch_size,
            unit_timeout: Duration::from_secs(run.unit_timeout_seconds),
            fetch: FetchOptions {
                chunk_size: run.batch_size,
                page_timeout: Duration::from_secs(run.page_timeout_seconds),
                max_records: run.max_records_per_unit,
                pipeline_depth: run.pipeline_depth,
            },
            dry_run: config.application.dry_run,
            exclude_failed: config.checkpoint.exclude_failed,
            conflict_policy: run.conflict_policy,
            report_path: run.report_path.clone(),
        }
    }
}

/// How a single unit ended
#[derive(Debug)]
enum UnitOutcome {
    Committed(UnitCounters),
    Failed {
        unit_id: WorkUnitId,
        error: String,
        counters: UnitCounters,
    },
    /// Never claimed, or stopped at a transaction boundary
    NotStarted(UnitCounters),
    /// A fatal-run error; the unit is left uncommitted
    Aborted {
        error: String,
        counters: UnitCounters,
    },
}

enum UnitEnd {
    Finished,
    Stopped,
}

/// Orchestrates one ingestion run
pub struct RunController {
    source: Arc<dyn Source>,
    fetcher: BatchFetcher,
    classifier: Arc<Classifier>,
    writer: IdempotentWriter,
    checkpoints: Arc<CheckpointStore>,
    quality: QualityReporter,
    options: ControllerOptions,
    shutdown: watch::Receiver<bool>,
    abort: AtomicBool,
}

impl RunController {
    /// Assemble a controller from its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
        classifier: Arc<Classifier>,
        checkpoints: Arc<CheckpointStore>,
        quality: QualityReporter,
        options: ControllerOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let dedup = Arc::new(Deduplicator::new(destination.clone(), options.conflict_policy));
        let writer = IdempotentWriter::new(destination, dedup, options.batch_size, options.dry_run);
        let fetcher = BatchFetcher::new(source.clone(), options.fetch.clone());

        Self {
            source,
            fetcher,
            classifier,
            writer,
            checkpoints,
            quality,
            options,
            shutdown,
            abort: AtomicBool::new(false),
        }
    }

    /// Build every collaborator from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the policy file is invalid, the checkpoint
    /// directory cannot be opened, or the destination cannot be prepared.
    pub async fn from_config(
        config: &SieveConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let classifier = ClassifierPolicy::from_file(&config.classifier.policy_path)?.build()?;
        let source = create_source(&config.source)?;

        let storage = FileCheckpointStorage::open(&config.checkpoint.directory).await?;
        let checkpoints = Arc::new(CheckpointStore::new(Arc::new(storage)));

        let destination = create_destination(&config.destination).await?;
        destination.prepare().await?;

        tracing::info!(
            source = source.name(),
            destination = destination.name(),
            checkpoints = %config.checkpoint.directory,
            "Run controller initialized"
        );

        Ok(Self::new(
            source,
            destination,
            Arc::new(classifier),
            checkpoints,
            QualityReporter::new(config.quality.clone()),
            ControllerOptions::from_config(config),
            shutdown,
        ))
    }

    /// Checkpoint store used by this controller
    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    fn should_stop(&self) -> bool {
        *self.shutdown.borrow() || self.abort.load(Ordering::SeqCst)
    }

    /// Process every unit that is not yet complete
    ///
    /// Fatal-unit errors are recorded per unit and the run continues.
    /// Fatal-run errors stop all workers and are reported in
    /// [`RunSummary::aborted`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the source cannot be enumerated or the
    /// checkpoint store cannot be read before any work starts.
    pub async fn run(&self) -> Result<RunSummary> {
        self.abort.store(false, Ordering::SeqCst);
        let mut summary = RunSummary::new(self.options.dry_run);

        let units = self.source.enumerate().await?;
        summary.units_total = units.len();

        let mut pending = Vec::with_capacity(units.len());
        for unit in units {
            match self.checkpoints.status(&unit.id).await? {
                UnitStatus::Complete => summary.record_skipped(),
                UnitStatus::Failed if self.options.exclude_failed => {
                    tracing::info!(unit = %unit.id, "Skipping previously failed unit");
                    summary.record_skipped();
                }
                _ => pending.push(unit),
            }
        }

        tracing::info!(
            run_id = %summary.run_id,
            units_total = summary.units_total,
            units_pending = pending.len(),
            units_skipped = summary.units_skipped,
            workers = self.options.workers,
            dry_run = self.options.dry_run,
            "Starting run"
        );

        let outcomes: Vec<UnitOutcome> = stream::iter(pending)
            .map(|unit| self.run_unit(unit))
            .buffer_unordered(self.options.workers.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                UnitOutcome::Committed(counters) => summary.record_committed(&counters),
                UnitOutcome::Failed {
                    unit_id,
                    error,
                    counters,
                } => summary.record_failed(unit_id, error, &counters),
                UnitOutcome::NotStarted(counters) => {
                    summary.units_not_started += 1;
                    summary.totals.merge(&counters);
                }
                UnitOutcome::Aborted { error, counters } => {
                    summary.units_not_started += 1;
                    summary.totals.merge(&counters);
                    summary.aborted.get_or_insert(error);
                }
            }
        }

        summary.interrupted = *self.shutdown.borrow() && summary.units_not_started > 0;
        let status = self.quality.finalize(&mut summary);
        summary.finalize();
        summary.log_summary();
        tracing::info!(status = %status, "Run finished");

        if let Err(e) = self.checkpoints.record_run(&summary).await {
            tracing::error!(error = %e, "Failed to persist run summary");
        }

        if let Some(path) = &self.options.report_path {
            if let Err(e) = QualityReport::new(&summary).write_to(path) {
                tracing::error!(error = %e, path = %path, "Failed to write quality report");
            }
        }

        Ok(summary)
    }

    async fn run_unit(&self, unit: WorkUnit) -> UnitOutcome {
        if self.should_stop() {
            return UnitOutcome::NotStarted(UnitCounters::default());
        }

        if !self.options.dry_run {
            if let Err(e) = self.checkpoints.begin_unit(&unit.id).await {
                return self.abort_run(&unit.id, e, UnitCounters::default());
            }
        }

        crate::log_unit_start!(unit.id);
        let started = Instant::now();
        let mut counters = UnitCounters::default();

        let result = tokio::time::timeout(
            self.options.unit_timeout,
            self.process_unit(&unit, &mut counters),
        )
        .await
        .unwrap_or_else(|_| {
            Err(SieveError::Timeout(format!(
                "unit exceeded {:?}",
                self.options.unit_timeout
            )))
        });

        match result {
            Ok(UnitEnd::Finished) => {
                if !self.options.dry_run {
                    if let Err(e) = self.checkpoints.commit_unit(&unit.id, &counters).await {
                        return self.abort_run(&unit.id, e, counters);
                    }
                }
                self.quality.check_unit(&unit.id, &counters);
                crate::log_unit_complete!(unit.id, counters.records_written, started.elapsed());
                UnitOutcome::Committed(counters)
            }
            Ok(UnitEnd::Stopped) => {
                tracing::info!(unit = %unit.id, "Unit stopped at transaction boundary; left uncommitted");
                UnitOutcome::NotStarted(counters)
            }
            Err(e) if e.is_fatal_run() => self.abort_run(&unit.id, e, counters),
            Err(e) => {
                let error = e.to_string();
                tracing::error!(unit = %unit.id, error = %error, "Unit failed");
                if !self.options.dry_run {
                    if let Err(e) = self.checkpoints.fail_unit(&unit.id, &counters, &error).await {
                        return self.abort_run(&unit.id, e, counters);
                    }
                }
                UnitOutcome::Failed {
                    unit_id: unit.id,
                    error,
                    counters,
                }
            }
        }
    }

    fn abort_run(&self, unit_id: &WorkUnitId, error: SieveError, counters: UnitCounters) -> UnitOutcome {
        tracing::error!(unit = %unit_id, error = %error, "Fatal error, aborting run");
        self.abort.store(true, Ordering::SeqCst);
        UnitOutcome::Aborted {
            error: error.to_string(),
            counters,
        }
    }

    async fn process_unit(&self, unit: &WorkUnit, counters: &mut UnitCounters) -> Result<UnitEnd> {
        let batch_size = self.writer.batch_size();
        let mut stream = self.fetcher.fetch(unit)?;
        let mut batch: Vec<AcceptedRecord> = Vec::with_capacity(batch_size);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            counters.fetch_errors += chunk.lost;
            counters.records_fetched += chunk.records.len() as u64;

            for record in chunk.records {
                match self.classifier.evaluate(record) {
                    Verdict::Accepted(accepted) => {
                        counters.records_accepted += 1;
                        batch.push(accepted);
                    }
                    Verdict::Rejected { stage, reason } => {
                        tracing::trace!(unit = %unit.id, stage = %stage, reason = %reason, "Record rejected");
                        counters.add_rejection(&stage);
                    }
                }

                if batch.len() >= batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    self.writer.flush(full).await?.apply(counters);
                    if self.should_stop() {
                        return Ok(UnitEnd::Stopped);
                    }
                }
            }
        }

        self.writer.write_all(batch).await?.apply(counters);
        Ok(UnitEnd::Finished)
    }
}
