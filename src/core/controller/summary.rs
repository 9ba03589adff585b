//! Run summary and reporting
//!
//! A [`RunSummary`] aggregates unit counters across one run (or, when built
//! from a checkpoint snapshot, across every unit the store knows about).

use crate::core::checkpoint::{CheckpointEntry, UnitCounters, UnitStatus};
use crate::core::quality::GateViolation;
use crate::domain::WorkUnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit that ended in `failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedUnit {
    /// Unit identifier
    pub unit_id: WorkUnitId,
    /// Error that failed it
    pub error: String,
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier
    pub run_id: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run was finalized
    pub finished_at: Option<DateTime<Utc>>,

    /// Whether destination writes were skipped
    #[serde(default)]
    pub dry_run: bool,

    /// Units enumerated
    pub units_total: usize,

    /// Units skipped because they were already complete (or excluded)
    pub units_skipped: usize,

    /// Units committed during this run
    pub units_committed: usize,

    /// Units never claimed or left unfinished
    pub units_not_started: usize,

    /// Units that failed, with their errors
    pub failed_units: Vec<FailedUnit>,

    /// Counters summed over processed units
    pub totals: UnitCounters,

    /// Quality gate violations
    pub violations: Vec<GateViolation>,

    /// Whether the run stopped on a cancellation signal
    pub interrupted: bool,

    /// Fatal-run error that aborted the run
    pub aborted: Option<String>,
}

impl RunSummary {
    /// Create a new, empty summary
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            units_total: 0,
            units_skipped: 0,
            units_committed: 0,
            units_not_started: 0,
            failed_units: Vec::new(),
            totals: UnitCounters::default(),
            violations: Vec::new(),
            interrupted: false,
            aborted: None,
        }
    }

    /// Build a summary from every entry in a checkpoint store
    pub fn from_entries(entries: &[CheckpointEntry]) -> Self {
        let mut summary = Self::new(false);
        summary.units_total = entries.len();

        for entry in entries {
            summary.totals.merge(&entry.counters);
            match entry.effective_status() {
                UnitStatus::Complete => summary.units_committed += 1,
                UnitStatus::Failed => summary.failed_units.push(FailedUnit {
                    unit_id: entry.unit_id.clone(),
                    error: entry.error.clone().unwrap_or_default(),
                }),
                UnitStatus::Pending | UnitStatus::InProgress => summary.units_not_started += 1,
            }
        }

        if let Some(earliest) = entries.iter().filter_map(|e| e.started_at).min() {
            summary.started_at = earliest;
        }
        summary.failed_units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        summary
    }

    /// Count a unit skipped on resume
    pub fn record_skipped(&mut self) {
        self.units_skipped += 1;
    }

    /// Count a committed unit
    pub fn record_committed(&mut self, counters: &UnitCounters) {
        self.units_committed += 1;
        self.totals.merge(counters);
    }

    /// Count a failed unit
    pub fn record_failed(&mut self, unit_id: WorkUnitId, error: String, counters: &UnitCounters) {
        self.totals.merge(counters);
        self.failed_units.push(FailedUnit { unit_id, error });
    }

    /// Stamp the finish time and order failures deterministically
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
        self.failed_units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
    }

    /// Wall-clock duration, if finalized
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|finished| finished - self.started_at)
    }

    /// Whether the run ended cleanly with every gate passing
    pub fn is_successful(&self) -> bool {
        self.failed_units.is_empty()
            && self.violations.is_empty()
            && self.aborted.is_none()
            && !self.interrupted
    }

    /// Whether any quality gate was violated
    pub fn is_degraded(&self) -> bool {
        !self.violations.is_empty()
    }

    /// Share of fetched records rejected by the classifier
    pub fn rejection_rate(&self) -> f64 {
        self.totals.rejection_rate()
    }

    /// Share of accepted records that were duplicates
    pub fn duplicate_rate(&self) -> f64 {
        self.totals.duplicate_rate()
    }

    /// Share of records (or pages) lost to transient fetch errors
    pub fn fetch_error_rate(&self) -> f64 {
        self.totals.fetch_error_rate()
    }

    /// Log the summary
    ///
    /// Failed units, per-stage rejections and duplicate counts are always
    /// listed, so "nothing new" and "broken" read differently.
    pub fn log_summary(&self) {
        tracing::info!(
            run_id = %self.run_id,
            units_total = self.units_total,
            units_committed = self.units_committed,
            units_skipped = self.units_skipped,
            units_failed = self.failed_units.len(),
            units_not_started = self.units_not_started,
            records_fetched = self.totals.records_fetched,
            fetch_errors = self.totals.fetch_errors,
            records_accepted = self.totals.records_accepted,
            records_rejected = self.totals.records_rejected,
            records_duplicate = self.totals.records_duplicate,
            records_conflict = self.totals.records_conflict,
            records_written = self.totals.records_written,
            duration_secs = self.duration().map(|d| d.num_seconds()).unwrap_or(0),
            dry_run = self.dry_run,
            "Run completed"
        );

        for (stage, count) in &self.totals.rejected_by_stage {
            tracing::info!(stage = %stage, rejected = count, "Stage rejections");
        }

        for failed in &self.failed_units {
            tracing::warn!(unit = %failed.unit_id, error = %failed.error, "Unit failed");
        }

        for violation in &self.violations {
            tracing::warn!(
                gate = %violation.gate,
                observed = violation.observed,
                threshold = violation.threshold,
                "Quality gate violated"
            );
        }

        if self.interrupted {
            tracing::warn!("Run was interrupted before all units were processed");
        }
        if let Some(reason) = &self.aborted {
            tracing::error!(error = %reason, "Run aborted");
        }
    }
}
