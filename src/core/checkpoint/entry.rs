//! Checkpoint entry model
//!
//! One [`CheckpointEntry`] exists per work unit. It is the only record of
//! whether a unit's data has been durably written.

use crate::domain::WorkUnitId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a work unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Never started
    #[default]
    Pending,
    /// Started but not committed; treated as pending after a restart
    InProgress,
    /// Data durably written and unit committed
    Complete,
    /// Last attempt failed
    Failed,
}

impl UnitStatus {
    /// String form used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InProgress => "in_progress",
            UnitStatus::Complete => "complete",
            UnitStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-unit statistics, also used for run-level totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounters {
    /// Records yielded by the fetcher
    pub records_fetched: u64,
    /// Records or pages lost to transient fetch errors
    pub fetch_errors: u64,
    /// Records rejected by any classifier stage
    pub records_rejected: u64,
    /// Rejections broken down by stage name
    #[serde(default)]
    pub rejected_by_stage: BTreeMap<String, u64>,
    /// Records accepted by the classifier
    pub records_accepted: u64,
    /// Accepted records dropped as exact duplicates
    pub records_duplicate: u64,
    /// Accepted records whose key matched different content
    #[serde(default)]
    pub records_conflict: u64,
    /// Conflicts resolved by overwriting the stored row
    #[serde(default)]
    pub records_overwritten: u64,
    /// Rows written to the destination
    pub records_written: u64,
}

impl UnitCounters {
    /// Count one rejection by `stage`
    pub fn add_rejection(&mut self, stage: &str) {
        self.records_rejected += 1;
        *self.rejected_by_stage.entry(stage.to_string()).or_insert(0) += 1;
    }

    /// Add another set of counters into this one
    pub fn merge(&mut self, other: &UnitCounters) {
        self.records_fetched += other.records_fetched;
        self.fetch_errors += other.fetch_errors;
        self.records_rejected += other.records_rejected;
        for (stage, count) in &other.rejected_by_stage {
            *self.rejected_by_stage.entry(stage.clone()).or_insert(0) += count;
        }
        self.records_accepted += other.records_accepted;
        self.records_duplicate += other.records_duplicate;
        self.records_conflict += other.records_conflict;
        self.records_overwritten += other.records_overwritten;
        self.records_written += other.records_written;
    }

    /// Share of fetched records rejected by the classifier
    pub fn rejection_rate(&self) -> f64 {
        ratio(self.records_rejected, self.records_fetched)
    }

    /// Share of accepted records that were exact duplicates
    pub fn duplicate_rate(&self) -> f64 {
        ratio(self.records_duplicate, self.records_accepted)
    }

    /// Share of records (or pages) lost to transient fetch errors
    pub fn fetch_error_rate(&self) -> f64 {
        ratio(self.fetch_errors, self.records_fetched + self.fetch_errors)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Durable checkpoint state of a single work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Unit this entry describes
    pub unit_id: WorkUnitId,
    /// Current status
    pub status: UnitStatus,
    /// Counters from the latest attempt
    #[serde(default)]
    pub counters: UnitCounters,
    /// Number of times the unit was begun
    #[serde(default)]
    pub attempts: u32,
    /// When the latest attempt began
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Last status change
    pub last_updated_at: DateTime<Utc>,
    /// Error message of the latest failure
    #[serde(default)]
    pub error: Option<String>,
}

impl CheckpointEntry {
    /// A pending entry for a unit that has never been seen
    pub fn pending(unit_id: WorkUnitId) -> Self {
        Self {
            unit_id,
            status: UnitStatus::Pending,
            counters: UnitCounters::default(),
            attempts: 0,
            started_at: None,
            last_updated_at: Utc::now(),
            error: None,
        }
    }

    /// Whether the unit can be skipped on resume
    pub fn is_complete(&self) -> bool {
        self.status == UnitStatus::Complete
    }

    /// Status as seen by a fresh process: an unfinished attempt counts as pending
    pub fn effective_status(&self) -> UnitStatus {
        match self.status {
            UnitStatus::InProgress => UnitStatus::Pending,
            other => other,
        }
    }

    /// Transition to in_progress, resetting counters and error
    pub fn mark_started(&mut self) {
        let now = Utc::now();
        self.status = UnitStatus::InProgress;
        self.counters = UnitCounters::default();
        self.attempts += 1;
        self.started_at = Some(now);
        self.last_updated_at = now;
        self.error = None;
    }

    /// Transition to complete with the final counters
    pub fn mark_complete(&mut self, counters: UnitCounters) {
        self.status = UnitStatus::Complete;
        self.counters = counters;
        self.last_updated_at = Utc::now();
        self.error = None;
    }

    /// Transition to failed, keeping whatever counters were gathered
    pub fn mark_failed(&mut self, counters: UnitCounters, error: impl Into<String>) {
        self.status = UnitStatus::Failed;
        self.counters = counters;
        self.last_updated_at = Utc::now();
        self.error = Some(error.into());
    }

    /// Duration of the latest attempt, if it has ended
    pub fn last_attempt_duration(&self) -> Option<chrono::Duration> {
        match self.status {
            UnitStatus::Complete | UnitStatus::Failed => {
                self.started_at.map(|started| self.last_updated_at - started)
            }
            _ => None,
        }
    }
}
