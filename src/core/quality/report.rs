//! Quality report structures

use super::HealthStatus;
use crate::core::controller::RunSummary;
use crate::domain::{Result, SieveError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Report written at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// When the report was generated
    pub generated_at: DateTime<Utc>,

    /// Overall verdict
    pub status: HealthStatus,

    /// Share of fetched records rejected
    pub rejection_rate: f64,

    /// Share of accepted records that were duplicates
    pub duplicate_rate: f64,

    /// Share of records lost to transient fetch errors
    pub fetch_error_rate: f64,

    /// Full run summary
    pub summary: RunSummary,
}

impl QualityReport {
    /// Build a report from a finalized summary
    pub fn new(summary: &RunSummary) -> Self {
        Self {
            generated_at: Utc::now(),
            status: HealthStatus::of(summary),
            rejection_rate: summary.rejection_rate(),
            duplicate_rate: summary.duplicate_rate(),
            fetch_error_rate: summary.fetch_error_rate(),
            summary: summary.clone(),
        }
    }

    /// Write the report as pretty JSON, replacing any previous file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(self)?;
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path).map_err(|e| {
            SieveError::Io(format!("Failed to write report {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), "Quality report written");
        Ok(())
    }

    /// Format the report as a human-readable string
    pub fn format_summary(&self) -> String {
        let s = &self.summary;
        let mut out = String::new();
        out.push_str(&format!("Run {} [{}]\n", s.run_id, self.status));
        if s.dry_run {
            out.push_str("  DRY RUN: nothing was written or committed\n");
        }
        out.push_str(&format!(
            "  Units: {} total, {} committed, {} skipped, {} failed, {} not started\n",
            s.units_total,
            s.units_committed,
            s.units_skipped,
            s.failed_units.len(),
            s.units_not_started
        ));
        out.push_str(&format!(
            "  Records: {} fetched, {} lost, {} accepted, {} rejected\n",
            s.totals.records_fetched,
            s.totals.fetch_errors,
            s.totals.records_accepted,
            s.totals.records_rejected
        ));
        out.push_str(&format!(
            "  Dedup: {} duplicates, {} conflicts ({} overwritten), {} written\n",
            s.totals.records_duplicate,
            s.totals.records_conflict,
            s.totals.records_overwritten,
            s.totals.records_written
        ));

        if !s.totals.rejected_by_stage.is_empty() {
            out.push_str("  Rejections by stage:\n");
            for (stage, count) in &s.totals.rejected_by_stage {
                out.push_str(&format!("    {stage}: {count}\n"));
            }
        }

        if !s.failed_units.is_empty() {
            out.push_str("  Failed units:\n");
            for failed in &s.failed_units {
                out.push_str(&format!("    {}: {}\n", failed.unit_id, failed.error));
            }
        }

        if !s.violations.is_empty() {
            out.push_str("  Quality gates violated:\n");
            for v in &s.violations {
                out.push_str(&format!(
                    "    {}: observed {:.4}, threshold {:.4}\n",
                    v.gate, v.observed, v.threshold
                ));
            }
        }

        if s.interrupted {
            out.push_str("  Interrupted before all units were processed\n");
        }
        if let Some(reason) = &s.aborted {
            out.push_str(&format!("  Aborted: {reason}\n"));
        }
        out
    }
}
