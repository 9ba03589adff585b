//! Quality reporting
//!
//! Evaluates quality gates after each unit and at the end of a run, and
//! renders the run report. A run is `healthy` when nothing failed and no
//! gate tripped, `degraded` when only gates tripped, and `failed` when
//! units failed or the run was aborted or interrupted.

pub mod gates;
pub mod report;

use crate::config::QualityConfig;
use crate::core::checkpoint::UnitCounters;
use crate::core::controller::RunSummary;
use crate::domain::WorkUnitId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use gates::{evaluate, evaluate_rates, GateViolation};
pub use report::QualityReport;

/// Overall verdict of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All units committed or skipped; no gate violated
    Healthy,
    /// Gates violated but no unit failed
    Degraded,
    /// Failed units, or the run did not finish
    Failed,
}

impl HealthStatus {
    /// Verdict for a summary whose violations are already evaluated
    pub fn of(summary: &RunSummary) -> Self {
        if !summary.failed_units.is_empty() || summary.aborted.is_some() || summary.interrupted {
            HealthStatus::Failed
        } else if summary.is_degraded() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies the configured gates to units and runs
#[derive(Debug, Clone, Default)]
pub struct QualityReporter {
    config: QualityConfig,
}

impl QualityReporter {
    /// Create a reporter for the given gates
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Check one unit's rates and warn about any that are out of bounds
    ///
    /// Unit-level violations are advisory; only the run-level evaluation
    /// ends up in the summary.
    pub fn check_unit(&self, unit_id: &WorkUnitId, counters: &UnitCounters) -> Vec<GateViolation> {
        let violations = evaluate_rates(&self.config, counters);
        for v in &violations {
            tracing::warn!(
                unit = %unit_id,
                gate = %v.gate,
                observed = v.observed,
                threshold = v.threshold,
                "Unit exceeds quality gate"
            );
        }
        violations
    }

    /// Evaluate every gate, store the violations on the summary and return the verdict
    pub fn finalize(&self, summary: &mut RunSummary) -> HealthStatus {
        summary.violations = evaluate(&self.config, summary);
        HealthStatus::of(summary)
    }
}
