//! Quality gates
//!
//! A gate is a threshold on aggregate statistics. Gates never stop a run;
//! a violated gate marks it degraded.

use crate::config::QualityConfig;
use crate::core::checkpoint::UnitCounters;
use crate::core::controller::RunSummary;
use serde::{Deserialize, Serialize};

/// Gate names as they appear in reports
pub const REJECTION_RATE: &str = "max_rejection_rate";
pub const DUPLICATE_RATE: &str = "max_duplicate_rate";
pub const FETCH_ERROR_RATE: &str = "max_fetch_error_rate";
pub const FAILED_UNITS: &str = "max_failed_units";
pub const WRITTEN_RECORDS: &str = "min_written_records";

/// One violated gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolation {
    /// Gate name
    pub gate: String,
    /// Observed value
    pub observed: f64,
    /// Configured threshold
    pub threshold: f64,
}

impl GateViolation {
    fn new(gate: &str, observed: f64, threshold: f64) -> Self {
        Self {
            gate: gate.to_string(),
            observed,
            threshold,
        }
    }
}

/// Rate gates over a set of counters
///
/// A rate with an empty denominator never violates.
pub fn evaluate_rates(config: &QualityConfig, counters: &UnitCounters) -> Vec<GateViolation> {
    let rates = [
        (
            REJECTION_RATE,
            config.max_rejection_rate,
            counters.records_fetched,
            counters.rejection_rate(),
        ),
        (
            DUPLICATE_RATE,
            config.max_duplicate_rate,
            counters.records_accepted,
            counters.duplicate_rate(),
        ),
        (
            FETCH_ERROR_RATE,
            config.max_fetch_error_rate,
            counters.records_fetched + counters.fetch_errors,
            counters.fetch_error_rate(),
        ),
    ];

    rates
        .into_iter()
        .filter_map(|(gate, threshold, denominator, observed)| match threshold {
            Some(max) if denominator > 0 && observed > max => {
                Some(GateViolation::new(gate, observed, max))
            }
            _ => None,
        })
        .collect()
}

/// Every gate over a finished run
pub fn evaluate(config: &QualityConfig, summary: &RunSummary) -> Vec<GateViolation> {
    let mut violations = evaluate_rates(config, &summary.totals);

    if let Some(max) = config.max_failed_units {
        let failed = summary.failed_units.len();
        if failed > max {
            violations.push(GateViolation::new(FAILED_UNITS, failed as f64, max as f64));
        }
    }

    if let Some(min) = config.min_written_records {
        let written = summary.totals.records_written;
        if written < min {
            violations.push(GateViolation::new(WRITTEN_RECORDS, written as f64, min as f64));
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkUnitId;

    fn config() -> QualityConfig {
        QualityConfig {
            max_rejection_rate: Some(0.5),
            max_duplicate_rate: Some(0.1),
            max_fetch_error_rate: Some(0.01),
            max_failed_units: Some(0),
            min_written_records: Some(1),
        }
    }

    #[test]
    fn test_clean_run_passes() {
        let mut summary = RunSummary::new(false);
        summary.record_committed(&UnitCounters {
            records_fetched: 100,
            records_rejected: 40,
            records_accepted: 60,
            records_duplicate: 3,
            records_written: 57,
            ..Default::default()
        });
        assert!(evaluate(&config(), &summary).is_empty());
    }

    #[test]
    fn test_violations_are_reported() {
        let mut summary = RunSummary::new(false);
        summary.record_committed(&UnitCounters {
            records_fetched: 10,
            fetch_errors: 1,
            records_rejected: 9,
            records_accepted: 1,
            records_duplicate: 1,
            ..Default::default()
        });
        summary.record_failed(
            WorkUnitId::new("u").unwrap(),
            "gone".to_string(),
            &UnitCounters::default(),
        );

        let gates: Vec<String> = evaluate(&config(), &summary)
            .into_iter()
            .map(|v| v.gate)
            .collect();
        assert_eq!(
            gates,
            vec![
                REJECTION_RATE,
                DUPLICATE_RATE,
                FETCH_ERROR_RATE,
                FAILED_UNITS,
                WRITTEN_RECORDS
            ]
        );
    }

    #[test]
    fn test_empty_run_only_trips_minimum() {
        let summary = RunSummary::new(false);
        let violations = evaluate(&config(), &summary);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].gate, WRITTEN_RECORDS);

        let no_minimum = QualityConfig {
            min_written_records: None,
            ..config()
        };
        assert!(evaluate(&no_minimum, &summary).is_empty());
    }
}
