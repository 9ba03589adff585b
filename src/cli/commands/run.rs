//! Run command implementation
//!
//! This module implements the `run` command, which ingests every work unit
//! that is not yet committed and resumes where a previous run stopped.

use crate::config::{load_config, SieveConfig};
use crate::core::controller::{RunController, RunSummary};
use crate::core::quality::HealthStatus;
use clap::Args;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Clear all checkpoints and start from the first unit
    #[arg(long)]
    pub fresh: bool,

    /// Skip units whose last attempt failed
    #[arg(long)]
    pub skip_failed: bool,

    /// Classify and deduplicate without writing or committing units
    #[arg(long)]
    pub dry_run: bool,

    /// Override the number of concurrent workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Stop each unit after this many records
    #[arg(long)]
    pub max_records: Option<u64>,
}

impl RunArgs {
    /// Apply command-line overrides to a loaded configuration
    pub fn apply_overrides(&self, config: &mut SieveConfig) {
        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }
        if self.skip_failed {
            tracing::info!("Skipping previously failed units");
            config.checkpoint.exclude_failed = true;
        }
        if let Some(workers) = self.workers {
            tracing::info!(workers, "Overriding worker count from CLI");
            config.run.workers = workers;
        }
        if let Some(max) = self.max_records {
            tracing::info!(max_records = max, "Capping records per unit from CLI");
            config.run.max_records_per_unit = Some(max);
        }
    }

    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(2);
            }
        };

        self.apply_overrides(&mut config);

        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        let dry_run = config.application.dry_run;
        if dry_run {
            println!("DRY RUN MODE - nothing will be written and no unit will be committed");
            println!();
        }

        let shutdown_timeout = Duration::from_secs(config.run.shutdown_timeout_secs);

        let controller = match RunController::from_config(&config, shutdown_signal.clone()).await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize run controller");
                eprintln!("Failed to initialize run: {e}");
                return Ok(4);
            }
        };

        if self.fresh {
            if dry_run {
                println!("--fresh ignored in dry-run mode; checkpoints are left untouched");
            } else {
                match controller.checkpoints().reset().await {
                    Ok(cleared) => {
                        tracing::info!(cleared, "Checkpoints cleared for fresh start");
                        println!("Cleared {cleared} checkpoint(s)");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to clear checkpoints");
                        eprintln!("Failed to clear checkpoints: {e}");
                        return Ok(5);
                    }
                }
            }
        }

        println!("Starting run...");
        println!();

        // The grace period only starts once a shutdown signal arrives
        let mut signal = shutdown_signal;
        let grace = async move {
            while !*signal.borrow() {
                if signal.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            tokio::time::sleep(shutdown_timeout).await;
        };

        let summary = tokio::select! {
            result = controller.run() => match result {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Run failed");
                    eprintln!("Run failed: {e}");
                    return Ok(5);
                }
            },
            _ = grace => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Workers did not stop within the shutdown timeout"
                );
                eprintln!("Shutdown timeout elapsed; unfinished units will be replayed on the next run");
                return Ok(130);
            }
        };

        print_summary(&summary);
        Ok(exit_code(&summary))
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Run Summary:");
    println!("  Run ID: {}", summary.run_id);
    println!("  Units: {}", summary.units_total);
    println!("  Committed: {}", summary.units_committed);
    println!("  Skipped (already complete): {}", summary.units_skipped);
    println!("  Failed: {}", summary.failed_units.len());
    println!("  Not started: {}", summary.units_not_started);
    println!("  Records fetched: {}", summary.totals.records_fetched);
    println!("  Records rejected: {}", summary.totals.records_rejected);
    for (stage, count) in &summary.totals.rejected_by_stage {
        println!("    {stage}: {count}");
    }
    println!("  Duplicates: {}", summary.totals.records_duplicate);
    println!("  Conflicts: {}", summary.totals.records_conflict);
    println!("  Written: {}", summary.totals.records_written);
    if let Some(duration) = summary.duration() {
        println!(
            "  Duration: {:.2}s",
            duration.num_milliseconds() as f64 / 1000.0
        );
    }
    println!();

    if !summary.failed_units.is_empty() {
        println!("Failed units:");
        for failed in &summary.failed_units {
            println!("  - {}: {}", failed.unit_id, failed.error);
        }
        println!();
    }

    if !summary.violations.is_empty() {
        println!("Quality gates violated:");
        for v in &summary.violations {
            println!(
                "  - {}: observed {:.4}, threshold {:.4}",
                v.gate, v.observed, v.threshold
            );
        }
        println!();
    }
}

/// Exit code for a finished run
pub fn exit_code(summary: &RunSummary) -> i32 {
    if summary.interrupted {
        println!("Run interrupted. Progress saved; run the same command to resume.");
        130
    } else if let Some(reason) = &summary.aborted {
        println!("Run aborted: {reason}");
        5
    } else {
        match HealthStatus::of(summary) {
            HealthStatus::Healthy => {
                println!("Run completed successfully");
                0
            }
            HealthStatus::Degraded => {
                println!("Run completed with quality gate violations");
                1
            }
            HealthStatus::Failed => {
                println!("Run completed with failed units");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::core::quality::GateViolation;
    use crate::domain::WorkUnitId;

    const CONFIG: &str = r#"
[source]
kind = "archive"

[source.archive]
root = "/data/archives"

[classifier]
policy_path = "policy.toml"

[destination]
kind = "memory"

[checkpoint]
directory = "/tmp/sieve-checkpoints"
"#;

    #[test]
    fn test_overrides() {
        let mut config = parse_config(CONFIG).unwrap();
        let args = RunArgs {
            skip_failed: true,
            dry_run: true,
            workers: Some(2),
            max_records: Some(50),
            ..Default::default()
        };
        args.apply_overrides(&mut config);

        assert!(config.application.dry_run);
        assert!(config.checkpoint.exclude_failed);
        assert_eq!(config.run.workers, 2);
        assert_eq!(config.run.max_records_per_unit, Some(50));
    }

    #[test]
    fn test_exit_codes() {
        let mut summary = RunSummary::new(false);
        assert_eq!(exit_code(&summary), 0);

        summary.violations.push(GateViolation {
            gate: "rejection_rate".to_string(),
            observed: 0.9,
            threshold: 0.5,
        });
        assert_eq!(exit_code(&summary), 1);

        summary.violations.clear();
        summary.record_failed(
            WorkUnitId::new("u1").unwrap(),
            "boom".to_string(),
            &Default::default(),
        );
        assert_eq!(exit_code(&summary), 1);

        summary.aborted = Some("checkpoint unwritable".to_string());
        assert_eq!(exit_code(&summary), 5);

        summary.interrupted = true;
        assert_eq!(exit_code(&summary), 130);
    }
}
