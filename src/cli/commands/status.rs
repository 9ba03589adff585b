//! Status command implementation
//!
//! This module implements the `status` command, a full scan of the
//! checkpoint store plus the most recent run summaries.

use crate::adapters::checkpoint::FileCheckpointStorage;
use crate::config::load_config;
use crate::core::checkpoint::{CheckpointEntry, CheckpointStore, UnitStatus};
use crate::core::controller::RunSummary;
use clap::Args;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Number of recent runs to show
    #[arg(long, default_value_t = 5)]
    pub runs: usize,
}

/// Number of entries per recorded status; `in_progress` marks interrupted attempts
pub fn count_by_status(entries: &[CheckpointEntry]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for status in [
        UnitStatus::Pending,
        UnitStatus::InProgress,
        UnitStatus::Complete,
        UnitStatus::Failed,
    ] {
        counts.insert(status.as_str(), 0);
    }
    for entry in entries {
        *counts.entry(entry.status.as_str()).or_insert(0) += 1;
    }
    counts
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking checkpoint status");

        println!("Checkpoint Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("Failed to load configuration file");
                println!("   Error: {}", e);
                return Ok(2);
            }
        };

        let storage = match FileCheckpointStorage::open(&config.checkpoint.directory).await {
            Ok(s) => s,
            Err(e) => {
                println!("Failed to open checkpoint directory");
                println!("   Error: {}", e);
                return Ok(4);
            }
        };
        let store = CheckpointStore::new(Arc::new(storage));

        let entries = match store.entries().await {
            Ok(e) => e,
            Err(e) => {
                println!("Failed to read checkpoints");
                println!("   Error: {}", e);
                return Ok(5);
            }
        };

        if entries.is_empty() {
            println!("No checkpoints found in {}.", config.checkpoint.directory);
            println!("Run 'sieve run' to start ingesting.");
        } else {
            println!("{} unit(s) tracked:", entries.len());
            for (status, count) in count_by_status(&entries) {
                println!("  {:<12} {}", status, count);
            }
            println!();

            let snapshot = RunSummary::from_entries(&entries);
            println!("Totals across all units:");
            println!("  Fetched:   {}", snapshot.totals.records_fetched);
            println!("  Rejected:  {}", snapshot.totals.records_rejected);
            println!("  Duplicate: {}", snapshot.totals.records_duplicate);
            println!("  Written:   {}", snapshot.totals.records_written);
            println!();

            if !snapshot.failed_units.is_empty() {
                println!("Failed units:");
                for failed in &snapshot.failed_units {
                    println!("  - {}: {}", failed.unit_id, failed.error);
                }
                println!();
            }
        }

        match store.recent_runs(self.runs).await {
            Ok(runs) if !runs.is_empty() => {
                println!("Recent runs:");
                println!(
                    "{:<38} {:<20} {:>9} {:>7} {:>7} {:>10}",
                    "Run ID", "Started", "Committed", "Skipped", "Failed", "Written"
                );
                println!("{}", "-".repeat(96));
                for run in runs {
                    println!(
                        "{:<38} {:<20} {:>9} {:>7} {:>7} {:>10}{}",
                        run.run_id,
                        run.started_at.format("%Y-%m-%d %H:%M:%S"),
                        run.units_committed,
                        run.units_skipped,
                        run.failed_units.len(),
                        run.totals.records_written,
                        if run.dry_run { "  (dry run)" } else { "" }
                    );
                }
                println!();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read run history");
            }
        }

        Ok(0)
    }
}
