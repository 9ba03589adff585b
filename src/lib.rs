// Sieve - Resumable bulk ingestion engine
// Copyright (c) 2025 Sieve Contributors
// Licensed under the MIT License

//! # Sieve - Resumable Bulk Ingestion
//!
//! Sieve pulls large record collections out of external sources (paginated
//! HTTP APIs or trees of compressed archives), keeps only the records that
//! pass a multi-stage relevance classifier, deduplicates them against what
//! is already stored, and writes them to a relational destination.
//!
//! ## Overview
//!
//! - **Resumable**: every work unit is checkpointed; a restarted run skips
//!   committed units and replays unfinished ones from their start
//! - **Idempotent**: re-running over the same input never duplicates rows
//! - **Short-circuiting**: classifier stages stop at the first rejection
//! - **Bounded**: a fixed worker pool, bounded read-ahead and bounded
//!   destination transactions
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Engine (checkpoint, fetch, classify, dedup, write, control, quality)
//! - [`adapters`] - Sources, destinations and checkpoint storage
//! - [`domain`] - Identifiers, records and errors
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sieve::config::load_config;
//! use sieve::core::controller::RunController;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("sieve.toml")?;
//!     let (_tx, shutdown) = tokio::sync::watch::channel(false);
//!
//!     let controller = RunController::from_config(&config, shutdown).await?;
//!     let summary = controller.run().await?;
//!
//!     println!("Wrote {} records", summary.totals.records_written);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every library call returns [`domain::Result`], carrying a
//! [`domain::SieveError`]. [`domain::SieveError::severity`] tells the
//! controller whether an error ends a record, a unit or the whole run.
//!
//! ## Logging
//!
//! ```rust,no_run
//! use tracing::{info, warn};
//!
//! info!(unit = "2024-01-01..2024-02-01", "Starting work unit");
//! warn!(stage = "lexical", rejected = 12, "Stage rejections");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
