//! Core ingestion engine
//!
//! # Modules
//!
//! - [`checkpoint`] - Durable per-unit progress
//! - [`enumerate`] - Work unit listing helpers
//! - [`fetch`] - Paginated and archive record streams
//! - [`classify`] - Ordered, short-circuiting record classification
//! - [`dedup`] - New/duplicate/conflict decisions against the destination
//! - [`writer`] - Bounded, idempotent destination transactions
//! - [`controller`] - Worker pool, cancellation and run summary
//! - [`quality`] - Quality gates and the run report
//!
//! # Run Workflow
//!
//! 1. **Enumerate**: List work units and skip those already complete
//! 2. **Fetch**: Stream each pending unit in pages or archive chunks
//! 3. **Classify**: Drop irrelevant or incomplete records, derive keys
//! 4. **Deduplicate**: Admit new rows, resolve conflicts per policy
//! 5. **Write**: Upsert in bounded transactions
//! 6. **Checkpoint**: Mark the unit complete after its last transaction
//! 7. **Report**: Evaluate quality gates and persist the run summary
//!
//! # Example
//!
//! ```rust,no_run
//! use sieve::config::load_config;
//! use sieve::core::controller::RunController;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("sieve.toml")?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let controller = RunController::from_config(&config, shutdown_rx).await?;
//! let summary = controller.run().await?;
//!
//! println!("Committed: {}", summary.units_committed);
//! println!("Failed: {}", summary.failed_units.len());
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod classify;
pub mod controller;
pub mod dedup;
pub mod enumerate;
pub mod fetch;
pub mod quality;
pub mod writer;
