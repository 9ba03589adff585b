//! Configuration management for Sieve.
//!
//! This module provides TOML-based configuration loading, parsing, and validation.
//!
//! # Overview
//!
//! Sieve uses TOML configuration files with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `SIEVE_<SECTION>_<KEY>` environment overrides
//! - Default values for optional settings
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sieve::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("sieve.toml")?;
//! println!("Workers: {}", config.run.workers);
//! println!("Checkpoints: {}", config.checkpoint.directory);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and dry-run switch
//! - [`SourceConfig`] - HTTP or archive source binding
//! - [`ClassifierConfig`] - Location of the classifier policy file
//! - [`DestinationConfig`] - PostgreSQL or in-memory destination
//! - [`CheckpointConfig`] - Checkpoint directory
//! - [`RunConfig`] - Concurrency, batching, timeouts, conflict policy
//! - [`QualityConfig`] - Quality gate thresholds
//! - [`LoggingConfig`] - Local file logging
//!
//! # Example Configuration
//!
//! ```toml
//! [source]
//! kind = "http"
//!
//! [source.http]
//! base_url = "https://api.example.org/works"
//! api_token = "${SIEVE_API_TOKEN}"
//! start_date = "2020-01-01"
//! end_date = "2025-01-01"
//! partition = "month"
//!
//! [classifier]
//! policy_path = "policy.toml"
//!
//! [destination]
//! kind = "postgresql"
//!
//! [destination.postgresql]
//! connection_string = "${SIEVE_PG_URL}"
//!
//! [run]
//! workers = 4
//! batch_size = 500
//! conflict_policy = "overwrite_if_newer"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, ArchiveSourceConfig, CheckpointConfig, ClassifierConfig,
    DestinationConfig, DestinationKind, HttpSourceConfig, LoggingConfig, Partition,
    PostgreSQLConfig, QualityConfig, RetryConfig, RunConfig, SieveConfig, SourceConfig,
    SourceKind,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
