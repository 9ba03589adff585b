//! Logging and observability
//!
//! Structured logging via `tracing`:
//! - Console output for interactive runs
//! - JSON-formatted rolling log files when enabled
//! - `RUST_LOG` or configured log level
//!
//! # Example
//!
//! ```no_run
//! use sieve::logging::init_logging;
//! use sieve::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(unit = "2024-01-01..2024-02-01", "Unit started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of a work unit
///
/// # Example
///
/// ```no_run
/// use sieve::log_unit_start;
/// use sieve::domain::WorkUnitId;
///
/// let unit = WorkUnitId::new("2024-01-01..2024-02-01").unwrap();
/// log_unit_start!(&unit);
/// ```
#[macro_export]
macro_rules! log_unit_start {
    ($unit_id:expr) => {
        tracing::info!(unit = %$unit_id, "Starting work unit");
    };
}

/// Log the completion of a work unit
///
/// # Example
///
/// ```no_run
/// use sieve::log_unit_complete;
/// use std::time::Duration;
///
/// log_unit_complete!("2023/a.tar.gz", 420, Duration::from_secs(3));
/// ```
#[macro_export]
macro_rules! log_unit_complete {
    ($unit_id:expr, $written:expr, $duration:expr) => {
        tracing::info!(
            unit = %$unit_id,
            written = $written,
            duration_ms = $duration.as_millis() as u64,
            "Work unit committed"
        );
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use sieve::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}
