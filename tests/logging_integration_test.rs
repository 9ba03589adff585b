//! Integration tests for logging functionality
//!
//! A global subscriber can only be installed once per process, so everything
//! touching `init_logging` lives in a single test.

use sieve::config::LoggingConfig;
use sieve::domain::WorkUnitId;
use sieve::logging::init_logging;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(!config.local_enabled);
    assert_eq!(config.local_rotation, "daily");
}

#[test]
fn test_file_logging_writes_json_lines() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs");

    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_path.to_string_lossy().to_string(),
        local_rotation: "hourly".to_string(),
    };

    let guard = init_logging("info", &config).unwrap();
    assert!(guard.has_file_writer());
    assert!(log_path.is_dir());

    // A second subscriber is refused
    assert!(init_logging("info", &LoggingConfig::default()).is_err());

    let unit = WorkUnitId::new("2024-01-01..2024-02-01").unwrap();
    sieve::log_unit_start!(&unit);
    sieve::log_unit_complete!(&unit, 42u64, Duration::from_millis(1500));
    sieve::log_retry_attempt!(1, 3, "Connection reset");

    // Dropping the guard flushes the non-blocking writer
    drop(guard);

    let contents: String = std::fs::read_dir(&log_path)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("sieve.log"))
        .map(|e| std::fs::read_to_string(e.path()).unwrap())
        .collect();

    let first = contents.lines().next().expect("log file is empty");
    let line: serde_json::Value = serde_json::from_str(first).unwrap();
    assert_eq!(line["fields"]["message"], "Logging initialized");
    assert_eq!(line["fields"]["local_enabled"], true);
}

#[test]
fn test_unknown_level_is_rejected_before_install() {
    let err = init_logging("verbose", &LoggingConfig::default()).unwrap_err();
    assert!(err.to_string().contains("Invalid log level"));
}
