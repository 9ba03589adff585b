//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::SieveConfig;
use super::secret::secret_string;
use crate::domain::errors::SieveError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into SieveConfig
/// 4. Applies environment variable overrides (SIEVE_* prefix)
/// 5. Validates the configuration
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns [`SieveError::Configuration`] if the file is missing or unreadable,
/// a referenced variable is unset, the TOML is malformed, or validation fails.
///
/// # Examples
///
/// ```no_run
/// use sieve::config::loader::load_config;
///
/// let config = load_config("sieve.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<SieveConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SieveError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SieveError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&contents)
}

/// Parses configuration text, applying substitution, overrides and validation
///
/// # Errors
///
/// Same as [`load_config`], minus the file handling.
pub fn parse_config(contents: &str) -> Result<SieveConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: SieveConfig = toml::from_str(&contents)
        .map_err(|e| SieveError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut config)?;

    config.validate().map_err(|e| {
        SieveError::Configuration(format!("Configuration validation failed: {}", e))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SieveError::Other(format!("Invalid substitution pattern: {}", e)))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(SieveError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(val) => val.trim().parse::<T>().map(Some).map_err(|_| {
            SieveError::Configuration(format!("Invalid value '{}' for {}", val, name))
        }),
        Err(_) => Ok(None),
    }
}

/// Applies environment variable overrides using SIEVE_* prefix
///
/// Environment variables follow the pattern: SIEVE_<SECTION>_<KEY>
/// For example: SIEVE_RUN_WORKERS, SIEVE_SOURCE_HTTP_API_TOKEN
///
/// # Errors
///
/// Returns an error if a numeric or boolean override cannot be parsed
fn apply_env_overrides(config: &mut SieveConfig) -> Result<()> {
    // Application overrides
    if let Ok(val) = std::env::var("SIEVE_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(dry_run) = env_parse("SIEVE_APPLICATION_DRY_RUN")? {
        config.application.dry_run = dry_run;
    }

    // Source overrides
    if let Some(ref mut http) = config.source.http {
        if let Ok(val) = std::env::var("SIEVE_SOURCE_HTTP_BASE_URL") {
            http.base_url = val;
        }
        if let Ok(val) = std::env::var("SIEVE_SOURCE_HTTP_API_TOKEN") {
            http.api_token = Some(secret_string(val));
        }
        if let Some(size) = env_parse("SIEVE_SOURCE_HTTP_PAGE_SIZE")? {
            http.page_size = size;
        }
    }
    if let Some(ref mut archive) = config.source.archive {
        if let Ok(val) = std::env::var("SIEVE_SOURCE_ARCHIVE_ROOT") {
            archive.root = val;
        }
    }

    if let Ok(val) = std::env::var("SIEVE_CLASSIFIER_POLICY_PATH") {
        config.classifier.policy_path = val;
    }

    // Destination overrides
    if let Some(ref mut pg) = config.destination.postgresql {
        if let Ok(val) = std::env::var("SIEVE_DESTINATION_POSTGRESQL_CONNECTION_STRING") {
            pg.connection_string = secret_string(val);
        }
        if let Ok(val) = std::env::var("SIEVE_DESTINATION_POSTGRESQL_TABLE") {
            pg.table = val;
        }
    }

    // Checkpoint overrides
    if let Ok(val) = std::env::var("SIEVE_CHECKPOINT_DIRECTORY") {
        config.checkpoint.directory = val;
    }
    if let Some(exclude) = env_parse("SIEVE_CHECKPOINT_EXCLUDE_FAILED")? {
        config.checkpoint.exclude_failed = exclude;
    }

    // Run overrides
    if let Some(workers) = env_parse("SIEVE_RUN_WORKERS")? {
        config.run.workers = workers;
    }
    if let Some(batch_size) = env_parse("SIEVE_RUN_BATCH_SIZE")? {
        config.run.batch_size = batch_size;
    }
    if let Some(cap) = env_parse("SIEVE_RUN_MAX_RECORDS_PER_UNIT")? {
        config.run.max_records_per_unit = Some(cap);
    }
    if let Ok(val) = std::env::var("SIEVE_RUN_CONFLICT_POLICY") {
        config.run.conflict_policy = val.parse().map_err(SieveError::Configuration)?;
    }
    if let Ok(val) = std::env::var("SIEVE_RUN_REPORT_PATH") {
        config.run.report_path = Some(val);
    }

    // Logging overrides
    if let Some(enabled) = env_parse("SIEVE_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = enabled;
    }
    if let Ok(val) = std::env::var("SIEVE_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }

    Ok(())
}
