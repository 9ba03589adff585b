//! Validate config command implementation
//!
//! This module implements the `validate-config` command, which checks the
//! configuration file and builds the classifier policy it points to.

use crate::config::schema::{DestinationKind, SourceKind};
use crate::config::{load_config, SieveConfig};
use crate::core::classify::ClassifierPolicy;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("Validating configuration file: {config_path}");
        println!();

        // load_config validates as part of loading
        let config = match load_config(config_path) {
            Ok(c) => {
                println!("Configuration is valid");
                c
            }
            Err(e) => {
                println!("Configuration is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        let stages = match ClassifierPolicy::from_file(&config.classifier.policy_path)
            .and_then(|policy| policy.build())
        {
            Ok(classifier) => {
                println!("Classifier policy is valid");
                classifier.stage_names()
            }
            Err(e) => {
                println!("Classifier policy is invalid");
                println!("   Error: {e}");
                return Ok(2);
            }
        };

        println!();
        print_config_summary(&config, &stages);
        Ok(0)
    }
}

fn print_config_summary(config: &SieveConfig, stages: &[String]) {
    println!("Configuration Summary:");
    println!("  Log Level: {}", config.application.log_level);
    println!("  Dry Run: {}", config.application.dry_run);

    match config.source.kind {
        SourceKind::Http => {
            if let Some(http) = &config.source.http {
                println!("  Source: HTTP {}", http.base_url);
                println!(
                    "  Date Range: {} .. {} by {:?}",
                    http.start_date, http.end_date, http.partition
                );
                println!("  Page Size: {}", http.page_size);
            }
        }
        SourceKind::Archive => {
            if let Some(archive) = &config.source.archive {
                println!("  Source: archives under {}", archive.root);
                println!("  Extensions: {:?}", archive.extensions);
            }
        }
    }

    println!("  Classifier Stages: {}", stages.join(" -> "));

    match config.destination.kind {
        DestinationKind::PostgreSQL => {
            if let Some(pg) = &config.destination.postgresql {
                use secrecy::ExposeSecret;
                let connection: &str = pg.connection_string.expose_secret().as_ref();
                println!("  Destination: PostgreSQL");
                println!(
                    "  PostgreSQL Connection: {}",
                    connection.split('@').next_back().unwrap_or("***")
                );
                println!("  Table: {}", pg.table);
                println!("  Max Connections: {}", pg.max_connections);
            }
        }
        DestinationKind::Memory => println!("  Destination: in-memory"),
    }

    println!("  Checkpoints: {}", config.checkpoint.directory);
    println!("  Workers: {}", config.run.workers);
    println!("  Batch Size: {}", config.run.batch_size);
    println!("  Conflict Policy: {}", config.run.conflict_policy);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, policy: &str) -> String {
        std::fs::write(dir.path().join("policy.toml"), policy).unwrap();
        let config = format!(
            r#"
[source]
kind = "archive"

[source.archive]
root = "{root}"

[classifier]
policy_path = "{root}/policy.toml"

[destination]
kind = "memory"
"#,
            root = dir.path().display()
        );
        let path = dir.path().join("sieve.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(config.as_bytes()).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_valid_config_and_policy() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[completeness]\nrequired_fields = [\"id\"]\n");
        assert_eq!(ValidateArgs {}.execute(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_policy() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[lexical]\nunknown = 1\n");
        assert_eq!(ValidateArgs {}.execute(&path).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_config() {
        let code = ValidateArgs {}.execute("/nonexistent/sieve.toml").await.unwrap();
        assert_eq!(code, 2);
    }
}
