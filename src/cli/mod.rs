//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Sieve using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Sieve - Resumable bulk ingestion engine
#[derive(Parser, Debug)]
#[command(name = "sieve")]
#[command(version, about, long_about = None)]
#[command(author = "Sieve Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sieve.toml", env = "SIEVE_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SIEVE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest every unit not yet committed
    Run(commands::run::RunArgs),

    /// Validate configuration and classifier policy
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show checkpoint status and recent runs
    Status(commands::status::StatusArgs),
}
