//! Domain error types
//!
//! This module defines the error hierarchy for Sieve. All errors are
//! domain-specific and don't expose third-party types.
//!
//! Every error carries a [`ErrorSeverity`] that drives propagation in the run
//! controller: transient record errors never leave the fetcher, fatal unit
//! errors fail one work unit, fatal run errors abort the whole run.

use thiserror::Error;

/// How far an error is allowed to propagate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    /// A single record or page is lost; the unit continues
    TransientRecord,
    /// The current work unit is marked failed; the run continues
    FatalUnit,
    /// The run is aborted
    FatalRun,
}

/// Main Sieve error type
#[derive(Debug, Error)]
pub enum SieveError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source-related errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Destination-related errors
    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    /// Checkpoint store errors (unwritable or corrupt state)
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Invalid work unit state transition
    #[error("Invalid state transition: {0}")]
    State(String),

    /// Classifier policy errors
    #[error("Classifier policy error: {0}")]
    Policy(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A work unit exceeded its time budget
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl SieveError {
    /// Classify the error for propagation purposes
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SieveError::Source(e) if e.is_transient() => ErrorSeverity::TransientRecord,
            SieveError::Source(_)
            | SieveError::Timeout(_)
            | SieveError::Serialization(_)
            | SieveError::Validation(_)
            | SieveError::Other(_) => ErrorSeverity::FatalUnit,
            SieveError::Configuration(_)
            | SieveError::Destination(_)
            | SieveError::Checkpoint(_)
            | SieveError::State(_)
            | SieveError::Policy(_)
            | SieveError::Io(_) => ErrorSeverity::FatalRun,
        }
    }

    /// Returns true if this error must abort the whole run
    pub fn is_fatal_run(&self) -> bool {
        self.severity() == ErrorSeverity::FatalRun
    }
}

/// Source-specific errors
///
/// Errors raised while listing or reading work units from an external source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Source could not be reached at all
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    /// A single request failed to connect
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A page or entry took longer than its timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Server error (5xx)
    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Client error (4xx)
    #[error("Client error: {status} - {message}")]
    ClientError { status: u16, message: String },

    /// Response body could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Archive container could not be opened
    #[error("Archive unreadable: {0}")]
    ArchiveUnreadable(String),

    /// A single archive entry or line is corrupt
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// Too many consecutive page failures
    #[error("Giving up after {failures} consecutive failures: {last_error}")]
    TooManyFailures { failures: usize, last_error: String },
}

impl SourceError {
    /// Transient errors lose one page/entry; everything else fails the unit
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SourceError::ConnectionFailed(_)
                | SourceError::Timeout(_)
                | SourceError::ServerError { .. }
                | SourceError::InvalidResponse(_)
                | SourceError::CorruptEntry(_)
        )
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::ConnectionFailed(_)
                | SourceError::Timeout(_)
                | SourceError::ServerError { .. }
        )
    }
}

/// Destination-specific errors
#[derive(Debug, Error)]
pub enum DestinationError {
    /// Failed to connect to the destination
    #[error("Failed to connect to destination: {0}")]
    ConnectionFailed(String),

    /// Schema setup failed
    #[error("Failed to prepare schema: {0}")]
    SchemaFailed(String),

    /// Transaction could not be committed and was rolled back
    #[error("Transaction rolled back: {0}")]
    TransactionFailed(String),

    /// Natural key lookup failed
    #[error("Lookup failed: {0}")]
    LookupFailed(String),
}

impl From<std::io::Error> for SieveError {
    fn from(err: std::io::Error) -> Self {
        SieveError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SieveError {
    fn from(err: serde_json::Error) -> Self {
        SieveError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SieveError {
    fn from(err: toml::de::Error) -> Self {
        SieveError::Configuration(format!("TOML parse error: {err}"))
    }
}
