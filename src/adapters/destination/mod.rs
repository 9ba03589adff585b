//! Destination store abstraction
//!
//! A [`Destination`] is the durable table of accepted records, keyed by
//! natural key. Writes happen in bounded transactions; a transaction either
//! lands completely or not at all.

pub mod memory;
pub mod postgresql;

use crate::config::{DestinationConfig, DestinationKind};
use crate::domain::{
    AcceptedRecord, Annotations, NaturalKey, Result, Revision, SieveError, WorkUnitId,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use memory::MemoryDestination;
pub use postgresql::PostgreSQLDestination;

/// Identity of a stored row, as needed by the deduplicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFingerprint {
    /// SHA-256 of the stored content
    pub content_hash: String,
    /// Stored revision, if any
    pub revision: Option<Revision>,
}

impl RowFingerprint {
    /// Whether this version may replace `stored`
    ///
    /// Only a strictly newer revision does; a revision beats no revision;
    /// without a revision nothing is ever replaced.
    pub fn supersedes(&self, stored: &RowFingerprint) -> bool {
        match (&self.revision, &stored.revision) {
            (Some(incoming), Some(stored)) => incoming > stored,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl From<&AcceptedRecord> for RowFingerprint {
    fn from(record: &AcceptedRecord) -> Self {
        Self {
            content_hash: record.content_hash.clone(),
            revision: record.revision.clone(),
        }
    }
}

/// One row as written to the destination
#[derive(Debug, Clone, PartialEq)]
pub struct DestinationRow {
    /// Primary key
    pub key: NaturalKey,
    /// Content hash used for duplicate detection
    pub content_hash: String,
    /// Revision used by the conflict policy
    pub revision: Option<Revision>,
    /// Unit that produced the row
    pub unit_id: WorkUnitId,
    /// Record payload
    pub payload: Value,
    /// Classifier provenance
    pub annotations: Annotations,
}

impl From<AcceptedRecord> for DestinationRow {
    fn from(record: AcceptedRecord) -> Self {
        Self {
            key: record.key,
            content_hash: record.content_hash,
            revision: record.revision,
            unit_id: record.record.unit_id,
            payload: Value::Object(record.record.fields),
            annotations: record.annotations,
        }
    }
}

impl DestinationRow {
    /// Fingerprint of this row
    pub fn fingerprint(&self) -> RowFingerprint {
        RowFingerprint {
            content_hash: self.content_hash.clone(),
            revision: self.revision.clone(),
        }
    }
}

/// Counts reported by a committed transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Rows that did not exist before
    pub inserted: u64,
    /// Rows whose content was replaced
    pub updated: u64,
    /// Rows already present with identical content
    pub unchanged: u64,
    /// Rows left alone because the stored revision is at least as new
    pub stale: u64,
}

impl UpsertOutcome {
    /// Rows that now hold the written content
    pub fn written(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Destination store trait
///
/// Implementations must make [`Destination::transactional_upsert`] atomic:
/// on error nothing from the batch is visible.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Create tables and indexes if they don't exist
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be reached or prepared.
    async fn prepare(&self) -> Result<()>;

    /// Insert or replace rows by natural key in one transaction
    ///
    /// Replaying the same rows leaves the store unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::DestinationError::TransactionFailed`] after
    /// rolling back.
    async fn transactional_upsert(&self, rows: &[DestinationRow]) -> Result<UpsertOutcome>;

    /// Fingerprint of the row stored under `key`
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::DestinationError::LookupFailed`] if the store
    /// cannot be queried.
    async fn lookup(&self, key: &NaturalKey) -> Result<Option<RowFingerprint>>;

    /// Fingerprints for several keys; missing keys are absent from the map
    ///
    /// # Errors
    ///
    /// Returns an error if any lookup fails.
    async fn lookup_many(
        &self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, RowFingerprint>> {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(fingerprint) = self.lookup(key).await? {
                found.insert(key.clone(), fingerprint);
            }
        }
        Ok(found)
    }

    /// Total rows stored
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn count(&self) -> Result<u64>;
}

/// Build the configured destination
///
/// # Errors
///
/// Returns an error if the backend section is missing or the connection
/// pool cannot be created.
pub async fn create_destination(config: &DestinationConfig) -> Result<Arc<dyn Destination>> {
    match config.kind {
        DestinationKind::PostgreSQL => {
            let pg = config.postgresql.as_ref().ok_or_else(|| {
                SieveError::Configuration(
                    "destination.kind is postgresql but [destination.postgresql] is missing"
                        .to_string(),
                )
            })?;
            Ok(Arc::new(PostgreSQLDestination::new(pg.clone()).await?))
        }
        DestinationKind::Memory => Ok(Arc::new(MemoryDestination::new())),
    }
}
