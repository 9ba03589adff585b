//! PostgreSQL destination
//!
//! One table keyed by natural key. Each batch runs in its own transaction
//! and uses `INSERT ... ON CONFLICT DO UPDATE`, so replaying a batch after a
//! crash rewrites the same rows instead of duplicating them.

use super::{Destination, DestinationRow, RowFingerprint, UpsertOutcome};
use crate::config::PostgreSQLConfig;
use crate::domain::{DestinationError, NaturalKey, Result, Revision, SieveError};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

const SCHEMA_SQL: &str = include_str!("../../../migrations/001_initial_schema.sql");

/// PostgreSQL-backed destination using a deadpool connection pool
pub struct PostgreSQLDestination {
    pool: Pool,
    config: PostgreSQLConfig,
}

impl PostgreSQLDestination {
    /// Create the connection pool
    ///
    /// Connections are established lazily; call [`Destination::prepare`] to
    /// verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the pool
    /// cannot be built.
    pub async fn new(config: PostgreSQLConfig) -> Result<Self> {
        let pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .parse()
            .map_err(|e| {
                SieveError::Configuration(format!("Invalid PostgreSQL connection string: {}", e))
            })?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .build()
            .map_err(|e| {
                DestinationError::ConnectionFailed(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool, config })
    }

    async fn connection(&self) -> Result<deadpool_postgres::Object> {
        let client = self.pool.get().await.map_err(|e| {
            DestinationError::ConnectionFailed(format!("Failed to get connection from pool: {}", e))
        })?;

        client
            .batch_execute(&format!(
                "SET statement_timeout = {}",
                self.config.statement_timeout_seconds * 1000
            ))
            .await
            .map_err(|e| {
                DestinationError::ConnectionFailed(format!("Failed to set statement timeout: {}", e))
            })?;

        Ok(client)
    }

    fn table(&self) -> &str {
        &self.config.table
    }

    fn schema_sql(&self) -> String {
        SCHEMA_SQL
            .replace("{table}", self.table())
            .replace("{index_prefix}", &self.table().replace('.', "_"))
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO {table} (
                natural_key, content_hash, revision_ts, revision_counter,
                unit_id, payload, annotations
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (natural_key) DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                revision_ts = EXCLUDED.revision_ts,
                revision_counter = EXCLUDED.revision_counter,
                unit_id = EXCLUDED.unit_id,
                payload = EXCLUDED.payload,
                annotations = EXCLUDED.annotations,
                updated_at = NOW()
            WHERE {table}.content_hash IS DISTINCT FROM EXCLUDED.content_hash
              AND (
                EXCLUDED.revision_ts > {table}.revision_ts
                OR EXCLUDED.revision_counter > {table}.revision_counter
                OR (EXCLUDED.revision_counter IS NOT NULL AND {table}.revision_ts IS NOT NULL)
                OR (
                    {table}.revision_ts IS NULL AND {table}.revision_counter IS NULL
                    AND (EXCLUDED.revision_ts IS NOT NULL OR EXCLUDED.revision_counter IS NOT NULL)
                )
              )
            RETURNING (xmax = 0) AS inserted
            "#,
            table = self.table()
        )
    }
}

/// Count a row the guarded upsert returned nothing for
///
/// The stored copy either already matches (unchanged) or carries a revision
/// at least as new (stale).
fn record_untouched(outcome: &mut UpsertOutcome, stored_hash: Option<&str>, row: &DestinationRow) {
    if stored_hash == Some(row.content_hash.as_str()) {
        outcome.unchanged += 1;
    } else {
        outcome.stale += 1;
    }
}

fn fingerprint_from_row(row: &Row) -> Result<(String, RowFingerprint)> {
    let get_err = |e: tokio_postgres::Error| DestinationError::LookupFailed(e.to_string());
    let key: String = row.try_get("natural_key").map_err(get_err)?;
    let content_hash: String = row.try_get("content_hash").map_err(get_err)?;
    let ts: Option<chrono::DateTime<chrono::Utc>> = row.try_get("revision_ts").map_err(get_err)?;
    let counter: Option<i64> = row.try_get("revision_counter").map_err(get_err)?;

    let revision = ts
        .map(Revision::Timestamp)
        .or_else(|| counter.map(Revision::Counter));

    Ok((
        key,
        RowFingerprint {
            content_hash,
            revision,
        },
    ))
}

#[async_trait]
impl Destination for PostgreSQLDestination {
    fn name(&self) -> &str {
        "postgresql"
    }

    async fn prepare(&self) -> Result<()> {
        let client = self.connection().await?;
        client
            .batch_execute(&self.schema_sql())
            .await
            .map_err(|e| DestinationError::SchemaFailed(e.to_string()))?;

        tracing::info!(table = %self.table(), "PostgreSQL destination ready");
        Ok(())
    }

    async fn transactional_upsert(&self, rows: &[DestinationRow]) -> Result<UpsertOutcome> {
        if rows.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let tx_err = |e: tokio_postgres::Error| DestinationError::TransactionFailed(e.to_string());

        let mut client = self.connection().await?;
        let tx = client.transaction().await.map_err(tx_err)?;
        let statement = tx.prepare(&self.upsert_sql()).await.map_err(tx_err)?;
        let stored_hash = tx
            .prepare(&format!(
                "SELECT content_hash FROM {} WHERE natural_key = $1",
                self.table()
            ))
            .await
            .map_err(tx_err)?;

        let mut outcome = UpsertOutcome::default();
        for row in rows {
            let (revision_ts, revision_counter) = match &row.revision {
                Some(Revision::Timestamp(ts)) => (Some(*ts), None),
                Some(Revision::Counter(n)) => (None, Some(*n)),
                None => (None, None),
            };
            let annotations = Value::Object(row.annotations.clone());

            let returned = tx
                .query_opt(
                    &statement,
                    &[
                        &row.key.as_str(),
                        &row.content_hash,
                        &revision_ts,
                        &revision_counter,
                        &row.unit_id.as_str(),
                        &row.payload,
                        &annotations,
                    ],
                )
                .await
                .map_err(tx_err)?;

            // Identical and stale rows both return nothing
            match returned {
                None => {
                    let current: Option<String> = tx
                        .query_opt(&stored_hash, &[&row.key.as_str()])
                        .await
                        .map_err(tx_err)?
                        .map(|r| r.try_get::<_, String>("content_hash"))
                        .transpose()
                        .map_err(tx_err)?;
                    record_untouched(&mut outcome, current.as_deref(), row);
                }
                Some(r) if r.try_get::<_, bool>("inserted").unwrap_or(false) => {
                    outcome.inserted += 1
                }
                Some(_) => outcome.updated += 1,
            }
        }

        // Dropping an uncommitted transaction rolls it back, so every early
        // return above leaves the table untouched.
        tx.commit().await.map_err(tx_err)?;

        tracing::debug!(
            table = %self.table(),
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            stale = outcome.stale,
            "Transaction committed"
        );
        Ok(outcome)
    }

    async fn lookup(&self, key: &NaturalKey) -> Result<Option<RowFingerprint>> {
        let found = self.lookup_many(std::slice::from_ref(key)).await?;
        Ok(found.get(key).cloned())
    }

    async fn lookup_many(
        &self,
        keys: &[NaturalKey],
    ) -> Result<HashMap<NaturalKey, RowFingerprint>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let client = self.connection().await?;
        let wanted: Vec<&str> = keys.iter().map(NaturalKey::as_str).collect();
        let rows = client
            .query(
                &format!(
                    "SELECT natural_key, content_hash, revision_ts, revision_counter \
                     FROM {} WHERE natural_key = ANY($1)",
                    self.table()
                ),
                &[&wanted],
            )
            .await
            .map_err(|e| DestinationError::LookupFailed(e.to_string()))?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in &rows {
            let (key, fingerprint) = fingerprint_from_row(row)?;
            let key = NaturalKey::new(key).map_err(DestinationError::LookupFailed)?;
            found.insert(key, fingerprint);
        }
        Ok(found)
    }

    async fn count(&self) -> Result<u64> {
        let client = self.connection().await?;
        let row = client
            .query_one(&format!("SELECT COUNT(*) FROM {}", self.table()), &[])
            .await
            .map_err(|e| DestinationError::LookupFailed(e.to_string()))?;
        let count: i64 = row
            .try_get(0)
            .map_err(|e| DestinationError::LookupFailed(e.to_string()))?;
        Ok(count.max(0) as u64)
    }
}
