//! Shared fixtures for the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use sieve::adapters::checkpoint::CheckpointStorage;
use sieve::adapters::destination::{
    Destination, DestinationRow, MemoryDestination, RowFingerprint, UpsertOutcome,
};
use sieve::adapters::source::Source;
use sieve::config::QualityConfig;
use sieve::core::checkpoint::CheckpointStore;
use sieve::core::classify::{Classifier, ClassifierPolicy};
use sieve::core::controller::{ControllerOptions, RunController};
use sieve::core::fetch::{FetchOptions, RecordChunk, RecordStream};
use sieve::core::quality::QualityReporter;
use sieve::domain::{
    DestinationError, NaturalKey, RawRecord, Result, SieveError, SourceError, WorkUnit,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Accepts works mentioning solar in the title, keyed by `id`
pub const POLICY: &str = r#"
[lexical]
fields = ["title"]
keywords = ["solar"]

[completeness]
required_fields = ["id", "title"]

[natural_key]
fields = ["id"]
revision_field = "updated"
"#;

pub fn classifier() -> Arc<Classifier> {
    Arc::new(ClassifierPolicy::parse(POLICY).unwrap().build().unwrap())
}

pub fn work(id: &str, title: &str) -> Value {
    json!({ "id": id, "title": title })
}

/// `count` relevant works with ids `{prefix}-0..`
pub fn solar_works(prefix: &str, count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| work(&format!("{prefix}-{i}"), &format!("Solar study {i}")))
        .collect()
}

/// In-memory source with a fixed unit list
pub struct StaticSource {
    units: Vec<(WorkUnit, Vec<Value>)>,
    page_size: usize,
    failing: HashSet<String>,
    shutdown_during: Option<(String, Arc<watch::Sender<bool>>)>,
    stalling: HashSet<String>,
    opens: Mutex<HashMap<String, usize>>,
}

impl StaticSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            units: Vec::new(),
            page_size,
            failing: HashSet::new(),
            shutdown_during: None,
            stalling: HashSet::new(),
            opens: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_unit(mut self, name: &str, records: Vec<Value>) -> Self {
        self.units.push((WorkUnit::partition(name).unwrap(), records));
        self
    }

    /// Opening `name` yields a non-transient source error
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Fire the shutdown signal once the second page of `name` is read
    pub fn shutdown_during(mut self, name: &str, tx: Arc<watch::Sender<bool>>) -> Self {
        self.shutdown_during = Some((name.to_string(), tx));
        self
    }

    /// Opening `name` yields a stream that never produces anything
    pub fn stalling(mut self, name: &str) -> Self {
        self.stalling.insert(name.to_string());
        self
    }

    pub fn opens(&self, name: &str) -> usize {
        self.opens.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn enumerate(&self) -> Result<Vec<WorkUnit>> {
        Ok(self.units.iter().map(|(unit, _)| unit.clone()).collect())
    }

    fn open(&self, unit: &WorkUnit, _options: &FetchOptions) -> Result<RecordStream> {
        let name = unit.id.as_str().to_string();
        *self.opens.lock().unwrap().entry(name.clone()).or_insert(0) += 1;

        if self.failing.contains(&name) {
            let err = SieveError::Source(SourceError::InvalidResponse(format!(
                "{name} is malformed"
            )));
            return Ok(stream::once(async move { Err(err) }).boxed());
        }

        if self.stalling.contains(&name) {
            return Ok(stream::pending().boxed());
        }

        let values = self
            .units
            .iter()
            .find(|(u, _)| u.id == unit.id)
            .map(|(_, values)| values.clone())
            .unwrap_or_default();

        let chunks: Vec<RecordChunk> = values
            .chunks(self.page_size.max(1))
            .enumerate()
            .map(|(page, rows)| RecordChunk {
                records: rows
                    .iter()
                    .enumerate()
                    .map(|(i, v)| {
                        let seq = (page * self.page_size + i) as u64;
                        RawRecord::from_value(unit.id.clone(), seq, v.clone())
                    })
                    .collect(),
                lost: 0,
            })
            .collect();

        let trigger = self
            .shutdown_during
            .as_ref()
            .filter(|(target, _)| *target == name)
            .map(|(_, tx)| tx.clone());

        Ok(stream::iter(chunks.into_iter().enumerate())
            .map(move |(i, chunk)| {
                if i == 1 {
                    if let Some(tx) = &trigger {
                        let _ = tx.send(true);
                    }
                }
                Ok(chunk)
            })
            .boxed())
    }
}

pub fn options(workers: usize, batch_size: usize) -> ControllerOptions {
    ControllerOptions {
        workers,
        batch_size,
        unit_timeout: Duration::from_secs(30),
        fetch: FetchOptions {
            chunk_size: batch_size,
            page_timeout: Duration::from_secs(5),
            max_records: None,
            pipeline_depth: 1,
        },
        ..Default::default()
    }
}

/// Wire a controller over in-memory collaborators
pub fn controller(
    source: Arc<dyn Source>,
    destination: Arc<MemoryDestination>,
    storage: Arc<dyn CheckpointStorage>,
    classifier: Arc<Classifier>,
    options: ControllerOptions,
    shutdown: watch::Receiver<bool>,
) -> RunController {
    controller_with(source, destination, storage, classifier, options, shutdown)
}

/// Same as [`controller`] for any destination
pub fn controller_with(
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    storage: Arc<dyn CheckpointStorage>,
    classifier: Arc<Classifier>,
    options: ControllerOptions,
    shutdown: watch::Receiver<bool>,
) -> RunController {
    RunController::new(
        source,
        destination,
        classifier,
        Arc::new(CheckpointStore::new(storage)),
        QualityReporter::new(QualityConfig::default()),
        options,
        shutdown,
    )
}

pub fn no_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Receivers keep seeing `false` after the sender is gone
    drop(tx);
    rx
}

/// Memory destination that holds up the first transaction touching `key`
///
/// The held transaction sleeps for `delay`, then fails when `fail` is set
/// and commits otherwise. Later transactions go straight through.
pub struct HeldDestination {
    pub inner: Arc<MemoryDestination>,
    key: NaturalKey,
    delay: Duration,
    fail: bool,
    held: AtomicBool,
}

impl HeldDestination {
    pub fn new(key: &str, delay: Duration, fail: bool) -> Self {
        Self {
            inner: Arc::new(MemoryDestination::new()),
            key: NaturalKey::new(key).unwrap(),
            delay,
            fail,
            held: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Destination for HeldDestination {
    fn name(&self) -> &str {
        "held"
    }

    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    async fn transactional_upsert(&self, rows: &[DestinationRow]) -> Result<UpsertOutcome> {
        let touches = rows.iter().any(|row| row.key == self.key);
        if touches && !self.held.swap(true, Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(DestinationError::TransactionFailed("connection reset".to_string()).into());
            }
        }
        self.inner.transactional_upsert(rows).await
    }

    async fn lookup(&self, key: &NaturalKey) -> Result<Option<RowFingerprint>> {
        self.inner.lookup(key).await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}
