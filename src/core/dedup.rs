//! Cross-unit deduplication
//!
//! The [`Deduplicator`] decides, per natural key, whether an accepted record
//! is new, an exact duplicate, or a conflicting version of something already
//! stored. Decisions and reservations happen under one mutex so two workers
//! never both treat the same key as new.
//!
//! The in-memory index is a cache over the destination: keys it has not seen
//! yet are looked up in the destination store, so a restarted run sees what
//! previous runs wrote. A key only enters the index once its transaction has
//! committed.

use crate::adapters::destination::{Destination, RowFingerprint};
use crate::domain::{AcceptedRecord, NaturalKey, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{watch, Mutex};

/// What to do when a key arrives with different content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The first stored version wins
    #[default]
    KeepFirst,
    /// Replace the stored version when the incoming revision is strictly newer
    OverwriteIfNewer,
}

impl ConflictPolicy {
    /// Config spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::KeepFirst => "keep_first",
            ConflictPolicy::OverwriteIfNewer => "overwrite_if_newer",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "keep_first" => Ok(ConflictPolicy::KeepFirst),
            "overwrite_if_newer" => Ok(ConflictPolicy::OverwriteIfNewer),
            other => Err(format!(
                "Invalid conflict policy '{}'. Must be one of: keep_first, overwrite_if_newer",
                other
            )),
        }
    }
}

/// Deduplication decision for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Key never seen
    New,
    /// Key seen with identical content
    Duplicate,
    /// Key seen with different content; `overwrite` says whether it wins
    Conflict {
        /// Incoming version replaces the stored one
        overwrite: bool,
    },
}

/// Decide the outcome for `incoming` given what is stored under its key
pub fn resolve(
    policy: ConflictPolicy,
    existing: Option<&RowFingerprint>,
    incoming: &RowFingerprint,
) -> DedupOutcome {
    match existing {
        None => DedupOutcome::New,
        Some(stored) if stored.content_hash == incoming.content_hash => DedupOutcome::Duplicate,
        Some(stored) => DedupOutcome::Conflict {
            overwrite: policy == ConflictPolicy::OverwriteIfNewer
                && incoming.supersedes(stored),
        },
    }
}

type InFlight = HashMap<NaturalKey, (u64, watch::Receiver<()>)>;

/// Keys held by one admission while its transaction is open
///
/// Dropping it, whether after a commit, a failed write or a cancelled
/// future, removes the keys from the in-flight table and wakes every worker
/// waiting on them.
#[derive(Debug)]
struct Reservation {
    id: u64,
    keys: Vec<NaturalKey>,
    in_flight: Arc<StdMutex<InFlight>>,
    _settled: watch::Sender<()>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            if in_flight.get(key).is_some_and(|(owner, _)| *owner == self.id) {
                in_flight.remove(key);
            }
        }
    }
}

/// Records admitted from one batch, plus the counts behind them
#[derive(Debug, Default)]
pub struct Admission {
    /// Records to write, at most one per key
    pub rows: Vec<AcceptedRecord>,
    /// Keys never seen before
    pub new: u64,
    /// Exact duplicates dropped
    pub duplicates: u64,
    /// Conflicting versions seen (kept or overwritten)
    pub conflicts: u64,
    /// Conflicts resolved in favour of the incoming record
    pub overwritten: u64,
    fingerprints: Vec<(NaturalKey, RowFingerprint)>,
    reservation: Option<Reservation>,
}

impl Admission {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Natural-key index shared by all workers of a run
///
/// `stored` only ever holds keys known to be in the destination. Keys whose
/// transaction is still open live in a separate in-flight table; a worker
/// that meets one waits for that transaction to settle and then decides
/// against what actually landed.
pub struct Deduplicator {
    destination: Arc<dyn Destination>,
    policy: ConflictPolicy,
    stored: Mutex<HashMap<NaturalKey, RowFingerprint>>,
    in_flight: Arc<StdMutex<InFlight>>,
    next_id: AtomicU64,
}

impl Deduplicator {
    /// Create a deduplicator backed by `destination`
    pub fn new(destination: Arc<dyn Destination>, policy: ConflictPolicy) -> Self {
        Self {
            destination,
            policy,
            stored: Mutex::new(HashMap::new()),
            in_flight: Arc::new(StdMutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Active conflict policy
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Stored keys currently indexed
    pub async fn len(&self) -> usize {
        self.stored.lock().await.len()
    }

    /// Whether the index is empty
    pub async fn is_empty(&self) -> bool {
        self.stored.lock().await.is_empty()
    }

    /// Keys whose transaction has not settled yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Classify a single record against stored keys, without reserving it
    ///
    /// # Errors
    ///
    /// Returns an error if the destination lookup fails.
    pub async fn check(&self, record: &AcceptedRecord) -> Result<DedupOutcome> {
        let mut stored = self.stored.lock().await;
        if !stored.contains_key(&record.key) {
            if let Some(found) = self.destination.lookup(&record.key).await? {
                stored.insert(record.key.clone(), found);
            }
        }
        Ok(resolve(
            self.policy,
            stored.get(&record.key),
            &RowFingerprint::from(record),
        ))
    }

    fn wait_handle(&self, records: &[AcceptedRecord]) -> Option<watch::Receiver<()>> {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .iter()
            .find_map(|r| in_flight.get(&r.key).map(|(_, settled)| settled.clone()))
    }

    fn reserve(&self, keys: Vec<NaturalKey>) -> Reservation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (settled, waiter) = watch::channel(());
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &keys {
            in_flight.insert(key.clone(), (id, waiter.clone()));
        }
        Reservation {
            id,
            keys,
            in_flight: self.in_flight.clone(),
            _settled: settled,
        }
    }

    /// Decide every record in a batch and reserve the keys that will be written
    ///
    /// If another worker's transaction holds one of the batch's keys, this
    /// waits for it to settle first, so a key is only ever a duplicate of
    /// something stored. Once the write commits, hand the admission to
    /// [`Deduplicator::confirm`]; dropping it instead frees the keys unwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination lookup fails; nothing is reserved.
    pub async fn admit(&self, records: Vec<AcceptedRecord>) -> Result<Admission> {
        loop {
            let mut stored = self.stored.lock().await;

            if let Some(mut settled) = self.wait_handle(&records) {
                drop(stored);
                tracing::trace!("Key held by an open transaction, waiting");
                // Resolves when the holder's reservation is dropped
                let _ = settled.changed().await;
                continue;
            }

            let mut unknown = HashSet::new();
            let missing: Vec<NaturalKey> = records
                .iter()
                .filter(|r| !stored.contains_key(&r.key) && unknown.insert(r.key.clone()))
                .map(|r| r.key.clone())
                .collect();
            if !missing.is_empty() {
                stored.extend(self.destination.lookup_many(&missing).await?);
            }

            let mut admission = Admission::default();
            let mut batch: HashMap<NaturalKey, (usize, RowFingerprint)> = HashMap::new();

            for record in records {
                let incoming = RowFingerprint::from(&record);
                let current = batch
                    .get(&record.key)
                    .map(|(_, fingerprint)| fingerprint)
                    .or_else(|| stored.get(&record.key));

                match resolve(self.policy, current, &incoming) {
                    DedupOutcome::Duplicate => {
                        admission.duplicates += 1;
                        continue;
                    }
                    DedupOutcome::Conflict { overwrite: false } => {
                        admission.conflicts += 1;
                        tracing::debug!(key = %record.key, policy = %self.policy, "Conflict kept stored version");
                        continue;
                    }
                    DedupOutcome::Conflict { overwrite: true } => {
                        admission.conflicts += 1;
                        admission.overwritten += 1;
                        tracing::debug!(key = %record.key, "Conflict resolved by newer revision");
                    }
                    DedupOutcome::New => admission.new += 1,
                }

                match batch.get_mut(&record.key) {
                    Some((pos, fingerprint)) => {
                        admission.rows[*pos] = record;
                        *fingerprint = incoming;
                    }
                    None => {
                        batch.insert(record.key.clone(), (admission.rows.len(), incoming));
                        admission.rows.push(record);
                    }
                }
            }

            if !batch.is_empty() {
                let keys = batch.keys().cloned().collect();
                admission.reservation = Some(self.reserve(keys));
                admission.fingerprints = batch
                    .into_iter()
                    .map(|(key, (_, fingerprint))| (key, fingerprint))
                    .collect();
            }

            return Ok(admission);
        }
    }

    /// Record that an admission's rows are stored and free its keys
    ///
    /// `refused` is the number of rows the destination kept a newer version
    /// for. When it is non-zero the admission's keys are evicted instead, so
    /// the next sighting reads the destination again.
    pub async fn confirm(&self, mut admission: Admission, refused: u64) {
        let mut stored = self.stored.lock().await;
        for (key, fingerprint) in admission.fingerprints.drain(..) {
            if refused > 0 {
                stored.remove(&key);
            } else {
                stored.insert(key, fingerprint);
            }
        }
        // Released while the index is still locked
        drop(admission.reservation.take());
    }
}
