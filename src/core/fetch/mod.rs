//! Batch fetching
//!
//! A work unit is read as a lazy, finite stream of [`RecordChunk`]s. A chunk
//! carries the records that arrived plus how many records or pages were lost
//! to transient errors since the previous chunk. An `Err` item is always
//! fatal for the unit; transient errors never surface as `Err`.
//!
//! Streams are restartable only from the beginning of a unit.

pub mod archive;
pub mod paginated;

use crate::adapters::source::Source;
use crate::domain::{RawRecord, Result, SieveError, SourceError, WorkUnit};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use archive::stream_archive;
pub use paginated::{paginate, PageClient, PaginationOptions};

/// Records that arrived together, plus transient losses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordChunk {
    /// Records in fetch order
    pub records: Vec<RawRecord>,
    /// Records or pages lost to transient errors
    pub lost: u64,
}

impl RecordChunk {
    /// A chunk reporting a single loss and no records
    pub fn lost(count: u64) -> Self {
        Self {
            records: Vec::new(),
            lost: count,
        }
    }
}

/// Lazy sequence of chunks for one unit
pub type RecordStream = BoxStream<'static, Result<RecordChunk>>;

/// Knobs shared by every fetch strategy
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Records per emitted chunk (archive sources)
    pub chunk_size: usize,
    /// Timeout for one page or one chunk of archive entries
    pub page_timeout: Duration,
    /// Stop after this many records
    pub max_records: Option<u64>,
    /// Chunks fetched ahead of the consumer
    pub pipeline_depth: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            page_timeout: Duration::from_secs(120),
            max_records: None,
            pipeline_depth: 4,
        }
    }
}

/// Opens work units on a source and applies caps and read-ahead
pub struct BatchFetcher {
    source: Arc<dyn Source>,
    options: FetchOptions,
}

impl BatchFetcher {
    /// Create a fetcher over a source
    pub fn new(source: Arc<dyn Source>, options: FetchOptions) -> Self {
        Self { source, options }
    }

    /// Fetch options in effect
    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// Open a unit as a lazy record stream
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot open the unit at all; such
    /// errors are fatal for the unit.
    pub fn fetch(&self, unit: &WorkUnit) -> Result<RecordStream> {
        let stream = self.source.open(unit, &self.options)?;
        let stream = match self.options.max_records {
            Some(max) => cap_records(stream, max),
            None => stream,
        };
        Ok(prefetch(stream, self.options.pipeline_depth))
    }
}

/// End the stream once `max` records have been yielded
pub fn cap_records(stream: RecordStream, max: u64) -> RecordStream {
    stream
        .scan(0u64, move |seen, item| {
            if *seen >= max {
                return futures::future::ready(None);
            }
            let item = item.map(|mut chunk| {
                let room = (max - *seen) as usize;
                chunk.records.truncate(room);
                *seen += chunk.records.len() as u64;
                chunk
            });
            futures::future::ready(Some(item))
        })
        .boxed()
}

/// Drive `stream` on its own task, buffering up to `depth` chunks
///
/// The producer stops as soon as the returned stream is dropped.
pub fn prefetch(stream: RecordStream, depth: usize) -> RecordStream {
    let (tx, rx) = mpsc::channel(depth.max(1));

    tokio::spawn(async move {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let fatal = item.is_err();
            if tx.send(item).await.is_err() || fatal {
                break;
            }
        }
    });

    receiver_stream(rx)
}

/// Turn a channel receiver into a record stream
pub(crate) fn receiver_stream(rx: mpsc::Receiver<Result<RecordChunk>>) -> RecordStream {
    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

/// Fail the stream if the next chunk takes longer than `timeout`
pub fn with_chunk_timeout(stream: RecordStream, timeout: Duration, what: String) -> RecordStream {
    stream::unfold(Some(stream), move |state| {
        let what = what.clone();
        async move {
            let mut inner = state?;
            match tokio::time::timeout(timeout, inner.next()).await {
                Ok(Some(item)) => Some((item, Some(inner))),
                Ok(None) => None,
                Err(_) => {
                    let err: SieveError = SourceError::Timeout(format!(
                        "{} produced nothing for {}s",
                        what,
                        timeout.as_secs()
                    ))
                    .into();
                    Some((Err(err), None))
                }
            }
        }
    })
    .boxed()
}
