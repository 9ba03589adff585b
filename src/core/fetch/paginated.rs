//! Offset-paginated fetching
//!
//! Pages are requested at increasing offsets until the source returns an
//! empty page. The total count is never assumed, so a short page does not
//! end the unit.

use super::{RecordChunk, RecordStream};
use crate::domain::{RawRecord, SieveError, SourceError, WorkUnit};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Something that can return one page of rows for a unit
#[async_trait]
pub trait PageClient: Send + Sync {
    /// Fetch up to `limit` rows starting at `offset`
    ///
    /// # Errors
    ///
    /// Transient errors ([`SourceError::is_transient`]) cost one page; any
    /// other error fails the unit.
    async fn fetch_page(
        &self,
        unit: &WorkUnit,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Vec<Value>, SourceError>;
}

/// Pagination settings
#[derive(Debug, Clone)]
pub struct PaginationOptions {
    /// Rows requested per page
    pub page_size: usize,
    /// Timeout for a single page call
    pub page_timeout: Duration,
    /// Consecutive lost pages tolerated before the unit fails
    pub max_consecutive_failures: usize,
}

struct PageState {
    client: Arc<dyn PageClient>,
    unit: WorkUnit,
    options: PaginationOptions,
    offset: u64,
    sequence: u64,
    consecutive_failures: usize,
    done: bool,
}

/// Stream a unit page by page
///
/// Each page becomes one chunk. A lost page becomes a chunk with `lost = 1`
/// and the offset moves past it.
pub fn paginate(
    client: Arc<dyn PageClient>,
    unit: WorkUnit,
    options: PaginationOptions,
) -> RecordStream {
    let state = PageState {
        client,
        unit,
        options,
        offset: 0,
        sequence: 0,
        consecutive_failures: 0,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        let call = st
            .client
            .fetch_page(&st.unit, st.offset, st.options.page_size);
        let outcome = match tokio::time::timeout(st.options.page_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(format!(
                "page at offset {} exceeded {}s",
                st.offset,
                st.options.page_timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(rows) if rows.is_empty() => {
                tracing::debug!(unit = %st.unit.id, offset = st.offset, "Empty page, unit exhausted");
                None
            }
            Ok(rows) => {
                st.consecutive_failures = 0;
                st.offset += rows.len() as u64;

                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    records.push(RawRecord::from_value(st.unit.id.clone(), st.sequence, row));
                    st.sequence += 1;
                }

                tracing::trace!(unit = %st.unit.id, offset = st.offset, count = records.len(), "Fetched page");
                Some((Ok(RecordChunk { records, lost: 0 }), st))
            }
            Err(e) if e.is_transient() => {
                st.consecutive_failures += 1;
                if st.consecutive_failures >= st.options.max_consecutive_failures {
                    st.done = true;
                    let err = SourceError::TooManyFailures {
                        failures: st.consecutive_failures,
                        last_error: e.to_string(),
                    };
                    return Some((Err(SieveError::from(err)), st));
                }

                tracing::warn!(
                    unit = %st.unit.id,
                    offset = st.offset,
                    error = %e,
                    "Page lost, skipping"
                );
                st.offset += st.options.page_size as u64;
                Some((Ok(RecordChunk::lost(1)), st))
            }
            Err(e) => {
                st.done = true;
                Some((Err(SieveError::from(e)), st))
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves fixed page sizes, then empty pages; optional scripted failures
    struct ScriptedPages {
        sizes: Vec<usize>,
        failures: Mutex<Vec<(u64, SourceError)>>,
        calls: AtomicUsize,
    }

    impl ScriptedPages {
        fn new(sizes: Vec<usize>) -> Self {
            Self {
                sizes,
                failures: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn fail_at(self, offset: u64, error: SourceError) -> Self {
            self.failures.lock().unwrap().push((offset, error));
            self
        }
    }

    #[async_trait]
    impl PageClient for ScriptedPages {
        async fn fetch_page(
            &self,
            _unit: &WorkUnit,
            offset: u64,
            limit: usize,
        ) -> std::result::Result<Vec<Value>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(pos) = failures.iter().position(|(o, _)| *o == offset) {
                    return Err(failures.remove(pos).1);
                }
            }

            let page = (offset / limit as u64) as usize;
            let size = self.sizes.get(page).copied().unwrap_or(0);
            Ok((0..size)
                .map(|i| json!({ "id": offset + i as u64 }))
                .collect())
        }
    }

    fn unit() -> WorkUnit {
        WorkUnit::partition("works").unwrap()
    }

    fn options() -> PaginationOptions {
        PaginationOptions {
            page_size: 100,
            page_timeout: Duration::from_secs(5),
            max_consecutive_failures: 3,
        }
    }

    #[tokio::test]
    async fn test_stops_on_first_empty_page() {
        let client = Arc::new(ScriptedPages::new(vec![100, 100, 37]));
        let chunks: Vec<_> = paginate(client.clone(), unit(), options()).collect().await;

        let total: usize = chunks.iter().map(|c| c.as_ref().unwrap().records.len()).sum();
        assert_eq!(total, 237);
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_sequences_are_contiguous() {
        let client = Arc::new(ScriptedPages::new(vec![100, 20]));
        let chunks: Vec<_> = paginate(client, unit(), options()).collect().await;
        let sequences: Vec<u64> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().records)
            .map(|r| r.sequence)
            .collect();
        assert_eq!(sequences, (0..120).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_transient_page_is_skipped_and_counted() {
        let client = Arc::new(
            ScriptedPages::new(vec![100, 100, 100])
                .fail_at(100, SourceError::ServerError {
                    status: 503,
                    message: "busy".to_string(),
                }),
        );
        let chunks: Vec<_> = paginate(client, unit(), options()).collect().await;
        let chunks: Vec<RecordChunk> = chunks.into_iter().map(|c| c.unwrap()).collect();

        let records: usize = chunks.iter().map(|c| c.records.len()).sum();
        let lost: u64 = chunks.iter().map(|c| c.lost).sum();
        assert_eq!(records, 200);
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_escalate() {
        let client = Arc::new(
            ScriptedPages::new(vec![100, 100, 100, 100])
                .fail_at(0, SourceError::Timeout("t".to_string()))
                .fail_at(100, SourceError::Timeout("t".to_string()))
                .fail_at(200, SourceError::Timeout("t".to_string())),
        );
        let chunks: Vec<_> = paginate(client, unit(), options()).collect().await;

        assert_eq!(chunks.len(), 3);
        assert!(matches!(
            chunks.last().unwrap(),
            Err(SieveError::Source(SourceError::TooManyFailures { failures: 3, .. }))
        ));
    }

    #[tokio::test]
    async fn test_fatal_error_ends_stream() {
        let client = Arc::new(ScriptedPages::new(vec![100, 100]).fail_at(
            100,
            SourceError::ClientError {
                status: 401,
                message: "unauthorized".to_string(),
            },
        ));
        let chunks: Vec<_> = paginate(client, unit(), options()).collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
    }

    struct NeverAnswers;

    #[async_trait]
    impl PageClient for NeverAnswers {
        async fn fetch_page(
            &self,
            _unit: &WorkUnit,
            _offset: u64,
            _limit: usize,
        ) -> std::result::Result<Vec<Value>, SourceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_page_timeout_counts_as_transient() {
        let options = PaginationOptions {
            page_size: 10,
            page_timeout: Duration::from_millis(10),
            max_consecutive_failures: 2,
        };
        let chunks: Vec<_> = paginate(Arc::new(NeverAnswers), unit(), options)
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].as_ref().unwrap().lost, 1);
        assert!(chunks[1].is_err());
    }
}
