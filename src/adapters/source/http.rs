//! Paginated HTTP source
//!
//! Each work unit is a date range. Pages are requested with
//! `from`/`to`/`offset`/`limit` query parameters (names configurable) and
//! the rows are read from a JSON pointer into the response body.

use super::Source;
use crate::config::{HttpSourceConfig, RetryConfig};
use crate::core::enumerate::date_range_units;
use crate::core::fetch::{paginate, FetchOptions, PageClient, PaginationOptions, RecordStream};
use crate::domain::{Result, SieveError, SourceError, UnitDescriptor, WorkUnit};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, ClientBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Backoff before retry number `attempt` (1-based)
pub fn backoff_delay(retry: &RetryConfig, attempt: usize) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32) as i32;
    let delay = retry.initial_delay_ms as f64 * retry.backoff_multiplier.powi(exponent);
    delay.min(retry.max_delay_ms as f64) as u64
}

/// Fetches single pages over HTTP with retry
pub struct HttpPageClient {
    client: Client,
    config: HttpSourceConfig,
}

impl HttpPageClient {
    /// Build the HTTP client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TLS backend cannot be set up.
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("sieve/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SieveError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Build authorization header value
    fn auth_header_value(&self) -> Option<String> {
        if let Some(token) = &self.config.api_token {
            Some(format!("Bearer {}", token.expose_secret().as_ref()))
        } else if let (Some(username), Some(password)) =
            (&self.config.username, &self.config.password)
        {
            let credentials = format!("{}:{}", username, password.expose_secret().as_ref());
            let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
            Some(format!("Basic {encoded}"))
        } else {
            None
        }
    }

    fn query_for(
        &self,
        unit: &WorkUnit,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Vec<(String, String)>, SourceError> {
        let (from, to) = match &unit.descriptor {
            UnitDescriptor::DateRange { from, to } => (*from, *to),
            other => {
                return Err(SourceError::ClientError {
                    status: 0,
                    message: format!("unit {} is not a date range: {:?}", unit.id, other),
                })
            }
        };

        let mut query: Vec<(String, String)> = self
            .config
            .extra_query
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.push((self.config.from_param.clone(), from.format("%Y-%m-%d").to_string()));
        query.push((self.config.to_param.clone(), to.format("%Y-%m-%d").to_string()));
        query.push((self.config.offset_param.clone(), offset.to_string()));
        query.push((self.config.limit_param.clone(), limit.to_string()));
        Ok(query)
    }

    async fn request_page(
        &self,
        query: &[(String, String)],
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let mut request = self.client.get(&self.config.base_url).query(query);
        if let Some(auth) = self.auth_header_value() {
            request = request.header("Authorization", auth);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(e.to_string())
            } else {
                SourceError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                SourceError::ServerError {
                    status: status.as_u16(),
                    message,
                }
            } else {
                SourceError::ClientError {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::InvalidResponse(format!("Failed to parse page: {e}")))?;
        extract_rows(body, &self.config.results_pointer)
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, T, Fut>(&self, operation: F) -> std::result::Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, SourceError>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || attempt >= retry.max_retries {
                        return Err(e);
                    }

                    let delay_ms = backoff_delay(retry, attempt);
                    crate::log_retry_attempt!(attempt, retry.max_retries, e);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
}

fn extract_rows(body: Value, pointer: &str) -> std::result::Result<Vec<Value>, SourceError> {
    let rows = if pointer.is_empty() {
        body
    } else {
        body.pointer(pointer).cloned().ok_or_else(|| {
            SourceError::InvalidResponse(format!("response has no '{}' field", pointer))
        })?
    };

    match rows {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(SourceError::InvalidResponse(format!(
            "expected an array of rows, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl PageClient for HttpPageClient {
    async fn fetch_page(
        &self,
        unit: &WorkUnit,
        offset: u64,
        limit: usize,
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let query = self.query_for(unit, offset, limit)?;
        self.retry_request(|| self.request_page(&query)).await
    }
}

/// Date-partitioned, offset-paginated HTTP API
pub struct HttpSource {
    client: Arc<HttpPageClient>,
    config: HttpSourceConfig,
}

impl HttpSource {
    /// Create the source
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Arc::new(HttpPageClient::new(config.clone())?);
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Source for HttpSource {
    fn name(&self) -> &str {
        "http"
    }

    async fn enumerate(&self) -> Result<Vec<WorkUnit>> {
        Ok(date_range_units(
            self.config.start_date,
            self.config.end_date,
            self.config.partition,
        ))
    }

    fn open(&self, unit: &WorkUnit, options: &FetchOptions) -> Result<RecordStream> {
        if !matches!(unit.descriptor, UnitDescriptor::DateRange { .. }) {
            return Err(SieveError::Validation(format!(
                "HTTP source cannot open unit {}",
                unit.id
            )));
        }

        let pagination = PaginationOptions {
            page_size: self.config.page_size,
            page_timeout: options.page_timeout,
            max_consecutive_failures: self.config.max_consecutive_page_failures,
        };
        let client: Arc<dyn PageClient> = self.client.clone();
        Ok(paginate(client, unit.clone(), pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{secret_string, Partition};
    use chrono::NaiveDate;
    use futures::StreamExt;
    use mockito::Matcher;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config(base_url: String) -> HttpSourceConfig {
        HttpSourceConfig {
            base_url,
            api_token: Some(secret_string("t0ken".to_string())),
            username: None,
            password: None,
            results_pointer: "/results".to_string(),
            page_size: 100,
            offset_param: "offset".to_string(),
            limit_param: "limit".to_string(),
            from_param: "from".to_string(),
            to_param: "to".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            partition: Partition::Month,
            extra_query: BTreeMap::from([("filter".to_string(), "type:article".to_string())]),
            timeout_seconds: 5,
            max_consecutive_page_failures: 1,
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
            },
        }
    }

    fn page(start: usize, count: usize) -> String {
        let rows: Vec<Value> = (start..start + count)
            .map(|i| json!({ "id": format!("W{i}") }))
            .collect();
        json!({ "results": rows, "meta": { "count": 237 } }).to_string()
    }

    fn offset_query(offset: &str) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("offset".into(), offset.into()),
            Matcher::UrlEncoded("limit".into(), "100".into()),
            Matcher::UrlEncoded("from".into(), "2024-01-01".into()),
            Matcher::UrlEncoded("to".into(), "2024-02-01".into()),
            Matcher::UrlEncoded("filter".into(), "type:article".into()),
        ])
    }

    #[test]
    fn test_backoff_delay() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 3.0,
        };
        assert_eq!(backoff_delay(&retry, 1), 100);
        assert_eq!(backoff_delay(&retry, 2), 300);
        assert_eq!(backoff_delay(&retry, 3), 900);
        assert_eq!(backoff_delay(&retry, 4), 1000);
    }

    #[test]
    fn test_extract_rows() {
        assert_eq!(extract_rows(json!({"results": [1, 2]}), "/results").unwrap().len(), 2);
        assert_eq!(extract_rows(json!([1]), "").unwrap().len(), 1);
        assert!(extract_rows(json!({"results": null}), "/results").unwrap().is_empty());
        assert!(extract_rows(json!({"data": []}), "/results").is_err());
        assert!(extract_rows(json!({"results": "x"}), "/results").is_err());
    }

    #[tokio::test]
    async fn test_paginates_until_empty_page() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for (offset, body) in [
            ("0", page(0, 100)),
            ("100", page(100, 100)),
            ("200", page(200, 37)),
            ("237", page(0, 0)),
        ] {
            mocks.push(
                server
                    .mock("GET", "/works")
                    .match_query(offset_query(offset))
                    .match_header("authorization", "Bearer t0ken")
                    .with_status(200)
                    .with_header("content-type", "application/json")
                    .with_body(body)
                    .expect(1)
                    .create_async()
                    .await,
            );
        }

        let source = HttpSource::new(config(format!("{}/works", server.url()))).unwrap();
        let units = source.enumerate().await.unwrap();
        assert_eq!(units.len(), 1);

        let chunks: Vec<_> = source
            .open(&units[0], &FetchOptions::default())
            .unwrap()
            .collect()
            .await;
        let records: Vec<_> = chunks
            .into_iter()
            .flat_map(|c| c.unwrap().records)
            .collect();

        assert_eq!(records.len(), 237);
        assert_eq!(records[236].field_text("id").as_deref(), Some("W236"));
        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_then_lost() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("busy")
            .expect(2)
            .create_async()
            .await;

        let source = HttpSource::new(config(format!("{}/works", server.url()))).unwrap();
        let unit = source.enumerate().await.unwrap().remove(0);
        let chunks: Vec<_> = source
            .open(&unit, &FetchOptions::default())
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(
            &chunks[0],
            Err(SieveError::Source(SourceError::TooManyFailures { .. }))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_error_fails_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/works")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let source = HttpSource::new(config(format!("{}/works", server.url()))).unwrap();
        let unit = source.enumerate().await.unwrap().remove(0);
        let chunks: Vec<_> = source
            .open(&unit, &FetchOptions::default())
            .unwrap()
            .collect()
            .await;

        assert!(matches!(
            &chunks[0],
            Err(SieveError::Source(SourceError::ClientError { status: 404, .. }))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut cfg = config("http://localhost".to_string());
        cfg.api_token = None;
        cfg.username = Some("user".to_string());
        cfg.password = Some(secret_string("pass".to_string()));
        let client = HttpPageClient::new(cfg).unwrap();
        assert_eq!(client.auth_header_value().as_deref(), Some("Basic dXNlcjpwYXNz"));
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_units() {
        let source = HttpSource::new(config("http://localhost".to_string())).unwrap();
        let unit = WorkUnit::partition("not-a-range").unwrap();
        assert!(source.open(&unit, &FetchOptions::default()).is_err());
    }
}
