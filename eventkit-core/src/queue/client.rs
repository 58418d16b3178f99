//! HTTP transport for the ingestion endpoint
//!
//! POSTs [`EventBatch`] bodies to `<endpoint>/event` and matches the
//! per-event statuses in the response. With compression enabled the request
//! body is gzip-encoded and sent with `Content-Encoding: gzip`.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};

use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::settings::ClientConfig;

use super::events::{BatchOutcome, EventBatch};

/// Delivers one batch to the endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &EventBatch) -> Result<BatchOutcome>;
}

/// HTTP client for the ingestion endpoint
pub struct HttpTransport {
    http_client: reqwest::Client,
    event_url: String,
    max_retries: usize,
    compress: bool,
}

impl HttpTransport {
    /// Create a new transport from a client snapshot and queue tuning
    pub fn new(client: &ClientConfig, queue: &QueueConfig) -> Result<Self> {
        let base_url = client.api_endpoint.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("api endpoint is empty".to_string()));
        }

        // Build default headers
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-TD-Data-Type", HeaderValue::from_static("k"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eventkit/{}", crate::VERSION))
                .map_err(|e| Error::Config(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            "X-TD-Write-Key",
            HeaderValue::from_str(&client.api_key)
                .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
        );

        if client.encryption_key.is_some() {
            tracing::debug!("Encryption key configured; payloads are sent over TLS only");
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(queue.timeout_secs))
            .default_headers(headers)
            .gzip(client.compression_enabled)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            event_url: format!("{}/event", base_url),
            max_retries: queue.max_retries,
            compress: client.compression_enabled,
        })
    }

    /// Serialize a batch body, gzipped when compression is on
    fn encode_body(&self, batch: &EventBatch) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(batch.body())?;
        if !self.compress {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&json)?;
        Ok(encoder.finish()?)
    }

    /// Send a batch once
    pub async fn send_events(&self, batch: &EventBatch) -> Result<BatchOutcome> {
        let mut request = self.http_client.post(&self.event_url);
        if self.compress {
            request = request.header(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        let response = request
            .body(self.encode_body(batch)?)
            .send()
            .await
            .map_err(|e| Error::Network(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            let body: serde_json::Value =
                response
                    .json()
                    .await
                    .map_err(|e| Error::ServerResponse {
                        status: status.as_u16(),
                        message: format!("failed to parse response: {}", e),
                    })?;
            Ok(batch.outcome(&body))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(Error::ServerResponse {
                status: status.as_u16(),
                message: error_text,
            })
        }
    }

    /// Send a batch with retry logic
    ///
    /// Retries transient failures (5xx, timeouts) with exponential backoff.
    pub async fn send_events_with_retry(&self, batch: &EventBatch) -> Result<BatchOutcome> {
        let mut delay = Duration::from_millis(500);
        let mut attempt = 0;

        loop {
            match self.send_events(batch).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_retries = self.max_retries,
                        "Transient error uploading events, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &EventBatch) -> Result<BatchOutcome> {
        self.send_events_with_retry(batch).await
    }
}
