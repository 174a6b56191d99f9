//! Forwarding feed records to the ingestion endpoint.
//!
//! # Architecture
//!
//! - [`IngestionSink`]: async trait for anything that accepts a [`FeedRecord`]
//! - [`HttpSink`]: POSTs the record as JSON and classifies the reply
//! - [`RetrySink`]: decorator that retries transient failures with
//!   exponential backoff and jitter
//!
//! The endpoint is the source of truth for idempotency: a reply carrying
//! `"duplicate": true` means the record was already stored. Nothing is
//! remembered locally between runs.
//!
//! # Retry Strategy
//!
//! `HttpSink` never retries. `RetrySink` retries transport errors, HTTP 429
//! and 5xx responses up to `max_retries` times:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use crate::config::Credential;
use crate::models::{FeedRecord, ForwardOutcome};
use crate::utils::truncate_for_log;
use rand::{rng, Rng};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use url::Url;

/// Longest sink error body kept in a failure reason.
const MAX_ERROR_BODY: usize = 300;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a record could not be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ForwardError {
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("sink answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl ForwardError {
    /// Whether trying again later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ForwardError::Transport { .. } => true,
            ForwardError::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Destination for feed records.
pub trait IngestionSink {
    /// Deliver one record and report what the sink did with it.
    async fn forward(&self, record: &FeedRecord) -> ForwardOutcome;
}

/// The HTTP ingestion endpoint.
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<Credential>,
}

impl HttpSink {
    /// Build a sink for `endpoint`.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - URL every record is POSTed to
    /// * `token` - Sent as `Authorization: Bearer <token>` when present
    ///
    /// # Returns
    ///
    /// The sink, or the error from building the HTTP client.
    pub fn new(endpoint: Url, token: Option<Credential>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }
}

/// Read the sink's idempotency flag from a successful reply body.
fn is_duplicate_reply(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("duplicate").and_then(serde_json::Value::as_bool))
        .unwrap_or(false)
}

impl IngestionSink for HttpSink {
    #[instrument(level = "debug", skip_all, fields(stock = %record.stock))]
    async fn forward(&self, record: &FeedRecord) -> ForwardOutcome {
        let mut request = self.client.post(self.endpoint.clone()).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.token());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return ForwardOutcome::Failed(ForwardError::Transport {
                    message: e.to_string(),
                });
            }
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return ForwardOutcome::Failed(ForwardError::Transport {
                    message: e.to_string(),
                });
            }
            Err(_) => String::new(),
        };
        debug!(status = status.as_u16(), body = %truncate_for_log(&body, MAX_ERROR_BODY), "Sink replied");

        if !status.is_success() {
            return ForwardOutcome::Failed(ForwardError::Rejected {
                status: status.as_u16(),
                body: truncate_for_log(&body, MAX_ERROR_BODY),
            });
        }
        if is_duplicate_reply(&body) {
            ForwardOutcome::Duplicate
        } else {
            ForwardOutcome::Stored
        }
    }
}

/// Wrapper that retries transient failures of any [`IngestionSink`].
pub struct RetrySink<T> {
    /// The sink each attempt goes to.
    inner: T,
    /// Retries after the first attempt.
    max_retries: usize,
    /// Delay before the first retry (doubles with each attempt).
    base_delay: Duration,
    /// Cap on a single backoff, before jitter.
    max_delay: Duration,
}

impl<T: IngestionSink> RetrySink<T> {
    /// Wrap an existing [`IngestionSink`] with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The sink that performs each attempt
    /// * `max_retries` - Extra attempts after the first; 0 forwards exactly once
    /// * `base_delay` - Delay before the first retry, doubled for each later one
    ///
    /// # Example
    ///
    /// ```ignore
    /// let http = HttpSink::new(endpoint, token)?;
    /// let sink = RetrySink::new(http, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetrySink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySink")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: IngestionSink> IngestionSink for RetrySink<T> {
    async fn forward(&self, record: &FeedRecord) -> ForwardOutcome {
        let mut attempt = 0usize;
        loop {
            match self.inner.forward(record).await {
                ForwardOutcome::Failed(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "forward attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }
}

/// In-memory sink that stores by record key, like the real endpoint.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub posted: std::cell::RefCell<Vec<FeedRecord>>,
    keys: std::cell::RefCell<std::collections::HashSet<(String, String, String, String)>>,
}

#[cfg(test)]
impl IngestionSink for MemorySink {
    async fn forward(&self, record: &FeedRecord) -> ForwardOutcome {
        self.posted.borrow_mut().push(record.clone());
        let (date, source, content) = record.dedup_key();
        if self.keys.borrow_mut().insert((record.stock.clone(), date, source, content)) {
            ForwardOutcome::Stored
        } else {
            ForwardOutcome::Duplicate
        }
    }
}
