//! Vendor HTTP Snapshot Source
//!
//! Polls the vendor's batch quote endpoint for every instrument in the
//! universe:
//!
//! ```text
//! GET {base_url}/hsrl/ssjy_more/{license}?stock_codes=600000,000001,...
//! ```
//!
//! Codes are sent in fixed-size batches with a pause between requests to
//! stay under the vendor's rate limit. A failed batch is logged and skipped;
//! the fetch only fails when every batch fails. Cancelling the source's token
//! abandons the remaining batches, including one already in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::quote::ticks_from_records;
use super::universe::Universe;
use crate::application::ports::{FetchError, SnapshotSource};
use crate::domain::market::InstrumentTick;

/// Vendor API base URL.
pub const DEFAULT_BASE_URL: &str = "http://api.biyingapi.com";

/// Codes per request.
pub const DEFAULT_BATCH_SIZE: usize = 15;

/// Pause between batch requests.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for the vendor API.
#[derive(Clone)]
pub struct HttpSourceConfig {
    /// Base URL without trailing slash.
    pub base_url: String,
    /// License key embedded in the request path.
    pub license: String,
    /// Codes per request.
    pub batch_size: usize,
    /// Pause between requests.
    pub batch_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for HttpSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSourceConfig")
            .field("base_url", &self.base_url)
            .field("license", &"[REDACTED]")
            .field("batch_size", &self.batch_size)
            .field("batch_delay", &self.batch_delay)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Snapshot source backed by the vendor's batch quote endpoint.
#[derive(Debug)]
pub struct HttpSnapshotSource {
    client: Client,
    config: HttpSourceConfig,
    universe: Arc<Universe>,
    offset: FixedOffset,
    handle: Handle,
    cancel: CancellationToken,
}

impl HttpSnapshotSource {
    /// Create a source for `universe`, stamping ticks in exchange-local time
    /// at `offset`.
    ///
    /// Must be called from within a tokio runtime; fetches are driven on that
    /// runtime from the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Transport` if the HTTP client cannot be built or
    /// no runtime is available.
    pub fn new(
        config: HttpSourceConfig,
        universe: Arc<Universe>,
        offset: FixedOffset,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let handle = Handle::try_current().map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config: HttpSourceConfig {
                batch_size: config.batch_size.max(1),
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            universe,
            offset,
            handle,
            cancel: CancellationToken::new(),
        })
    }

    /// Abandon fetches once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/hsrl/ssjy_more/{}",
            self.config.base_url, self.config.license
        )
    }

    /// Wait out the rate-limit pause, then fetch one batch. `None` when
    /// cancelled first.
    async fn paced_batch(
        &self,
        index: usize,
        url: &str,
        codes: &[&str],
    ) -> Option<Result<Vec<Value>, FetchError>> {
        let request = async {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            self.fetch_batch(url, codes).await
        };
        tokio::select! {
            () = self.cancel.cancelled() => None,
            result = request => Some(result),
        }
    }

    async fn fetch_batch(&self, url: &str, codes: &[&str]) -> Result<Vec<Value>, FetchError> {
        let response = self
            .client
            .get(url)
            .query(&[("stock_codes", codes.join(","))])
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch_snapshot(&self) -> Result<Vec<InstrumentTick>, FetchError> {
        if self.universe.is_empty() {
            return Err(FetchError::EmptyUniverse);
        }

        let at = self.local_now();
        let url = self.endpoint();
        let codes: Vec<&str> = self.universe.codes().collect();
        let batches = codes.len().div_ceil(self.config.batch_size);

        let mut ticks = Vec::with_capacity(codes.len());
        let mut failed = 0usize;
        let mut dropped = 0usize;

        for (index, chunk) in codes.chunks(self.config.batch_size).enumerate() {
            if self.cancel.is_cancelled() {
                tracing::debug!(batch = index, batches, "Vendor snapshot abandoned");
                return Err(FetchError::Cancelled);
            }

            let Some(result) = self.handle.block_on(self.paced_batch(index, &url, chunk)) else {
                tracing::debug!(batch = index, batches, "Vendor snapshot abandoned");
                return Err(FetchError::Cancelled);
            };

            match result {
                Ok(records) => {
                    let (batch_ticks, batch_dropped) =
                        ticks_from_records(records, &self.universe, at);
                    ticks.extend(batch_ticks);
                    dropped += batch_dropped;
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(batch = index, codes = chunk.len(), error = %e, "Quote batch failed");
                }
            }
        }

        if failed == batches {
            return Err(FetchError::AllBatchesFailed { batches });
        }

        tracing::debug!(
            batches,
            failed,
            dropped,
            ticks = ticks.len(),
            "Vendor snapshot fetched"
        );
        Ok(ticks)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

// =============================================================================
// Tests
// =============================================================================
