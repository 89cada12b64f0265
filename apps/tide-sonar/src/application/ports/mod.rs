//! Port Interfaces
//!
//! Contracts between the application services and the adapters in the
//! infrastructure layer.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SnapshotSource`: blocking fetch of the current market snapshot
//! - `AlertPublisher`: single-alert relay to an external fan-out channel
//! - `BaselineProvider`: historical volume-per-bar lookup
//! - `BroadcastPort`: batch publish to live subscribers with replay cache

use chrono::NaiveDateTime;

use crate::domain::market::{Alert, InstrumentTick};

// =============================================================================
// Snapshot Source
// =============================================================================

/// Errors raised while fetching a snapshot. All of them are transient from
/// the producer's point of view: the cycle is treated as empty and retried.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network or timeout failure talking to the vendor.
    #[error("transport error: {0}")]
    Transport(String),

    /// Vendor answered with a non-success status.
    #[error("vendor returned HTTP {0}")]
    Status(u16),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// No instruments to fetch.
    #[error("instrument universe is empty")]
    EmptyUniverse,

    /// The fetch was abandoned on shutdown.
    #[error("snapshot fetch cancelled")]
    Cancelled,

    /// Every request in the fetch failed.
    #[error("all {batches} snapshot batches failed")]
    AllBatchesFailed {
        /// Number of batches attempted.
        batches: usize,
    },
}

/// Source of full-universe snapshots.
///
/// Implementations may block for seconds (batched HTTP with rate limiting);
/// the producer always calls them from the blocking worker pool.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the latest tick for every instrument in the universe.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` when no usable snapshot could be obtained.
    fn fetch_snapshot(&self) -> Result<Vec<InstrumentTick>, FetchError>;

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

// =============================================================================
// Alert Publisher
// =============================================================================

/// Errors raised while relaying a single alert.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Alert could not be serialized.
    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),

    /// The channel rejected the message.
    #[error("relay transport error: {0}")]
    Transport(String),
}

/// External fan-out channel the monitor writes individual alerts to.
#[cfg_attr(test, mockall::automock)]
pub trait AlertPublisher: Send + Sync {
    /// Relay one alert.
    ///
    /// # Errors
    ///
    /// Returns `PublishError` if the alert could not be handed to the channel.
    fn publish(&self, alert: &Alert) -> Result<(), PublishError>;
}

// =============================================================================
// Baseline Provider
// =============================================================================

/// Historical average volume per bar.
pub trait BaselineProvider: Send + Sync {
    /// Average volume per bar for `code`, or
    /// [`UNKNOWN_BASELINE`](crate::domain::detection::UNKNOWN_BASELINE).
    fn get(&self, code: &str) -> f64;
}

// =============================================================================
// Broadcast Port
// =============================================================================

/// Outcome of fanning frames out to subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Frames in the published batch.
    pub frames: usize,
    /// Connections the batch was offered to.
    pub connections: usize,
    /// Frames enqueued successfully (across all connections).
    pub delivered: usize,
    /// Frames that could not be enqueued (full or closed queues).
    pub failed: usize,
}

/// Subscriber-facing broadcast with a last-batch cache.
pub trait BroadcastPort: Send + Sync {
    /// Number of live subscriber connections.
    fn subscriber_count(&self) -> usize;

    /// Whether a batch has been cached.
    fn has_data(&self) -> bool;

    /// Whether the cached batch predates today's close while `now` is past it.
    fn is_stale(&self, now: NaiveDateTime) -> bool;

    /// Replace the cached batch and push it to every subscriber.
    fn publish(&self, batch: &[Alert], at: NaiveDateTime) -> FanOutReport;
}
