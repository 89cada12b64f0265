//! Connection Registry
//!
//! Tracks live WebSocket subscribers and the last published batch so late
//! joiners can be brought up to date.
//!
//! # Architecture
//!
//! Each connection owns a bounded `mpsc` queue of pre-encoded JSON frames;
//! the registry only ever `try_send`s into it, so a slow client can fill its
//! own queue but never stalls the producer. A full or closed queue counts as
//! a failed delivery for that frame and the connection stays registered
//! until its socket task unregisters it.
//!
//! # Ordering
//!
//! `register` replays the cached batch and inserts the connection while
//! holding the cache lock, and `publish` replaces the cache and fans out
//! under the same lock. A subscriber therefore sees the replay strictly
//! before any newer batch, with nothing lost or duplicated in between.
//! Locks are always taken cache first, then connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::application::ports::{BroadcastPort, FanOutReport};
use crate::domain::market::Alert;
use crate::domain::schedule::CLOSE;
use crate::infrastructure::metrics;

/// One encoded alert, shared across every subscriber queue.
pub type Frame = Arc<str>;

/// Sending half of a subscriber queue.
pub type FrameSender = mpsc::Sender<Frame>;

// =============================================================================
// Connection Identity
// =============================================================================

/// Opaque identifier of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Default)]
struct CachedBatch {
    frames: Vec<Frame>,
    updated_at: Option<NaiveDateTime>,
}

/// Point-in-time registry counters for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Live connections.
    pub subscribers: usize,
    /// Frames in the cached batch.
    pub cached_frames: usize,
    /// When the cached batch was published (exchange-local).
    pub last_updated: Option<NaiveDateTime>,
}

/// Live subscribers plus the last published batch.
#[derive(Debug)]
pub struct ConnectionRegistry {
    close_time: NaiveTime,
    cache: Mutex<CachedBatch>,
    connections: Mutex<HashMap<ConnectionId, FrameSender>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(CLOSE)
    }
}

impl ConnectionRegistry {
    /// Create an empty registry that treats `close_time` as the daily close.
    #[must_use]
    pub fn new(close_time: NaiveTime) -> Self {
        Self {
            close_time,
            cache: Mutex::new(CachedBatch::default()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Register a subscriber queue and replay the cached batch into it.
    ///
    /// Replay frames that do not fit in the queue are dropped for this
    /// subscriber only.
    pub fn register(&self, tx: FrameSender) -> ConnectionId {
        let id = ConnectionId::new();
        let cache = self.cache.lock();

        let mut replayed = 0usize;
        for frame in &cache.frames {
            if tx.try_send(Arc::clone(frame)).is_err() {
                break;
            }
            replayed += 1;
        }
        let dropped = cache.frames.len() - replayed;

        let subscribers = {
            let mut connections = self.connections.lock();
            connections.insert(id, tx);
            connections.len()
        };
        drop(cache);

        metrics::set_subscribers(subscribers);
        if dropped > 0 {
            metrics::record_frames_dropped(dropped as u64);
            tracing::warn!(connection = %id, replayed, dropped, "Replay truncated by queue capacity");
        }
        tracing::info!(connection = %id, replayed, subscribers, "Subscriber registered");
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let (removed, subscribers) = {
            let mut connections = self.connections.lock();
            let removed = connections.remove(&id).is_some();
            (removed, connections.len())
        };
        if removed {
            metrics::set_subscribers(subscribers);
            tracing::info!(connection = %id, subscribers, "Subscriber unregistered");
        }
        removed
    }

    /// Replace the cached batch and push every frame to every subscriber.
    pub fn publish(&self, batch: &[Alert], at: NaiveDateTime) -> FanOutReport {
        let frames: Vec<Frame> = batch
            .iter()
            .filter_map(|alert| match serde_json::to_string(alert) {
                Ok(json) => Some(Frame::from(json)),
                Err(e) => {
                    tracing::warn!(code = %alert.code, error = %e, "Failed to encode alert, skipping");
                    None
                }
            })
            .collect();

        let mut cache = self.cache.lock();
        cache.frames.clone_from(&frames);
        cache.updated_at = Some(at);
        let report = self.fan_out(&frames);
        drop(cache);

        tracing::debug!(
            frames = report.frames,
            connections = report.connections,
            delivered = report.delivered,
            failed = report.failed,
            "Batch published"
        );
        report
    }

    /// Push a single pre-encoded frame to every subscriber without touching
    /// the cache.
    pub fn relay(&self, frame: &Frame) -> FanOutReport {
        let _cache = self.cache.lock();
        self.fan_out(std::slice::from_ref(frame))
    }

    fn fan_out(&self, frames: &[Frame]) -> FanOutReport {
        let connections = self.connections.lock();
        let mut report = FanOutReport {
            frames: frames.len(),
            connections: connections.len(),
            ..FanOutReport::default()
        };

        for (id, tx) in connections.iter() {
            let mut failed_here = 0usize;
            for frame in frames {
                match tx.try_send(Arc::clone(frame)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_) | TrySendError::Closed(_)) => failed_here += 1,
                }
            }
            if failed_here > 0 {
                report.failed += failed_here;
                tracing::warn!(connection = %id, dropped = failed_here, "Subscriber queue rejected frames");
            }
        }
        drop(connections);

        metrics::record_frames_delivered(report.delivered as u64);
        if report.failed > 0 {
            metrics::record_frames_dropped(report.failed as u64);
        }
        report
    }

    /// Number of live connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether a batch has ever been published.
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.cache.lock().updated_at.is_some()
    }

    /// Whether the cache predates today's close while `now` is already past it.
    #[must_use]
    pub fn is_stale(&self, now: NaiveDateTime) -> bool {
        let close = now.date().and_time(self.close_time);
        if now <= close {
            return false;
        }
        self.cache
            .lock()
            .updated_at
            .is_none_or(|updated| updated < close)
    }

    /// Copy of the cached frames in publish order.
    #[must_use]
    pub fn cached_frames(&self) -> Vec<Frame> {
        self.cache.lock().frames.clone()
    }

    /// When the cached batch was published.
    #[must_use]
    pub fn last_updated(&self) -> Option<NaiveDateTime> {
        self.cache.lock().updated_at
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let cache = self.cache.lock();
        RegistryStats {
            subscribers: self.connections.lock().len(),
            cached_frames: cache.frames.len(),
            last_updated: cache.updated_at,
        }
    }
}

impl BroadcastPort for ConnectionRegistry {
    fn subscriber_count(&self) -> usize {
        Self::subscriber_count(self)
    }

    fn has_data(&self) -> bool {
        Self::has_data(self)
    }

    fn is_stale(&self, now: NaiveDateTime) -> bool {
        Self::is_stale(self, now)
    }

    fn publish(&self, batch: &[Alert], at: NaiveDateTime) -> FanOutReport {
        Self::publish(self, batch, at)
    }
}

// =============================================================================
// Tests
// =============================================================================
