//! Alert Relay Channel
//!
//! In-process pub/sub topic that every detected alert is written to before
//! ranking. Consumers subscribe to the topic; the optional bridge forwards
//! each relayed alert straight to the WebSocket subscribers as it is found.
//!
//! Delivery is fire-and-forget: with no subscribers a message is simply
//! dropped, and lagging subscribers lose the oldest messages.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AlertPublisher, PublishError};
use crate::domain::market::Alert;
use crate::infrastructure::broadcast::{ConnectionRegistry, Frame};

/// Default relay topic name.
pub const DEFAULT_TOPIC: &str = "stock_alerts";

/// Default number of messages buffered per relay subscriber.
pub const DEFAULT_CAPACITY: usize = 4_096;

/// Named broadcast topic carrying JSON-encoded alerts.
#[derive(Debug, Clone)]
pub struct AlertRelay {
    topic: String,
    tx: broadcast::Sender<Frame>,
}

impl AlertRelay {
    /// Create a relay topic buffering up to `capacity` messages per receiver.
    #[must_use]
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Subscribe to the topic.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.tx.subscribe()
    }

    /// Topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl AlertPublisher for AlertRelay {
    fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        // No receivers is not an error for a pub/sub topic.
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }
        let frame = Frame::from(serde_json::to_string(alert)?);
        let _ = self.tx.send(frame);
        Ok(())
    }
}

/// Forward relayed alerts to WebSocket subscribers until cancelled or the
/// topic closes.
pub async fn run_bridge(
    mut rx: broadcast::Receiver<Frame>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
) {
    tracing::info!("Relay bridge started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(frame) => {
                    registry.relay(&frame);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Relay bridge lagged, alerts skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    tracing::info!("Relay bridge stopped");
}

// =============================================================================
// Tests
// =============================================================================
