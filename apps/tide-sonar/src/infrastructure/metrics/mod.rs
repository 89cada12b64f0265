//! Prometheus Metrics Module
//!
//! Exposes detector and broadcast metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Screening**: Ticks fetched, rejected by gate, alerts detected
//! - **Producer**: Loop ticks by state, fetch failures, cycle latency
//! - **Broadcast**: Subscriber count, frames delivered and dropped
//! - **Relay**: Alerts the relay channel refused
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::services::ProducerState;
use crate::domain::detection::Rejection;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the already installed handle.
///
/// # Errors
///
/// Returns `BuildError` if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Screening
    describe_counter!(
        "tide_sonar_ticks_fetched_total",
        "Total ticks returned by the snapshot source"
    );
    describe_counter!(
        "tide_sonar_ticks_rejected_total",
        "Total ticks screened out, by gate"
    );
    describe_counter!(
        "tide_sonar_alerts_detected_total",
        "Total alerts produced before ranking"
    );

    // Producer
    describe_counter!(
        "tide_sonar_producer_ticks_total",
        "Producer loop iterations by chosen state"
    );
    describe_counter!(
        "tide_sonar_fetch_failures_total",
        "Snapshot fetches that failed or panicked"
    );
    describe_histogram!(
        "tide_sonar_cycle_duration_seconds",
        "Time to fetch, screen, rank and publish one snapshot"
    );

    // Broadcast
    describe_gauge!(
        "tide_sonar_subscribers",
        "Number of connected WebSocket subscribers"
    );
    describe_counter!(
        "tide_sonar_frames_delivered_total",
        "Alert frames enqueued to subscribers"
    );
    describe_counter!(
        "tide_sonar_frames_dropped_total",
        "Alert frames dropped on full or closed subscriber queues"
    );

    // Relay
    describe_counter!(
        "tide_sonar_alerts_relayed_total",
        "Alerts handed to the relay channel"
    );
    describe_counter!(
        "tide_sonar_relay_failures_total",
        "Alerts the relay channel refused"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record ticks returned by a snapshot fetch.
pub fn record_ticks_fetched(count: u64) {
    counter!("tide_sonar_ticks_fetched_total").increment(count);
}

/// Record a tick screened out by one of the gates.
pub fn record_tick_rejected(rejection: Rejection) {
    counter!(
        "tide_sonar_ticks_rejected_total",
        "gate" => rejection.as_str()
    )
    .increment(1);
}

/// Record alerts produced by one screening pass.
pub fn record_alerts_detected(count: u64) {
    counter!("tide_sonar_alerts_detected_total").increment(count);
}

/// Record one producer loop iteration.
pub fn record_producer_tick(state: ProducerState) {
    counter!(
        "tide_sonar_producer_ticks_total",
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record a failed snapshot fetch.
pub fn record_fetch_failure(source: &'static str) {
    counter!(
        "tide_sonar_fetch_failures_total",
        "source" => source
    )
    .increment(1);
}

/// Record the duration of a fetch cycle.
pub fn record_cycle_duration(duration: Duration) {
    histogram!("tide_sonar_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Update the subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("tide_sonar_subscribers").set(count as f64);
}

/// Record frames enqueued to subscribers.
pub fn record_frames_delivered(count: u64) {
    counter!("tide_sonar_frames_delivered_total").increment(count);
}

/// Record frames that could not be enqueued.
pub fn record_frames_dropped(count: u64) {
    counter!("tide_sonar_frames_dropped_total").increment(count);
}

/// Record alerts handed to the relay channel.
pub fn record_alerts_relayed(count: u64) {
    counter!("tide_sonar_alerts_relayed_total").increment(count);
}

/// Record alerts the relay refused.
pub fn record_relay_failures(count: u64) {
    counter!("tide_sonar_relay_failures_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================
