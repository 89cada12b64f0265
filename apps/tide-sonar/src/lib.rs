#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_precision_loss
    )
)]

//! Tide Sonar - Volume Anomaly Detector
//!
//! Polls a snapshot of the tracked equity universe while the exchange is in
//! session, flags instruments trading far above their usual volume, and
//! pushes ranked alerts to dashboard clients over WebSocket.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market types and detection rules
//!   - `market`: Ticks, alerts, and category tags
//!   - `schedule`: Session hours and the market-open gate
//!   - `detection`: Turnover floors, volume ratio, batch ranking
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Snapshot source, relay, baseline, and broadcast interfaces
//!   - `services`: Anomaly monitor and the producer loop
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `source`: Vendor HTTP and simulated snapshot sources
//!   - `baseline`: Average volume file store
//!   - `relay`: In-process alert topic
//!   - `broadcast`: Subscriber registry with replay
//!   - `server`: WebSocket alert endpoint
//!   - `config`, `health`, `metrics`, `telemetry`: process plumbing
//!
//! # Data Flow
//!
//! ```text
//! Snapshot source ──► Anomaly monitor ──► Relay topic ──(bridge)──┐
//!                          │                                      ▼
//!                          └──► rank top N ──► Registry ──► WS client 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market types and detection rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::detection::{DetectionThresholds, Rejection, rank_batch, screen, volume_ratio};
pub use domain::market::{Alert, Category, InstrumentTick};
pub use domain::schedule::{MarketSchedule, SessionHours};

// Services
pub use application::services::{
    AnomalyMonitor, CycleReport, ProducerConfig, ProducerLoop, ProducerState, ProducerStatus,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, SonarConfig, SourceKind};

// Broadcast registry and WebSocket server (for integration tests)
pub use infrastructure::broadcast::{ConnectionId, ConnectionRegistry, Frame};
pub use infrastructure::server::{AlertServer, ServerError};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
