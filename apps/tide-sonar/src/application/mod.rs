//! Application Layer - Use cases and port definitions.
//!
//! The anomaly monitor and the producer loop live here, written against the
//! port traits so the snapshot source, relay channel, baseline store and
//! connection registry can be swapped in tests.

/// Port interfaces for external systems (snapshot source, relay, broadcast).
pub mod ports;

/// Anomaly detection and the polling producer loop.
pub mod services;
