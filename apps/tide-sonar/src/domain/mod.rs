//! Domain Layer - Market data types and detection rules.
//!
//! Pure types and functions with no I/O: instrument ticks and alerts,
//! the exchange session calendar, and the anomaly screening rules.

/// Instrument ticks, alerts, and category tags.
pub mod market;

/// Exchange session hours and the market-open gate.
pub mod schedule;

/// Turnover floors, volume ratio scoring, and batch ranking.
pub mod detection;
