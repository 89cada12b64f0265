//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the port interfaces defined in the
//! application layer, plus the HTTP surfaces and process plumbing.

/// Per-instrument average volume store.
pub mod baseline;

/// Subscriber registry with last-batch replay.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// In-process alert relay topic.
pub mod relay;

/// WebSocket alert server.
pub mod server;

/// Snapshot source adapters (vendor API, simulated).
pub mod source;

/// OpenTelemetry tracing integration.
pub mod telemetry;
