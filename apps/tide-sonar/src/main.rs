//! Tide Sonar Binary
//!
//! Starts the volume anomaly detector.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tide-sonar
//! ```
//!
//! # Environment Variables
//!
//! ## Required (vendor source only)
//! - `SOURCE_LICENSE`: Vendor API license key
//!
//! ## Optional
//! - `DATA_SOURCE`: simulated | http (default: simulated)
//! - `TIDE_SONAR_PORT`: WebSocket server port (default: 8000)
//! - `TIDE_SONAR_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `HISTORY_DATA_PATH`: Average volume file (default: history_baseline.json)
//! - `CONSTITUENTS_PATH`: Code → category file (default: index_constituents.json)
//! - `MARKET_HOLIDAYS`: Comma-separated closed dates, `YYYY-MM-DD`
//! - `FORCE_MARKET_OPEN`: Ignore the session calendar (default: false)
//! - `ALERT_RELAY_BRIDGE`: Forward relayed alerts to subscribers (default: false)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: tide_sonar=info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tide_sonar::application::ports::{AlertPublisher, BroadcastPort};
use tide_sonar::infrastructure::baseline::BaselineStore;
use tide_sonar::infrastructure::relay::{AlertRelay, DEFAULT_CAPACITY, run_bridge};
use tide_sonar::infrastructure::source::build_source;
use tide_sonar::infrastructure::telemetry;
use tide_sonar::{
    AlertServer, AnomalyMonitor, ConnectionRegistry, DetectionThresholds, HealthServer,
    HealthServerState, ProducerLoop, SonarConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Tide Sonar");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = SonarConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let schedule = Arc::new(config.market.schedule());
    let baselines = Arc::new(BaselineStore::load(&config.baseline_path));

    // Subscriber registry and relay topic
    let registry = Arc::new(ConnectionRegistry::new(schedule.hours().close));
    let relay = Arc::new(AlertRelay::new(config.relay.channel.clone(), DEFAULT_CAPACITY));

    if config.relay.bridge {
        let rx = relay.subscribe();
        let bridge_registry = Arc::clone(&registry);
        let bridge_cancel = shutdown_token.clone();
        tokio::spawn(async move {
            run_bridge(rx, bridge_registry, bridge_cancel).await;
        });
    }

    // Detection pipeline
    let publisher: Arc<dyn AlertPublisher> = relay;
    let monitor = Arc::new(
        AnomalyMonitor::new(baselines, DetectionThresholds::default(), *schedule.hours())
            .with_publisher(publisher),
    );
    let source = build_source(&config.source, schedule.offset(), shutdown_token.clone())
        .context("failed to build snapshot source")?;
    let broadcast: Arc<dyn BroadcastPort> = registry.clone();

    let producer = ProducerLoop::new(
        config.producer.clone().into(),
        Arc::clone(&schedule),
        source,
        monitor,
        broadcast,
        shutdown_token.clone(),
    );

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&schedule),
        Arc::clone(&registry),
        producer.status(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let alert_server = AlertServer::new(
        config.server.port,
        Arc::clone(&registry),
        config.server.subscriber_queue_capacity,
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn alert server
    let server_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = alert_server.run().await {
            tracing::error!(error = %e, "Alert server error");
            server_cancel.cancel();
        }
    });

    // Spawn producer
    let producer_handle = tokio::spawn(producer.run());

    tracing::info!("Tide Sonar ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, producer_handle)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Producer did not stop in time"
        );
    }

    tracing::info!("Tide Sonar stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &SonarConfig) {
    tracing::info!(
        source = config.source.kind.as_str(),
        port = config.server.port,
        health_port = config.server.health_port,
        force_open = config.market.force_open,
        holidays = config.market.holidays.len(),
        relay_channel = %config.relay.channel,
        relay_bridge = config.relay.bridge,
        "Configuration loaded"
    );
    tracing::debug!(
        baseline_path = %config.baseline_path.display(),
        constituents_path = %config.source.constituents_path.display(),
        poll_interval_ms = config.producer.poll_interval.as_millis(),
        top_n = config.producer.top_n_per_category,
        "Pipeline settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for an internal cancel.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Internal failure, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
