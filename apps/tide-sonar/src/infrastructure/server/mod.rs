//! Alert WebSocket Server
//!
//! Public HTTP surface for dashboard clients.
//!
//! # Endpoints
//!
//! - `GET /` - Service banner (`{"status":"ok","service":"tide-sonar"}`)
//! - `GET /ws/alerts` - WebSocket upgrade; the cached batch is replayed, then
//!   every newly published alert is pushed as one JSON text frame
//!
//! Inbound client messages are only treated as liveness. A connection is
//! unregistered as soon as its socket closes, errors, or fails a send.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::{ConnectionRegistry, Frame};

/// Service name reported by the banner endpoint.
pub const SERVICE_NAME: &str = "tide-sonar";

/// Alert server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind alert server to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server failed while running.
    #[error("alert server failed: {0}")]
    ServerFailed(String),
}

#[derive(Clone)]
struct AppState {
    registry: Arc<ConnectionRegistry>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

/// HTTP + WebSocket server pushing alerts to subscribers.
pub struct AlertServer {
    port: u16,
    state: AppState,
}

impl AlertServer {
    /// Create a server registering each client with `registry` through a
    /// queue of `queue_capacity` frames.
    #[must_use]
    pub fn new(
        port: u16,
        registry: Arc<ConnectionRegistry>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state: AppState {
                registry,
                queue_capacity: queue_capacity.max(1),
                cancel,
            },
        }
    }

    /// Bind on all interfaces and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Alert server listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let cancel = self.state.cancel.clone();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Alert server stopped");
        Ok(())
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner_handler))
        .route("/ws/alerts", get(ws_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn banner_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": SERVICE_NAME }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(state.queue_capacity);
    let id = state.registry.register(tx);
    tracing::info!(connection = %id, "Subscriber connected");

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sender.send(Message::Text(Utf8Bytes::from(&*frame))).await {
                    tracing::debug!(connection = %id, error = %e, "Send failed");
                    break;
                }
            }
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %id, error = %e, "Receive failed");
                    break;
                }
            },
        }
    }

    state.registry.unregister(id);
    tracing::info!(connection = %id, "Subscriber disconnected");
}

// =============================================================================
// Tests
// =============================================================================
