use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::hub::BroadcastHub;
use crate::metrics::encode_metrics;

/// Body of every plain HTTP response on the relay port
pub const STATUS_LINE: &str = "gaze relay is running\n";

/// Shared state for the subscriber endpoint
#[derive(Clone)]
pub struct DownstreamState {
    pub hub: BroadcastHub,
    pub shutdown: watch::Receiver<bool>,
}

impl DownstreamState {
    pub fn new(hub: BroadcastHub, shutdown: watch::Receiver<bool>) -> Self {
        Self { hub, shutdown }
    }
}

/// WebSocket upgrades on any path become subscribers; anything else gets the
/// status line.
async fn accept(
    State(state): State<DownstreamState>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| serve_subscriber(socket, state)),
        None => (StatusCode::OK, STATUS_LINE).into_response(),
    }
}

/// Forward hub payloads to one subscriber until either side goes away.
async fn serve_subscriber(socket: WebSocket, state: DownstreamState) {
    let DownstreamState { hub, mut shutdown } = state;
    let mut subscription = hub.subscribe();
    let id = subscription.id();
    info!(subscriber = id, "Subscriber connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Subscribers are not expected to send anything; reads only detect closure.
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(subscriber = id, error = %e, "Subscriber read error");
                    break;
                }
                Some(Ok(_)) => continue,
            },

            payload = subscription.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = ws_tx.send(Message::Text(payload.to_string())).await {
                        debug!(subscriber = id, error = %e, "Subscriber send failed");
                        break;
                    }
                }
                None => break,
            },

            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    hub.unsubscribe(id);
    info!(subscriber = id, "Subscriber disconnected");
}

/// Create the subscriber/status router served on the relay port
pub fn create_router(state: DownstreamState) -> Router {
    Router::new().fallback(accept).with_state(state)
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub upstream: String,
    pub authorized: bool,
    pub subscribers: usize,
}

/// Shared state for health endpoints
#[derive(Clone)]
pub struct HealthState {
    pub upstream_url: String,
    pub authorized: Arc<AtomicBool>,
    pub hub: BroadcastHub,
}

impl HealthState {
    pub fn new(upstream_url: impl Into<String>, authorized: Arc<AtomicBool>, hub: BroadcastHub) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            authorized,
            hub,
        }
    }

    fn response(&self, status: &str) -> HealthResponse {
        HealthResponse {
            status: status.to_string(),
            upstream: self.upstream_url.clone(),
            authorized: self.authorized.load(Ordering::SeqCst),
            subscribers: self.hub.subscriber_count(),
        }
    }
}

/// Health endpoint - always returns 200 if server is running
async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(state.response("ok"))
}

/// Ready endpoint - returns 200 only while the upstream is authorized
async fn ready(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let authorized = state.authorized.load(Ordering::SeqCst);
    let status_code = if authorized {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(state.response(if authorized { "ready" } else { "not_ready" })),
    )
}

async fn metrics() -> String {
    encode_metrics()
}

/// Create the health server router
pub fn create_health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve `app` on `listener` until shutdown is signalled
pub async fn run_server(
    listener: TcpListener,
    app: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
