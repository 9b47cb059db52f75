//! Upstream WebSocket client
//!
//! Holds a single connection to the gaze producer, authenticates with a text
//! credential, and forwards decoded points to a [`PointSink`]. Every way a
//! connection can end funnels into [`UpstreamState::on_disconnect`], which
//! schedules at most one reconnect timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::backoff::ReconnectPolicy;
use crate::hub::PointSink;
use crate::metrics;
use crate::upstream::state::{ConnectionState, DisconnectReason, FrameOutcome, UpstreamState};

pub struct UpstreamClient<S: PointSink> {
    url: String,
    credential: String,
    state: UpstreamState,
    sink: S,
    /// Mirrors `ConnectionState::Authorized` for readiness checks
    authorized: Arc<AtomicBool>,
}

impl<S: PointSink> UpstreamClient<S> {
    pub fn new(
        url: impl Into<String>,
        credential: impl Into<String>,
        policy: ReconnectPolicy,
        sink: S,
    ) -> Self {
        Self {
            url: url.into(),
            credential: credential.into(),
            state: UpstreamState::new(policy),
            sink,
            authorized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Returns a handle to the authorized status
    pub fn authorized_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.authorized)
    }

    fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
        metrics::set_authorized(authorized);
    }

    /// Connect, and keep reconnecting with backoff, until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, "Starting upstream client");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = self.connect() => {}
            }

            let delay = self
                .state
                .pending_reconnect()
                .unwrap_or_else(|| self.state.policy().base_delay());

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => self.state.on_reconnect_timer(),
            }
        }

        self.set_authorized(false);
        info!(url = %self.url, "Upstream client stopped");
    }

    /// One connection lifetime: open, authenticate, stream frames until the
    /// connection ends. The socket never outlives this call, so the previous
    /// connection is always closed before the next attempt starts.
    async fn connect(&mut self) {
        self.state.begin_connect();
        self.set_authorized(false);
        debug!(url = %self.url, "Connecting to upstream");

        let mut ws = match connect_async(self.url.as_str()).await {
            Ok((ws, response)) => {
                info!(url = %self.url, status = ?response.status(), "Upstream WebSocket connected");
                ws
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "Upstream connect failed");
                self.on_disconnect(DisconnectReason::ConnectFailed);
                return;
            }
        };
        self.state.on_open();

        if let Err(e) = ws.send(Message::Text(self.credential.clone())).await {
            warn!(error = %e, "Failed to send upstream credential");
            self.on_disconnect(DisconnectReason::TransportError);
            return;
        }

        loop {
            let text = match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                // Binary frames count like text, so an undecodable first frame
                // is still the auth reply.
                Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                Some(Ok(Message::Ping(data))) => {
                    trace!("Received upstream ping, sending pong");
                    if let Err(e) = ws.send(Message::Pong(data)).await {
                        warn!(error = %e, "Failed to answer upstream ping");
                        self.on_disconnect(DisconnectReason::TransportError);
                        return;
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "Upstream closed connection");
                    self.on_disconnect(DisconnectReason::Closed);
                    return;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "Upstream transport error");
                    self.on_disconnect(DisconnectReason::TransportError);
                    // The close that follows an error is reported as well.
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "Error closing upstream after transport error");
                    }
                    self.on_disconnect(DisconnectReason::Closed);
                    return;
                }
                None => {
                    info!("Upstream stream ended");
                    self.on_disconnect(DisconnectReason::Closed);
                    return;
                }
            };

            match self.state.on_frame(&text) {
                FrameOutcome::Authorized => {
                    metrics::inc_upstream_frame("auth");
                    self.set_authorized(true);
                    info!(url = %self.url, "Upstream authorized");
                }
                FrameOutcome::AuthRejected => {
                    metrics::inc_upstream_frame("auth");
                    warn!(reason = %DisconnectReason::AuthFailed, reply = %text, "Upstream rejected credential");
                    self.on_disconnect(DisconnectReason::AuthFailed);
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "Error closing upstream after auth failure");
                    }
                    self.on_disconnect(DisconnectReason::Closed);
                    return;
                }
                FrameOutcome::Point(point) => {
                    metrics::inc_upstream_frame("point");
                    trace!(x = point.x, y = point.y, "Received gaze point");
                    self.sink.publish(point);
                }
                FrameOutcome::Discarded(e) => {
                    metrics::inc_upstream_frame(e.kind());
                    warn!(error = %e, raw = %text, "Discarding upstream frame");
                }
                FrameOutcome::Ignored => {
                    debug!(raw = %text, "Ignoring frame outside an open connection");
                }
            }
        }
    }

    /// Record the end of a connection and schedule a reconnect unless one is
    /// already pending.
    fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.set_authorized(false);

        match self.state.on_disconnect() {
            Some(delay) => {
                metrics::inc_reconnect(reason.as_str());
                warn!(
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "Upstream disconnected, reconnect scheduled"
                );
            }
            None => {
                debug!(reason = %reason, "Reconnect already pending");
            }
        }
    }
}
