//! Upstream connection state machine
//!
//! Pure state, no I/O: the client task feeds it connection events and frames,
//! and it answers with what to do next. Routing frames by state is what keeps
//! data from being interpreted before the auth reply.
//!
//! ```text
//!  Disconnected --begin_connect--> Connecting --on_open--> AwaitingAuth
//!       ^                                                   |      |
//!       |                                  reply "ok.." ----+      +---- other reply
//!       |                                       v                        |
//!       +----------- on_disconnect -------- Authorized                   |
//!       +----------- on_disconnect --------------------------------------+
//! ```

use std::fmt;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::error::DecodeError;
use crate::point::Point;

/// Prefix an auth reply must start with (case-sensitive)
pub const AUTH_OK_PREFIX: &str = "ok";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Authorized,
}

/// Why a connection ended; used as the reconnect log annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectFailed,
    AuthFailed,
    TransportError,
    Closed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ConnectFailed => "connect_failed",
            DisconnectReason::AuthFailed => "auth_failed",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::Closed => "closed",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single inbound frame turned out to be
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Auth reply accepted; data frames follow
    Authorized,
    /// Auth reply rejected; caller closes and reconnects
    AuthRejected,
    /// Data frame decoded into a point
    Point(Point),
    /// Data frame dropped; connection state untouched
    Discarded(DecodeError),
    /// Frame arrived while no connection was open
    Ignored,
}

#[derive(Debug, Clone)]
pub struct UpstreamState {
    state: ConnectionState,
    policy: ReconnectPolicy,
    /// Delay of the reconnect timer currently pending, if any
    pending_reconnect: Option<Duration>,
}

impl UpstreamState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            policy,
            pending_reconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.state == ConnectionState::Authorized
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// Delay of the pending reconnect timer
    pub fn pending_reconnect(&self) -> Option<Duration> {
        self.pending_reconnect
    }

    /// A new attempt starts. Any previous authorization no longer holds.
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Transport is open; the next frame is the auth reply.
    pub fn on_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::AwaitingAuth;
        }
    }

    /// Route one inbound text frame according to the current state.
    pub fn on_frame(&mut self, text: &str) -> FrameOutcome {
        match self.state {
            ConnectionState::AwaitingAuth => {
                if text.starts_with(AUTH_OK_PREFIX) {
                    self.state = ConnectionState::Authorized;
                    self.policy.reset();
                    FrameOutcome::Authorized
                } else {
                    FrameOutcome::AuthRejected
                }
            }
            ConnectionState::Authorized => match Point::from_frame(text) {
                Ok(point) => FrameOutcome::Point(point),
                Err(e) => FrameOutcome::Discarded(e),
            },
            ConnectionState::Disconnected | ConnectionState::Connecting => FrameOutcome::Ignored,
        }
    }

    /// The connection ended (close, error, failed connect or rejected auth).
    ///
    /// Returns the delay of a newly scheduled reconnect timer, or `None` when a
    /// timer is already pending and this event coalesces into it.
    pub fn on_disconnect(&mut self) -> Option<Duration> {
        self.state = ConnectionState::Disconnected;

        if self.pending_reconnect.is_some() {
            return None;
        }

        let delay = self.policy.next_delay();
        self.pending_reconnect = Some(delay);
        Some(delay)
    }

    /// The pending timer fired; a new connect may be scheduled from here.
    pub fn on_reconnect_timer(&mut self) {
        self.pending_reconnect = None;
    }
}
