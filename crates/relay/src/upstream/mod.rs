//! Upstream producer connection
//!
//! `state` holds the handshake/backoff state machine, `client` drives it over a
//! WebSocket.

pub mod client;
pub mod state;

pub use client::UpstreamClient;
pub use state::{ConnectionState, DisconnectReason, FrameOutcome, UpstreamState, AUTH_OK_PREFIX};
