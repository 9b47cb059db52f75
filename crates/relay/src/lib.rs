//! gaze-relay: single-upstream, multi-subscriber gaze point relay
//!
//! The upstream client keeps one authenticated WebSocket to the gaze producer
//! and publishes decoded points to the broadcast hub, which caches the latest
//! point and fans it out to every connected subscriber.

pub mod backoff;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod point;
pub mod relay;
pub mod server;
pub mod upstream;

pub use backoff::ReconnectPolicy;
pub use config::RelayConfig;
pub use error::{DecodeError, RelayError};
pub use hub::{BroadcastHub, PointSink, Subscription};
pub use point::Point;
pub use relay::{Relay, RelayHandle};
pub use server::{create_health_router, create_router, run_server, DownstreamState, HealthState};
pub use upstream::{ConnectionState, UpstreamClient, UpstreamState};
