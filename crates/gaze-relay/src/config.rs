use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use gaze_relay_lib::RelayConfig;

/// gaze-relay: one upstream gaze producer → many WebSocket subscribers
#[derive(Parser, Debug)]
#[command(name = "gaze-relay")]
#[command(about = "Relays gaze coordinates from an upstream producer to WebSocket subscribers")]
pub struct Config {
    /// Interface to accept subscribers on
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to accept subscribers and liveness probes on
    #[arg(long, env = "RELAY_PORT", default_value = "8080")]
    pub port: u16,

    /// Upstream producer WebSocket URL (e.g. ws://localhost:8765)
    #[arg(long, env = "UPSTREAM_URL")]
    pub upstream_url: String,

    /// Credential sent as the first frame on every upstream connection
    #[arg(long, env = "UPSTREAM_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: String,

    /// Initial reconnect delay in milliseconds
    #[arg(long, env = "RECONNECT_BASE_MS", default_value = "1000")]
    pub reconnect_base_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[arg(long, env = "RECONNECT_MAX_MS", default_value = "10000")]
    pub reconnect_max_ms: u64,

    /// Health/metrics listen address (disabled when unset)
    #[arg(long, env = "RELAY_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    pub fn relay_config(&self) -> RelayConfig {
        let mut config = RelayConfig::new(
            SocketAddr::new(self.host, self.port),
            self.upstream_url.clone(),
            self.auth_token.clone(),
        )
        .with_reconnect_delays(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_max_ms),
        );

        if let Some(addr) = self.metrics_addr {
            config = config.with_metrics_addr(addr);
        }

        config
    }
}
