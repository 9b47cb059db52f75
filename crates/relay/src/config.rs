//! Relay configuration, static for the lifetime of a relay

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::backoff::{ReconnectPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::error::RelayError;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address subscribers and liveness probes connect to (port 0 picks one)
    pub listen_addr: SocketAddr,
    /// Upstream producer WebSocket URL
    pub upstream_url: String,
    /// Credential sent as the first upstream frame
    pub auth_token: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Optional health/metrics server address
    pub metrics_addr: Option<SocketAddr>,
}

impl RelayConfig {
    pub fn new(
        listen_addr: SocketAddr,
        upstream_url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            listen_addr,
            upstream_url: upstream_url.into(),
            auth_token: auth_token.into(),
            reconnect_base: DEFAULT_BASE_DELAY,
            reconnect_max: DEFAULT_MAX_DELAY,
            metrics_addr: None,
        }
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    pub fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(self.reconnect_base, self.reconnect_max)
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        let url = Url::parse(&self.upstream_url).map_err(|e| {
            RelayError::Config(format!("invalid upstream url {:?}: {}", self.upstream_url, e))
        })?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(RelayError::Config(format!(
                "upstream url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        if self.reconnect_base.is_zero() {
            return Err(RelayError::Config("reconnect base delay must be non-zero".into()));
        }

        if self.reconnect_max < self.reconnect_base {
            return Err(RelayError::Config(format!(
                "reconnect max delay ({:?}) is below base delay ({:?})",
                self.reconnect_max, self.reconnect_base
            )));
        }

        Ok(())
    }
}
