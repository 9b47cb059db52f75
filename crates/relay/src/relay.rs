//! Relay service: one upstream client, one hub, one subscriber listener.
//!
//! All state lives in the objects created here, so independent relays can run
//! side by side in one process.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hub::BroadcastHub;
use crate::server::{create_health_router, create_router, run_server, DownstreamState, HealthState};
use crate::upstream::UpstreamClient;

pub struct Relay {
    config: RelayConfig,
    hub: BroadcastHub,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            hub: BroadcastHub::new(),
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Validate config, bind listeners and spawn the relay tasks.
    pub async fn start(self) -> Result<RelayHandle, RelayError> {
        let Relay { config, hub } = self;
        config.validate()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let listener = bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let upstream = UpstreamClient::new(
            config.upstream_url.clone(),
            config.auth_token.clone(),
            config.reconnect_policy(),
            hub.clone(),
        );
        let authorized = upstream.authorized_handle();

        let metrics_addr = match config.metrics_addr {
            Some(addr) => {
                let metrics_listener = bind(addr).await?;
                let bound = metrics_listener.local_addr()?;
                let app = create_health_router(HealthState::new(
                    config.upstream_url.clone(),
                    Arc::clone(&authorized),
                    hub.clone(),
                ));
                let shutdown = shutdown_rx.clone();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = run_server(metrics_listener, app, shutdown).await {
                        error!(error = %e, "Health server failed");
                    }
                }));
                info!(addr = %bound, "Health/metrics server listening");
                Some(bound)
            }
            None => None,
        };

        tasks.push(tokio::spawn(upstream.run(shutdown_rx.clone())));

        let app = create_router(DownstreamState::new(hub.clone(), shutdown_rx.clone()));
        let shutdown = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_server(listener, app, shutdown).await {
                error!(error = %e, "Subscriber server failed");
            }
        }));

        info!(
            addr = %local_addr,
            upstream = %config.upstream_url,
            base_ms = config.reconnect_base.as_millis() as u64,
            max_ms = config.reconnect_max.as_millis() as u64,
            "Relay started"
        );

        Ok(RelayHandle {
            local_addr,
            metrics_addr,
            hub,
            authorized,
            shutdown_tx,
            tasks,
        })
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr).await.map_err(|source| RelayError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Running relay. Dropping the handle also stops the relay tasks.
pub struct RelayHandle {
    local_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
    hub: BroadcastHub,
    authorized: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Address subscribers connect to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    /// Signal shutdown and wait for every relay task to finish.
    pub async fn shutdown(self) {
        info!(addr = %self.local_addr, "Relay shutting down");
        self.shutdown_tx.send(true).ok();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Relay task panicked");
            }
        }

        info!("Relay stopped");
    }
}
