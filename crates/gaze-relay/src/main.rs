//! gaze-relay: gaze coordinate relay binary
//!
//! Keeps one authenticated connection to the gaze producer and rebroadcasts
//! every point to WebSocket subscribers.

mod config;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use gaze_relay_lib::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.json_logs);

    let relay_config = config.relay_config();
    info!(
        listen_addr = %relay_config.listen_addr,
        upstream_url = %relay_config.upstream_url,
        metrics_addr = ?relay_config.metrics_addr,
        "gaze-relay starting"
    );

    let handle = Relay::new(relay_config).start().await?;

    shutdown_signal().await;
    handle.shutdown().await;

    info!("gaze-relay stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGTERM or ctrl-c.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM received"),
                _ = ctrl_c => info!("ctrl-c received"),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to listen for SIGTERM, waiting for ctrl-c only");
            ctrl_c.await.ok();
            info!("ctrl-c received");
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    info!("ctrl-c received");
}
