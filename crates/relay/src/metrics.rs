//! Prometheus metrics for the relay
//!
//! Registered lazily in the default registry so every relay instance in a
//! process reports into the same families.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

const LABEL_KIND: &str = "kind";
const LABEL_REASON: &str = "reason";

/// Upstream frames by how they were handled (auth, point, discarded kind)
static UPSTREAM_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gaze_relay_upstream_frames_total",
        "Frames received from the upstream producer",
        &[LABEL_KIND]
    )
    .expect("Failed to register upstream_frames_total metric")
});

/// Reconnects scheduled, by disconnect reason
static UPSTREAM_RECONNECTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gaze_relay_upstream_reconnects_total",
        "Upstream reconnects scheduled",
        &[LABEL_REASON]
    )
    .expect("Failed to register upstream_reconnects_total metric")
});

/// Upstream authorization status (1 = authorized, 0 = not)
static UPSTREAM_AUTHORIZED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "gaze_relay_upstream_authorized",
        "Upstream connection authorization status (1=authorized, 0=not)"
    )
    .expect("Failed to register upstream_authorized metric")
});

static POINTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gaze_relay_points_published_total",
        "Points published to the broadcast hub"
    )
    .expect("Failed to register points_published_total metric")
});

static SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("gaze_relay_subscribers", "Currently registered subscribers")
        .expect("Failed to register subscribers metric")
});

/// Deliveries skipped during fan-out (closed or full subscriber channel)
static DELIVERIES_SKIPPED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gaze_relay_deliveries_skipped_total",
        "Subscriber deliveries skipped during fan-out",
        &[LABEL_REASON]
    )
    .expect("Failed to register deliveries_skipped_total metric")
});

pub fn inc_upstream_frame(kind: &str) {
    UPSTREAM_FRAMES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn inc_reconnect(reason: &str) {
    UPSTREAM_RECONNECTS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_authorized(authorized: bool) {
    UPSTREAM_AUTHORIZED.set(i64::from(authorized));
}

pub fn inc_points_published() {
    POINTS_PUBLISHED_TOTAL.inc();
}

pub fn add_subscribers(delta: i64) {
    SUBSCRIBERS.add(delta);
}

pub fn inc_delivery_skipped(reason: &str) {
    DELIVERIES_SKIPPED_TOTAL.with_label_values(&[reason]).inc();
}

/// Encode all metrics in the default registry in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
