//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: raw trades received, malformed messages, reconnects
//! - **Aggregation**: merges by outcome and merge latency
//! - **Broadcast**: deliveries, skips, and connected viewers
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::feed::FeedSource;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_hub_trades_received_total",
        "Raw trade records received from the tick source"
    );
    describe_counter!(
        "price_hub_malformed_messages_total",
        "Upstream messages discarded because they could not be decoded"
    );
    describe_counter!(
        "price_hub_reconnects_total",
        "Upstream feed reconnection attempts"
    );

    describe_counter!(
        "price_hub_aggregate_merges_total",
        "Hourly aggregate merges by outcome"
    );
    describe_histogram!(
        "price_hub_aggregate_merge_seconds",
        "Time spent in one atomic aggregate merge"
    );

    describe_counter!(
        "price_hub_ticks_delivered_total",
        "Tick messages handed to viewer connections"
    );
    describe_counter!(
        "price_hub_ticks_skipped_total",
        "Tick messages skipped for closed or saturated viewers, by reason"
    );
    describe_gauge!(
        "price_hub_viewer_connections",
        "Number of open viewer WebSocket connections"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for aggregate merges.
#[derive(Debug, Clone, Copy)]
pub enum MergeOutcome {
    /// Merge committed.
    Committed,
    /// Merge aborted; the contribution was dropped.
    Failed,
}

impl MergeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

/// Record a raw trade received from a source.
pub fn record_trade_received(source: FeedSource) {
    counter!(
        "price_hub_trades_received_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record a discarded upstream message.
pub fn record_malformed_message() {
    counter!("price_hub_malformed_messages_total").increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_reconnect() {
    counter!("price_hub_reconnects_total").increment(1);
}

/// Record an aggregate merge and its duration.
pub fn record_merge(outcome: MergeOutcome, duration: Duration) {
    counter!(
        "price_hub_aggregate_merges_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("price_hub_aggregate_merge_seconds").record(duration.as_secs_f64());
}

/// Record the result of one broadcast.
pub fn record_broadcast(delivered: u64, skipped_full: u64, skipped_closed: u64) {
    counter!("price_hub_ticks_delivered_total").increment(delivered);
    if skipped_full > 0 {
        counter!("price_hub_ticks_skipped_total", "reason" => "full").increment(skipped_full);
    }
    if skipped_closed > 0 {
        counter!("price_hub_ticks_skipped_total", "reason" => "closed").increment(skipped_closed);
    }
}

/// Update the viewer connection gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_viewer_connections(count: usize) {
    gauge!("price_hub_viewer_connections").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
