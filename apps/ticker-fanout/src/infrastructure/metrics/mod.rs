//! Prometheus Metrics Module
//!
//! Exposes fan-out metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Upstream**: frames, decode errors, link events, commands
//! - **Broadcast**: batches, batch sizes, status messages, drops
//! - **Clients**: connected downstream sessions
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `None` if a different recorder is already installed; metrics are
/// then silently discarded and `/metrics` serves an empty body.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_metrics();
            Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
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
    // Upstream
    describe_counter!(
        "ticker_fanout_frames_received_total",
        "Text frames received from the upstream feed"
    );
    describe_counter!(
        "ticker_fanout_decode_errors_total",
        "Upstream frames dropped because they failed to decode"
    );
    describe_counter!(
        "ticker_fanout_updates_decoded_total",
        "Aggregate updates decoded from upstream frames"
    );
    describe_counter!(
        "ticker_fanout_connect_attempts_total",
        "Upstream connection attempts"
    );
    describe_counter!(
        "ticker_fanout_upstream_commands_total",
        "Commands written to the upstream feed by action"
    );
    describe_counter!(
        "ticker_fanout_link_events_total",
        "Upstream link lifecycle events by kind"
    );
    describe_gauge!(
        "ticker_fanout_upstream_connected",
        "1 when the upstream link is connected"
    );

    // Broadcast
    describe_counter!(
        "ticker_fanout_batches_broadcast_total",
        "Batches handed to the client fan-out"
    );
    describe_histogram!(
        "ticker_fanout_batch_size",
        "Updates per broadcast batch"
    );
    describe_counter!(
        "ticker_fanout_batches_dropped_total",
        "Queued batches dropped from full session queues"
    );
    describe_counter!(
        "ticker_fanout_status_broadcast_total",
        "Connection status messages handed to the client fan-out"
    );

    // Clients
    describe_gauge!(
        "ticker_fanout_connected_clients",
        "Connected downstream WebSocket sessions"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Upstream link lifecycle event labels.
#[derive(Debug, Clone, Copy)]
pub enum LinkEventKind {
    /// Link established.
    Connected,
    /// Transport error.
    Error,
    /// Link closed.
    Closed,
    /// Open failed.
    OpenFailed,
}

impl LinkEventKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Closed => "closed",
            Self::OpenFailed => "open_failed",
        }
    }
}

/// Record a text frame received from upstream.
pub fn record_frame_received() {
    counter!("ticker_fanout_frames_received_total").increment(1);
}

/// Record an upstream frame that failed to decode.
pub fn record_decode_error() {
    counter!("ticker_fanout_decode_errors_total").increment(1);
}

/// Record updates decoded from one frame.
pub fn record_updates_decoded(count: usize) {
    counter!("ticker_fanout_updates_decoded_total").increment(count as u64);
}

/// Record an upstream connection attempt.
pub fn record_connect_attempt() {
    counter!("ticker_fanout_connect_attempts_total").increment(1);
}

/// Record a command written upstream.
pub fn record_upstream_command(action: &'static str) {
    counter!("ticker_fanout_upstream_commands_total", "action" => action).increment(1);
}

/// Record an upstream link lifecycle event.
pub fn record_link_event(kind: LinkEventKind) {
    counter!("ticker_fanout_link_events_total", "kind" => kind.as_str()).increment(1);
}

/// Update the upstream connected gauge.
pub fn set_upstream_connected(connected: bool) {
    gauge!("ticker_fanout_upstream_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a batch handed to the fan-out.
#[allow(clippy::cast_precision_loss)]
pub fn record_batch_broadcast(size: usize) {
    counter!("ticker_fanout_batches_broadcast_total").increment(1);
    histogram!("ticker_fanout_batch_size").record(size as f64);
}

/// Record batches dropped from full session queues.
pub fn record_batches_dropped(count: u64) {
    counter!("ticker_fanout_batches_dropped_total").increment(count);
}

/// Record a status message handed to the fan-out.
pub fn record_status_broadcast() {
    counter!("ticker_fanout_status_broadcast_total").increment(1);
}

/// Update the connected client gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_clients(count: usize) {
    gauge!("ticker_fanout_connected_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_event_kind_as_str() {
        assert_eq!(LinkEventKind::Connected.as_str(), "connected");
        assert_eq!(LinkEventKind::Error.as_str(), "error");
        assert_eq!(LinkEventKind::Closed.as_str(), "closed");
        assert_eq!(LinkEventKind::OpenFailed.as_str(), "open_failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_batch_broadcast(3);
        set_connected_clients(2);
        set_upstream_connected(true);
    }
}
