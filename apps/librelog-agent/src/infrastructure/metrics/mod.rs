//! Prometheus Metrics Module
//!
//! Exposes agent metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Samples**: produced, skipped, sent, rejected, and dropped counts
//! - **Queue**: current outbound queue depth
//! - **Session**: lifecycle state, reconnects, and authentication failures
//! - **Latency**: send-to-acknowledgement duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::IngestError;
use crate::domain::session::SessionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Sample counters
    describe_counter!(
        "librelog_agent_samples_produced_total",
        "Total samples taken from the producer"
    );
    describe_counter!(
        "librelog_agent_samples_skipped_total",
        "Total sample attempts skipped after a producer error"
    );
    describe_counter!(
        "librelog_agent_samples_sent_total",
        "Total samples acknowledged by the ingester"
    );
    describe_counter!(
        "librelog_agent_samples_rejected_total",
        "Total samples the ingester answered with an error"
    );
    describe_counter!(
        "librelog_agent_samples_dropped_total",
        "Total samples evicted from a full outbound queue"
    );

    // Queue and session gauges
    describe_gauge!(
        "librelog_agent_queue_depth",
        "Samples held in the outbound queue, including the one in flight"
    );
    describe_gauge!(
        "librelog_agent_session_state",
        "Session state (0=disconnected 1=authenticating 2=connected 3=reauthenticating 4=terminated)"
    );

    // Session counters
    describe_counter!(
        "librelog_agent_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "librelog_agent_auth_failures_total",
        "Total authentication failures"
    );
    describe_counter!(
        "librelog_agent_send_errors_total",
        "Total failed sends by error kind"
    );

    // Latency histograms
    describe_histogram!(
        "librelog_agent_send_duration_seconds",
        "Time from writing a sample to receiving its acknowledgement"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a sample taken from the producer.
pub fn record_sample_produced() {
    counter!("librelog_agent_samples_produced_total").increment(1);
}

/// Record a skipped sample attempt.
pub fn record_sample_skipped() {
    counter!("librelog_agent_samples_skipped_total").increment(1);
}

/// Record an acknowledged sample and its round-trip time.
pub fn record_sample_sent(duration: Duration) {
    counter!("librelog_agent_samples_sent_total").increment(1);
    histogram!("librelog_agent_send_duration_seconds").record(duration.as_secs_f64());
}

/// Record a sample rejected by the ingester.
pub fn record_sample_rejected() {
    counter!("librelog_agent_samples_rejected_total").increment(1);
}

/// Record a sample evicted under backpressure.
pub fn record_sample_dropped() {
    counter!("librelog_agent_samples_dropped_total").increment(1);
}

/// Update the outbound queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("librelog_agent_queue_depth").set(depth as f64);
}

/// Update the session state gauge.
pub fn set_session_state(state: SessionState) {
    gauge!("librelog_agent_session_state").set(f64::from(state.code()));
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("librelog_agent_reconnects_total").increment(1);
}

/// Record an authentication failure.
pub fn record_auth_failure() {
    counter!("librelog_agent_auth_failures_total").increment(1);
}

/// Record a failed send.
pub fn record_send_error(err: &IngestError) {
    counter!(
        "librelog_agent_send_errors_total",
        "kind" => err.kind()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_sample_produced();
        record_sample_sent(Duration::from_millis(3));
        set_queue_depth(7);
        set_session_state(SessionState::Connected);
        record_send_error(&IngestError::TokenRejected);
    }

    #[test]
    fn init_is_idempotent() {
        let _first = init_metrics().unwrap();
        record_sample_dropped();
        let second = init_metrics().unwrap();

        assert!(second
            .render()
            .contains("librelog_agent_samples_dropped_total"));
        assert!(get_metrics_handle().is_some());
    }
}
