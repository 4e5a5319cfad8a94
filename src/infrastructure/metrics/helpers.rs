//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    QUEUE_ABANDONED_TOTAL, QUEUE_APPLIED_TOTAL, QUEUE_DRAINS_SKIPPED_TOTAL, QUEUE_DRAINS_TOTAL,
    QUEUE_DRAIN_DURATION, QUEUE_ENQUEUED_TOTAL, QUEUE_PENDING, QUEUE_RETRIED_TOTAL,
    REALTIME_CONNECTS_TOTAL, REALTIME_EVENTS_RECEIVED, REALTIME_EVENTS_UNKNOWN,
    REALTIME_OUTBOUND_DROPPED, REALTIME_OUTBOUND_SENT, REALTIME_RECONNECT_ATTEMPTS_TOTAL,
    REALTIME_RECONNECT_FAILED_TOTAL, REALTIME_STATE, STORE_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording mutation queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_enqueued(pending: usize) {
        QUEUE_ENQUEUED_TOTAL.inc();
        QUEUE_PENDING.set(pending as i64);
    }

    pub fn record_applied() {
        QUEUE_APPLIED_TOTAL.inc();
    }

    pub fn record_retried() {
        QUEUE_RETRIED_TOTAL.inc();
    }

    /// Record an abandoned action after its retry budget ran out
    pub fn record_abandoned_exhausted() {
        QUEUE_ABANDONED_TOTAL.with_label_values(&["exhausted"]).inc();
    }

    /// Record an abandoned action after a permanent remote failure
    pub fn record_abandoned_permanent() {
        QUEUE_ABANDONED_TOTAL.with_label_values(&["permanent"]).inc();
    }

    pub fn record_drain(duration_secs: f64, pending: usize) {
        QUEUE_DRAINS_TOTAL.inc();
        QUEUE_DRAIN_DURATION.observe(duration_secs);
        QUEUE_PENDING.set(pending as i64);
    }

    pub fn record_drain_skipped_busy() {
        QUEUE_DRAINS_SKIPPED_TOTAL.with_label_values(&["busy"]).inc();
    }

    pub fn record_drain_skipped_offline() {
        QUEUE_DRAINS_SKIPPED_TOTAL.with_label_values(&["offline"]).inc();
    }

    pub fn set_pending(pending: usize) {
        QUEUE_PENDING.set(pending as i64);
    }
}

/// Helper struct for recording realtime connection metrics
pub struct RealtimeMetrics;

impl RealtimeMetrics {
    /// Record the current connection state as its gauge value
    pub fn set_state(value: i64) {
        REALTIME_STATE.set(value);
    }

    pub fn record_connected() {
        REALTIME_CONNECTS_TOTAL.inc();
    }

    pub fn record_reconnect_attempt() {
        REALTIME_RECONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_reconnect_failed() {
        REALTIME_RECONNECT_FAILED_TOTAL.inc();
    }

    pub fn record_event(event_type: &str) {
        REALTIME_EVENTS_RECEIVED.with_label_values(&[event_type]).inc();
    }

    pub fn record_unknown_event() {
        REALTIME_EVENTS_UNKNOWN.inc();
    }

    pub fn record_outbound_sent() {
        REALTIME_OUTBOUND_SENT.inc();
    }

    pub fn record_outbound_dropped() {
        REALTIME_OUTBOUND_DROPPED.inc();
    }
}

/// Helper struct for recording durable store metrics
pub struct StoreMetrics;

impl StoreMetrics {
    pub fn record_read_failure() {
        STORE_FAILURES_TOTAL.with_label_values(&["read"]).inc();
    }

    pub fn record_write_failure() {
        STORE_FAILURES_TOTAL.with_label_values(&["write"]).inc();
    }

    pub fn record_decode_failure() {
        STORE_FAILURES_TOTAL.with_label_values(&["decode"]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_queue_metrics() {
        QueueMetrics::record_enqueued(1);
        QueueMetrics::record_abandoned_permanent();
        RealtimeMetrics::record_event("typing");

        let text = encode_metrics().unwrap();
        assert!(text.contains("sync_queue_enqueued_total"));
        assert!(text.contains("sync_queue_abandoned_total"));
        assert!(text.contains("sync_realtime_events_received_total"));
    }
}
