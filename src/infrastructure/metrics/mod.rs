//! Prometheus metrics for the resilience layer.
//!
//! - Mutation queue metrics (enqueued, applied, retried, abandoned, drains)
//! - Realtime connection metrics (state, reconnects, inbound/outbound traffic)
//! - Durable store metrics

mod helpers;

pub use helpers::{encode_metrics, QueueMetrics, RealtimeMetrics, StoreMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "sync";

lazy_static! {
    // ============================================================================
    // Mutation Queue Metrics
    // ============================================================================

    /// Total actions enqueued
    pub static ref QUEUE_ENQUEUED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_enqueued_total", METRIC_PREFIX),
        "Total mutations enqueued"
    ).unwrap();

    /// Total actions applied to the remote endpoint
    pub static ref QUEUE_APPLIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_applied_total", METRIC_PREFIX),
        "Total mutations applied successfully"
    ).unwrap();

    /// Failed attempts that left the action queued for a later pass
    pub static ref QUEUE_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_retried_total", METRIC_PREFIX),
        "Total failed apply attempts kept for retry"
    ).unwrap();

    /// Abandoned actions by reason ("exhausted" or "permanent")
    pub static ref QUEUE_ABANDONED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_abandoned_total", METRIC_PREFIX),
        "Total mutations abandoned",
        &["reason"]
    ).unwrap();

    /// Actions currently pending
    pub static ref QUEUE_PENDING: IntGauge = register_int_gauge!(
        format!("{}_queue_pending", METRIC_PREFIX),
        "Number of mutations waiting to be applied"
    ).unwrap();

    /// Drain passes run to completion
    pub static ref QUEUE_DRAINS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_drains_total", METRIC_PREFIX),
        "Total drain passes run"
    ).unwrap();

    /// Drain triggers ignored, by reason ("busy" or "offline")
    pub static ref QUEUE_DRAINS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_drains_skipped_total", METRIC_PREFIX),
        "Total drain triggers that did not start a pass",
        &["reason"]
    ).unwrap();

    /// Drain pass duration
    pub static ref QUEUE_DRAIN_DURATION: Histogram = register_histogram!(
        format!("{}_queue_drain_duration_seconds", METRIC_PREFIX),
        "Drain pass duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // ============================================================================
    // Realtime Metrics
    // ============================================================================

    /// Connection state (0=disconnected, 1=connecting, 2=connected)
    pub static ref REALTIME_STATE: IntGauge = register_int_gauge!(
        format!("{}_realtime_state", METRIC_PREFIX),
        "Realtime connection state (0=disconnected, 1=connecting, 2=connected)"
    ).unwrap();

    /// Successful connections
    pub static ref REALTIME_CONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_realtime_connects_total", METRIC_PREFIX),
        "Total successful realtime connections"
    ).unwrap();

    /// Reconnect attempts scheduled
    pub static ref REALTIME_RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_realtime_reconnect_attempts_total", METRIC_PREFIX),
        "Total reconnect attempts scheduled"
    ).unwrap();

    /// Times the reconnect budget ran out
    pub static ref REALTIME_RECONNECT_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_realtime_reconnect_failed_total", METRIC_PREFIX),
        "Total reconnect sequences that gave up"
    ).unwrap();

    /// Inbound events by type
    pub static ref REALTIME_EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_realtime_events_received_total", METRIC_PREFIX),
        "Total inbound events received by type",
        &["type"]
    ).unwrap();

    /// Inbound frames that could not be mapped to a known event
    pub static ref REALTIME_EVENTS_UNKNOWN: IntCounter = register_int_counter!(
        format!("{}_realtime_events_unknown_total", METRIC_PREFIX),
        "Total inbound frames dropped as unknown or malformed"
    ).unwrap();

    /// Outbound frames written to the transport
    pub static ref REALTIME_OUTBOUND_SENT: IntCounter = register_int_counter!(
        format!("{}_realtime_outbound_sent_total", METRIC_PREFIX),
        "Total outbound frames sent"
    ).unwrap();

    /// Outbound frames dropped while not connected
    pub static ref REALTIME_OUTBOUND_DROPPED: IntCounter = register_int_counter!(
        format!("{}_realtime_outbound_dropped_total", METRIC_PREFIX),
        "Total outbound frames dropped"
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    /// Failed persistence writes or reads
    pub static ref STORE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_store_failures_total", METRIC_PREFIX),
        "Total durable store failures",
        &["operation"]
    ).unwrap();
}
