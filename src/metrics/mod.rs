//! Prometheus metrics for the classroom service.
//!
//! - Connection metrics (active per role, opened/closed per transport, duration)
//! - Inbound message metrics (by envelope type, rejections)
//! - Broadcast metrics (fan-outs by kind, deliveries, failures)
//! - Store size gauges
//! - Heartbeat round duration

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, HeartbeatMetrics, MessageMetrics,
    StoreMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "classroom";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Active connections by role
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of registered connections",
        &["role"]
    ).unwrap();

    pub static ref CONNECTIONS_OPENED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections opened",
        &["transport"]
    ).unwrap();

    pub static ref CONNECTIONS_CLOSED: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections closed",
        &["transport"]
    ).unwrap();

    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Connection lifetime in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0]
    ).unwrap();

    // ============================================================================
    // Inbound Message Metrics
    // ============================================================================

    pub static ref MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Inbound client messages by envelope type",
        &["type"]
    ).unwrap();

    pub static ref MESSAGES_REJECTED: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_rejected_total", METRIC_PREFIX),
        "Inbound client messages that were dropped",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Fan-outs by message type",
        &["type"]
    ).unwrap();

    pub static ref DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Messages accepted by connection channels"
    ).unwrap();

    pub static ref DELIVERY_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_delivery_failures_total", METRIC_PREFIX),
        "Sends that failed because the peer was gone or too slow"
    ).unwrap();

    // ============================================================================
    // Store Metrics
    // ============================================================================

    pub static ref STORE_ENTRIES: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_store_entries", METRIC_PREFIX),
        "Entries per classroom collection",
        &["collection"]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Time to push one heartbeat round in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();
}
