//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection_manager::{ConnectionStats, Role, Transport};
use crate::store::StoreCounts;

use super::{
    BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED,
    CONNECTION_DURATION, DELIVERIES_TOTAL, DELIVERY_FAILURES_TOTAL, HEARTBEAT_DURATION_MS,
    MESSAGES_RECEIVED, MESSAGES_REJECTED, STORE_ENTRIES,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

fn transport_label(transport: Transport) -> &'static str {
    match transport {
        Transport::WebSocket => "websocket",
        Transport::Sse => "sse",
    }
}

pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened(transport: Transport) {
        CONNECTIONS_OPENED
            .with_label_values(&[transport_label(transport)])
            .inc();
    }

    pub fn record_closed(transport: Transport, duration_secs: f64) {
        CONNECTIONS_CLOSED
            .with_label_values(&[transport_label(transport)])
            .inc();
        CONNECTION_DURATION.observe(duration_secs);
    }

    /// Refresh the per-role gauges from a registry snapshot
    pub fn set_active(stats: &ConnectionStats) {
        CONNECTIONS_ACTIVE
            .with_label_values(&[Role::Teacher.as_str()])
            .set(stats.teachers as i64);
        CONNECTIONS_ACTIVE
            .with_label_values(&[Role::Student.as_str()])
            .set(stats.students as i64);
    }
}

pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_received(message_type: &str) {
        MESSAGES_RECEIVED.with_label_values(&[message_type]).inc();
    }

    pub fn record_malformed() {
        MESSAGES_REJECTED.with_label_values(&["malformed"]).inc();
    }

    pub fn record_unhandled() {
        MESSAGES_REJECTED.with_label_values(&["unhandled"]).inc();
    }
}

pub struct BroadcastMetrics;

impl BroadcastMetrics {
    pub fn record_broadcast(message_type: &str) {
        BROADCASTS_TOTAL.with_label_values(&[message_type]).inc();
    }

    pub fn record_delivered(count: u64) {
        DELIVERIES_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        DELIVERY_FAILURES_TOTAL.inc_by(count);
    }
}

pub struct StoreMetrics;

impl StoreMetrics {
    pub fn set_counts(counts: &StoreCounts) {
        STORE_ENTRIES
            .with_label_values(&["feedback"])
            .set(counts.feedback as i64);
        STORE_ENTRIES
            .with_label_values(&["questions"])
            .set(counts.questions as i64);
        STORE_ENTRIES.with_label_values(&["line"]).set(counts.line as i64);
    }
}

pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }
}
