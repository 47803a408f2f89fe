use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, Role};
use crate::metrics::BroadcastMetrics;
use crate::websocket::{OutboundMessage, ServerMessage};

/// Maximum number of concurrent message sends
const MAX_CONCURRENT_SENDS: usize = 100;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is closed")]
    Closed(Uuid),
    #[error("connection {connection_id} did not accept the message within {timeout:?}")]
    Timeout {
        connection_id: Uuid,
        timeout: Duration,
    },
}

impl DeliveryError {
    pub fn connection_id(&self) -> Uuid {
        match self {
            DeliveryError::Closed(id) => *id,
            DeliveryError::Timeout { connection_id, .. } => *connection_id,
        }
    }
}

/// Outcome of a fan-out
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeliveryReport {
    /// Number of connections the message was handed to
    pub delivered: usize,
    /// Connections whose send failed
    pub failed: Vec<Uuid>,
}

impl DeliveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, result: Result<(), DeliveryError>) {
        match result {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                tracing::debug!(connection_id = %e.connection_id(), error = %e, "Broadcast send failed");
                self.failed.push(e.connection_id());
            }
        }
    }
}

#[derive(Debug, Default)]
struct BroadcastStats {
    broadcasts: AtomicU64,
    direct_sends: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStatsSnapshot {
    pub broadcasts: u64,
    pub direct_sends: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Delivers messages to one connection or to every connection of a role
pub struct BroadcastEngine {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
    stats: BroadcastStats,
}

impl BroadcastEngine {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
            stats: BroadcastStats::default(),
        }
    }

    pub fn stats(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            direct_sends: self.stats.direct_sends.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Best-effort send to a single connection.
    ///
    /// A failure is returned, never acted upon: the registry is left untouched.
    pub async fn push_to(
        &self,
        handle: &ConnectionHandle,
        message: OutboundMessage,
    ) -> Result<(), DeliveryError> {
        self.stats.direct_sends.fetch_add(1, Ordering::Relaxed);

        let result = deliver(handle, message, self.send_timeout).await;
        match &result {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                BroadcastMetrics::record_delivered(1);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                BroadcastMetrics::record_failed(1);
                tracing::debug!(connection_id = %handle.id, error = %e, "Direct send failed");
            }
        }
        result
    }

    /// Send a server message to a single connection
    pub async fn send_to(
        &self,
        handle: &ConnectionHandle,
        message: ServerMessage,
    ) -> Result<(), DeliveryError> {
        self.push_to(handle, OutboundMessage::Raw(message)).await
    }

    /// Send the same serialized payload to every connection with `role`.
    #[tracing::instrument(
        name = "broadcast.role",
        skip(self, message),
        fields(role = %role, message_type = message.message_type().as_str())
    )]
    pub async fn broadcast_to_role(&self, role: Role, message: &ServerMessage) -> DeliveryReport {
        let connections = self.registry.list(role);
        let outbound = preserialize(message);
        BroadcastMetrics::record_broadcast(message.message_type().as_str());

        self.fan_out(&connections, outbound).await
    }

    /// Send to every registered connection regardless of role
    pub async fn broadcast_all(&self, message: OutboundMessage) -> DeliveryReport {
        let connections = self.registry.all();
        BroadcastMetrics::record_broadcast(message.message_type().as_str());

        self.fan_out(&connections, message).await
    }

    async fn fan_out(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: OutboundMessage,
    ) -> DeliveryReport {
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);
        let report = self.send_to_connections(connections, message).await;

        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.stats
            .failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        BroadcastMetrics::record_delivered(report.delivered as u64);
        BroadcastMetrics::record_failed(report.failed.len() as u64);

        tracing::debug!(
            recipients = connections.len(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Broadcast completed"
        );

        report
    }

    /// Send to a list of connections concurrently with bounded parallelism.
    /// One slow or dead connection never holds back the others.
    async fn send_to_connections(
        &self,
        connections: &[Arc<ConnectionHandle>],
        message: OutboundMessage,
    ) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if connections.is_empty() {
            return report;
        }

        let mut futures = FuturesUnordered::new();

        for conn in connections {
            let conn = conn.clone();
            let msg = message.clone();
            let send_timeout = self.send_timeout;
            futures.push(async move { deliver(&conn, msg, send_timeout).await });

            if futures.len() >= MAX_CONCURRENT_SENDS {
                if let Some(result) = futures.next().await {
                    report.record(result);
                }
            }
        }

        while let Some(result) = futures.next().await {
            report.record(result);
        }

        report
    }
}

/// Serialize once so every recipient gets identical bytes
fn preserialize(message: &ServerMessage) -> OutboundMessage {
    match OutboundMessage::preserialized(message) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::error!(error = %e, "Failed to pre-serialize message, falling back to per-connection serialization");
            OutboundMessage::Raw(message.clone())
        }
    }
}

async fn deliver(
    handle: &ConnectionHandle,
    message: OutboundMessage,
    send_timeout: Duration,
) -> Result<(), DeliveryError> {
    match timeout(send_timeout, handle.send_outbound(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(DeliveryError::Closed(handle.id)),
        Err(_) => Err(DeliveryError::Timeout {
            connection_id: handle.id,
            timeout: send_timeout,
        }),
    }
}
