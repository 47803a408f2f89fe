use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::broadcast::BroadcastEngine;
use crate::config::WebSocketConfig;
use crate::connection_manager::ConnectionRegistry;
use crate::metrics::{ConnectionMetrics, HeartbeatMetrics};
use crate::websocket::OutboundMessage;

/// Background task for heartbeat and connection cleanup
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<BroadcastEngine>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<BroadcastEngine>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            broadcaster,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let heartbeat_interval = Duration::from_secs(self.config.heartbeat_interval);
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval);
        let connection_timeout = self.config.connection_timeout;

        let mut heartbeat_timer = tokio::time::interval(heartbeat_interval);
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        heartbeat_timer.tick().await;
        cleanup_timer.tick().await;

        tracing::info!(
            heartbeat_interval_secs = self.config.heartbeat_interval,
            cleanup_interval_secs = self.config.cleanup_interval,
            connection_timeout_secs = connection_timeout,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = heartbeat_timer.tick() => {
                    self.send_heartbeats().await;
                }
                _ = cleanup_timer.tick() => {
                    self.cleanup_stale_connections(connection_timeout);
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Ping every connection. Sockets get a ping frame, SSE streams a
    /// heartbeat event. Connections that cannot take the ping are dropped.
    async fn send_heartbeats(&self) {
        if self.registry.is_empty() {
            return;
        }

        let start = Instant::now();
        let report = self.broadcaster.broadcast_all(OutboundMessage::Ping).await;

        for id in &report.failed {
            tracing::debug!(connection_id = %id, "Heartbeat failed, dropping connection");
            self.registry.unregister(*id);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        HeartbeatMetrics::record_duration_ms(elapsed_ms);
        ConnectionMetrics::set_active(&self.registry.stats());

        tracing::debug!(
            sent = report.delivered,
            failed = report.failed.len(),
            elapsed_ms = elapsed_ms,
            "Heartbeat round completed"
        );

        if elapsed_ms > (self.config.heartbeat_interval * 1000 / 2) {
            tracing::warn!(
                elapsed_ms = elapsed_ms,
                heartbeat_interval_ms = self.config.heartbeat_interval * 1000,
                "Heartbeat round took more than 50% of interval"
            );
        }
    }

    fn cleanup_stale_connections(&self, timeout_secs: u64) {
        let removed = self.registry.cleanup_stale_connections(timeout_secs);

        if removed > 0 {
            ConnectionMetrics::set_active(&self.registry.stats());
            tracing::info!(
                removed = removed,
                timeout_secs = timeout_secs,
                "Cleaned up stale connections"
            );
        }
    }
}
