//! Graceful shutdown.
//!
//! Sequence:
//! 1. Send a `shutdown` notice to every connection
//! 2. Signal background tasks to stop
//! 3. Give clients time to disconnect on their own
//! 4. Release whatever is still registered
//!
//! [`serve_with_shutdown`] stops accepting connections before step 1, so
//! nothing registers after the notice has gone out.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;

use crate::broadcast::BroadcastEngine;
use crate::config::ShutdownSettings;
use crate::connection_manager::ConnectionRegistry;
use crate::websocket::{OutboundMessage, ServerMessage};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound for delivering the shutdown notice
    pub client_notification_timeout: Duration,
    /// Time clients get to disconnect before being released
    pub drain_timeout: Duration,
    /// Suggested reconnect delay sent to clients
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            reconnect_after_seconds: 5,
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        Self {
            client_notification_timeout: Duration::from_secs(settings.notification_timeout_secs),
            drain_timeout: Duration::from_secs(settings.drain_timeout_secs),
            reconnect_after_seconds: settings.reconnect_after_seconds,
        }
    }
}

pub struct GracefulShutdown {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<BroadcastEngine>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<BroadcastEngine>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(registry, broadcaster, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<BroadcastEngine>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.registry.len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        result.clients_notified = self.notify_clients(reason).await;

        tracing::info!("Phase 2: Signaling background tasks to stop");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Waiting for connections to close");
        result.connections_closed = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 4: Releasing remaining connections");
        result.connections_released = self.registry.close_all();

        result.duration = start.elapsed();
        result.success = true;

        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            connections_released = result.connections_released,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }

    async fn notify_clients(&self, reason: &str) -> usize {
        if self.registry.is_empty() {
            return 0;
        }

        let notice = ServerMessage::shutdown(reason, Some(self.config.reconnect_after_seconds));
        let outbound = match OutboundMessage::preserialized(&notice) {
            Ok(outbound) => outbound,
            Err(_) => OutboundMessage::Raw(notice),
        };

        match timeout(
            self.config.client_notification_timeout,
            self.broadcaster.broadcast_all(outbound),
        )
        .await
        {
            Ok(report) => {
                tracing::info!(
                    notified = report.delivered,
                    failed = report.failed.len(),
                    "Shutdown notifications sent"
                );
                report.delivered
            }
            Err(_) => {
                tracing::warn!("Timed out sending shutdown notifications");
                0
            }
        }
    }

    async fn wait_for_connections_to_close(&self) -> usize {
        let initial = self.registry.len();
        if initial == 0 {
            return 0;
        }

        let registry = self.registry.clone();
        let wait_future = async move {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        let _ = timeout(self.config.drain_timeout, wait_future).await;

        let remaining = self.registry.len();
        if remaining > 0 {
            tracing::warn!(
                remaining_connections = remaining,
                "Some connections did not close gracefully"
            );
        }

        initial.saturating_sub(remaining)
    }
}

/// Serve `app` until `signal` resolves, then run `shutdown`.
///
/// The listener is closed as soon as the signal fires; in-flight requests
/// are drained by axum while the shutdown sequence runs.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    shutdown: GracefulShutdown,
    signal: F,
) -> io::Result<ShutdownResult>
where
    F: Future<Output = &'static str> + Send + 'static,
{
    let (signal_tx, signal_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let reason = signal.await;
                let _ = signal_tx.send(reason);
            })
            .await
    });

    // A server that fails before any signal still releases its connections
    let reason = signal_rx.await.unwrap_or("Server is shutting down");
    let result = shutdown.execute(reason).await;

    server.await.map_err(io::Error::other)??;
    Ok(result)
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Connections that accepted the shutdown notice
    pub clients_notified: usize,
    /// Connections that went away during the drain window
    pub connections_closed: usize,
    /// Connections still registered after the drain window
    pub connections_released: usize,
    pub duration: Duration,
}
