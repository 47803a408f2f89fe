use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::stats::ConnectionStats;
use super::types::{ConnectionHandle, Role, Transport};

/// Tracks every live teacher and student connection
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection under a fresh id.
    ///
    /// The id is re-drawn until it is free, so a live id is never shadowed.
    /// Registering the same channel twice yields two independent entries.
    pub fn register(&self, mut handle: ConnectionHandle) -> Arc<ConnectionHandle> {
        let handle = loop {
            match self.connections.entry(handle.id) {
                Entry::Vacant(slot) => {
                    let handle = Arc::new(handle);
                    slot.insert(handle.clone());
                    break handle;
                }
                Entry::Occupied(_) => handle.id = Uuid::new_v4(),
            }
        };

        tracing::info!(
            connection_id = %handle.id,
            role = %handle.role,
            label = ?handle.label,
            "Connection registered"
        );

        handle
    }

    /// Remove a connection and signal its task to stop.
    ///
    /// Safe to call any number of times, from any disconnect path.
    /// Returns whether this call removed the entry.
    pub fn unregister(&self, connection_id: Uuid) -> bool {
        let Some((_, handle)) = self.connections.remove(&connection_id) else {
            return false;
        };

        handle.close();
        tracing::info!(
            connection_id = %connection_id,
            role = %handle.role,
            label = ?handle.label,
            "Connection unregistered"
        );
        true
    }

    /// Snapshot of the connections currently registered with `role`
    pub fn list(&self, role: Role) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().role == role)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    pub fn get(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn contains(&self, connection_id: Uuid) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn stats(&self) -> ConnectionStats {
        let mut stats = ConnectionStats::default();
        for entry in self.connections.iter() {
            let handle = entry.value();
            stats.total_connections += 1;
            match handle.role {
                Role::Teacher => stats.teachers += 1,
                Role::Student => stats.students += 1,
            }
            match handle.transport {
                Transport::WebSocket => stats.websocket += 1,
                Transport::Sse => stats.sse += 1,
            }
        }
        stats
    }

    /// WebSocket connections inactive for longer than the timeout.
    ///
    /// SSE streams never send, so their liveness is judged by failed sends only.
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| entry.value().transport == Transport::WebSocket)
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove stale connections and return the count of removed connections
    pub fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.find_stale_connections(timeout_secs);

        stale
            .into_iter()
            .filter(|conn_id| {
                tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
                self.unregister(*conn_id)
            })
            .count()
    }

    /// Release every entry, closing each connection. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.connections.iter().map(|r| *r.key()).collect();
        ids.into_iter().filter(|id| self.unregister(*id)).count()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::mpsc;

    use crate::websocket::OutboundMessage;

    fn channel() -> mpsc::Sender<OutboundMessage> {
        mpsc::channel(8).0
    }

    #[test]
    fn test_register_same_channel_twice_yields_distinct_ids() {
        let registry = ConnectionRegistry::new();
        let tx = channel();

        let ids: HashSet<Uuid> = (0..10)
            .map(|_| registry.register(ConnectionHandle::new(Role::Teacher, tx.clone())).id)
            .collect();

        assert_eq!(ids.len(), 10);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_register_redraws_colliding_id() {
        let registry = ConnectionRegistry::new();
        let first = registry.register(ConnectionHandle::new(Role::Student, channel()));

        let mut clash = ConnectionHandle::new(Role::Student, channel());
        clash.id = first.id;
        let second = registry.register(clash);

        assert_ne!(first.id, second.id);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let handle = registry.register(ConnectionHandle::new(Role::Teacher, channel()));

        assert!(registry.unregister(handle.id));
        assert!(!registry.unregister(handle.id));
        assert!(!registry.unregister(Uuid::new_v4()));
        assert!(registry.is_empty());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_list_filters_by_role() {
        let registry = ConnectionRegistry::new();
        let teacher = registry.register(ConnectionHandle::new(Role::Teacher, channel()));
        registry.register(ConnectionHandle::new(Role::Student, channel()));
        registry.register(ConnectionHandle::new(Role::Student, channel()));

        let teachers = registry.list(Role::Teacher);
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].id, teacher.id);
        assert_eq!(registry.list(Role::Student).len(), 2);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let registry = ConnectionRegistry::new();
        for _ in 0..3 {
            registry.register(ConnectionHandle::new(Role::Teacher, channel()));
        }

        let teachers = registry.list(Role::Teacher);
        for teacher in &teachers {
            registry.unregister(teacher.id);
            registry.register(ConnectionHandle::new(Role::Teacher, channel()));
        }

        assert_eq!(teachers.len(), 3);
        assert_eq!(registry.list(Role::Teacher).len(), 3);
    }

    #[test]
    fn test_stats() {
        let registry = ConnectionRegistry::new();
        registry.register(ConnectionHandle::new(Role::Teacher, channel()).with_transport(Transport::Sse));
        registry.register(ConnectionHandle::new(Role::Teacher, channel()));
        registry.register(ConnectionHandle::new(Role::Student, channel()));

        let stats = registry.stats();
        assert_eq!(
            stats,
            ConnectionStats {
                total_connections: 3,
                teachers: 2,
                students: 1,
                websocket: 2,
                sse: 1,
            }
        );
    }

    #[test]
    fn test_cleanup_stale_connections_skips_sse() {
        let registry = ConnectionRegistry::new();
        let idle_ws = registry.register(ConnectionHandle::new(Role::Student, channel()));
        let idle_sse = registry.register(
            ConnectionHandle::new(Role::Teacher, channel()).with_transport(Transport::Sse),
        );
        let fresh = registry.register(ConnectionHandle::new(Role::Teacher, channel()));

        let long_ago = Utc::now() - chrono::Duration::seconds(600);
        idle_ws.set_last_activity(long_ago);
        idle_sse.set_last_activity(long_ago);

        assert_eq!(registry.cleanup_stale_connections(120), 1);
        assert!(!registry.contains(idle_ws.id));
        assert!(registry.contains(idle_sse.id));
        assert!(registry.contains(fresh.id));
    }

    #[test]
    fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|_| registry.register(ConnectionHandle::new(Role::Student, channel())))
            .collect();

        assert_eq!(registry.close_all(), 4);
        assert!(registry.is_empty());
        assert!(handles.iter().all(|h| h.is_closed()));
    }
}
