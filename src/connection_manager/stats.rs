//! Connection statistics

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub teachers: usize,
    pub students: usize,
    pub websocket: usize,
    pub sse: usize,
}
