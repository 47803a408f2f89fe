//! Connection registry for teacher and student endpoints
//!
//! This module provides:
//! - Connection handles keyed by generated ids (never by socket identity)
//! - Role-filtered snapshots for fan-out
//! - Idempotent removal shared by every disconnect path
//! - Connection statistics

mod registry;
mod stats;
mod types;

pub use registry::ConnectionRegistry;
pub use stats::ConnectionStats;
pub use types::{ConnectionHandle, Role, Transport};
