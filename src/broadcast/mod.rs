//! Fan-out of snapshots and notices to registered connections.
//!
//! The engine never mutates the registry. Every send reports failures back to
//! the caller, which decides whether to unregister the dead connections.

mod engine;

pub use engine::{BroadcastEngine, BroadcastStatsSnapshot, DeliveryError, DeliveryReport};
