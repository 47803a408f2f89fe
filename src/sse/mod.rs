//! Server-Sent Events fallback for teacher observers.
//!
//! Observers that cannot hold a WebSocket open a one-way stream instead. The
//! stream shares the connection registry with sockets, so it receives the same
//! `update` and `line` snapshots.
//!
//! # Endpoint
//!
//! `GET /sse/teacher?token=<JWT>` or with `Authorization: Bearer <JWT>`
//!
//! # Event Types
//!
//! - `connected` - initial confirmation carrying the connection id
//! - `update` - feedback and questions snapshot
//! - `line` - help line snapshot
//! - `heartbeat` - periodic keepalive
//! - `shutdown` - server is going away

mod handler;

pub use handler::teacher_sse_handler;
