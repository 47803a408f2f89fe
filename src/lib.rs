// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Classroom core
pub mod broadcast;
pub mod connection_manager;
pub mod router;
pub mod store;

// Transports and HTTP surface
pub mod api;
pub mod server;
pub mod sse;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
