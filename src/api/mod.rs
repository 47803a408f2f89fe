//! HTTP API: REST mirror of the socket actions plus health, stats and metrics.

mod health;
mod metrics;
mod resources;
mod routes;

pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use resources::{
    ask_question, clear_feedback, delete_question, help_next, join_line, snapshot,
    submit_feedback,
};
pub use routes::api_routes;
