use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::server::AppState;

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::resources::{
    ask_question, clear_feedback, delete_question, help_next, join_line, snapshot,
    submit_feedback,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/feedback", post(submit_feedback).delete(clear_feedback))
                .route("/questions", post(ask_question))
                .route("/questions/{id}", delete(delete_question))
                .route("/line", post(join_line).delete(help_next))
                .route("/snapshot", get(snapshot)),
        )
}
