//! REST endpoints for clients without a socket.
//!
//! Every mutation goes through the message router, so REST and socket
//! actions broadcast identically.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::{extract_token, Claims};
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::store::{ClassroomSnapshot, QuestionEntry};

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub student: String,
    pub feedback: String,
}

#[derive(Debug, Deserialize)]
pub struct QuestionRequest {
    pub student: String,
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    pub student: String,
}

#[derive(Debug, Serialize)]
pub struct NextStudentResponse {
    pub student: String,
}

fn require_teacher(state: &AppState, headers: &HeaderMap) -> Result<Claims> {
    let token = extract_token(None, headers)
        .ok_or_else(|| AppError::Auth("Missing authentication token".to_string()))?;
    state.jwt_validator.authorize_teacher(&token)
}

/// POST /api/v1/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<StatusCode> {
    state
        .router
        .submit_feedback(request.student, request.feedback)
        .await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/feedback (teacher)
pub async fn clear_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    let claims = require_teacher(&state, &headers)?;
    tracing::info!(subject = %claims.sub, "Clearing feedback over REST");

    state.router.clear_feedback().await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/questions
pub async fn ask_question(
    State(state): State<AppState>,
    Json(request): Json<QuestionRequest>,
) -> Result<(StatusCode, Json<QuestionEntry>)> {
    let entry = state
        .router
        .ask_question(request.student, request.question)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /api/v1/questions/{id}. Unknown ids are accepted.
pub async fn delete_question(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.router.delete_question(&id).await;
    StatusCode::NO_CONTENT
}

/// POST /api/v1/line
pub async fn join_line(
    State(state): State<AppState>,
    Json(request): Json<LineRequest>,
) -> Result<StatusCode> {
    state.router.join_line(request.student).await?;
    Ok(StatusCode::CREATED)
}

/// DELETE /api/v1/line (teacher): pop the next student
pub async fn help_next(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<NextStudentResponse>> {
    require_teacher(&state, &headers)?;

    state
        .router
        .help_next()
        .await
        .map(|student| Json(NextStudentResponse { student }))
        .ok_or_else(|| AppError::NotFound("Help line is empty".to_string()))
}

/// GET /api/v1/snapshot (teacher)
pub async fn snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClassroomSnapshot>> {
    require_teacher(&state, &headers)?;
    Ok(Json(state.store.full_snapshot().await))
}
