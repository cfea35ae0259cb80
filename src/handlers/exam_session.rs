// src/handlers/exam_session.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::{exam_session::CreateSessionRequest, user_answer::SubmitAnswerRequest},
    services::{answers, exam_session},
    state::AppState,
    utils::jwt::Claims,
};

/// Creates a new exam session for the caller.
///
/// * Resolves the question set and the mode defaults.
/// * Returns 201 with the session detail.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let session = exam_session::create_session(&state.pool, user_id, &payload).await?;
    let detail = exam_session::session_detail(&state.pool, session).await?;

    Ok((StatusCode::CREATED, Json(detail)))
}

/// Lists the caller's sessions, newest first.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = exam_session::list_sessions(&state.pool, claims.user_id()?).await?;
    Ok(Json(sessions))
}

/// Retrieves one session with its questions and current answer state.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = exam_session::load_session_for_user(&state.pool, id, claims.user_id()?).await?;
    let detail = exam_session::session_detail(&state.pool, session).await?;
    Ok(Json(detail))
}

/// Stores (or replaces) the caller's answer to one question of the session.
///
/// Real-time sessions evaluate free-text answers before responding; an
/// evaluator failure still returns 200 with an ERROR-state answer.
pub async fn submit_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let answer = answers::upsert_answer(
        &state,
        claims.user_id()?,
        Some(id),
        payload.question_id,
        payload.payload,
    )
    .await?;

    Ok(Json(answer))
}

/// Finalizes the session and returns the aggregate result.
pub async fn complete_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = exam_session::complete_session(&state, claims.user_id()?, id).await?;
    Ok(Json(result))
}

pub async fn abandon_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = exam_session::abandon_session(&state.pool, claims.user_id()?, id).await?;
    Ok(Json(session))
}

pub async fn learning_material_viewed(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session =
        exam_session::mark_learning_material_viewed(&state.pool, claims.user_id()?, id).await?;

    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "learning_material_viewed": session.learning_material_viewed,
        "requires_learning_material": session.requires_learning_material(),
    })))
}
