// src/handlers/user_answer.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError, models::user_answer::CreateUserAnswerRequest, services::answers,
    state::AppState, utils::jwt::Claims,
};

/// Generic answer endpoint.
///
/// With a `session_id` it behaves exactly like the session submit endpoint.
/// Without one the answer is stored and evaluated in the background.
pub async fn create_user_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateUserAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let answer = answers::upsert_answer(
        &state,
        claims.user_id()?,
        payload.session_id,
        payload.question_id,
        payload.payload,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(answer)))
}

/// Re-queues an answer whose evaluation failed. 202: the result arrives later.
pub async fn retry_evaluation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let answer = answers::retry_evaluation(&state, claims.user_id()?, id).await?;
    Ok((StatusCode::ACCEPTED, Json(answer)))
}
