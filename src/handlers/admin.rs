// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{error::AppError, services::exam_session, state::AppState, utils::jwt::Claims};

/// Re-derives scores of a completed session from stored raw scores.
/// Admin only.
pub async fn rescore_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(session_id = id, admin = %claims.sub, "rescore requested");

    let result = exam_session::rescore_session(&state, id).await?;
    Ok(Json(result))
}
