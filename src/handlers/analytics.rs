// src/handlers/analytics.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use sqlx::PgPool;

use crate::{error::AppError, services::analytics, utils::jwt::Claims};

/// The caller's performance by topic, question type and difficulty.
pub async fn get_performance(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let records = analytics::performance_for_user(&pool, claims.user_id()?)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load performance records: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(records))
}
