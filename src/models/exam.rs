// src/models/exam.rs

use serde::Serialize;
use sqlx::FromRow;

/// Represents the 'exams' table. Read-only from the session engine.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    pub is_active: bool,
    /// Default time limit for real exams, when the client sends none.
    pub time_limit_seconds: Option<i32>,
    /// Fraction (0..=1) of the possible score needed to pass.
    pub pass_threshold: f64,
    pub language: String,
}
