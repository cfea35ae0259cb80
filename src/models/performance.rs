// src/models/performance.rs

use serde::Serialize;
use sqlx::FromRow;

/// Grouping axis for performance rollups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Topic,
    QuestionType,
    Difficulty,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Topic => "topic",
            Dimension::QuestionType => "question_type",
            Dimension::Difficulty => "difficulty",
        }
    }
}

/// One user's performance over many sessions, summed from 'performance_records'.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PerformanceSummary {
    pub dimension: String,
    pub dimension_key: String,
    pub sessions: i64,
    pub attempted: i64,
    pub correct: i64,
    pub score: f64,
    pub possible: f64,
}
