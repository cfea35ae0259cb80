// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Kind of question; decides between deterministic and AI scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "question_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Mcq,
    OpenEnded,
    Calculation,
}

impl QuestionType {
    pub fn is_mcq(self) -> bool {
        matches!(self, QuestionType::Mcq)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::OpenEnded => "OPEN_ENDED",
            QuestionType::Calculation => "CALCULATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "difficulty_level", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        }
    }
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: i64,
    pub topic_id: Option<i64>,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,

    /// The text content of the question.
    pub content: String,

    /// Base point value, before any per-session weight.
    pub points: f64,

    /// Inactive questions are never selected for new sessions.
    pub is_active: bool,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Represents the 'question_choices' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub question_id: i64,
    pub content: String,
    pub is_correct: bool,
    pub display_order: i32,
}

/// Choice as shown to the candidate (correct flag stripped).
#[derive(Debug, Clone, Serialize)]
pub struct PublicChoice {
    pub id: i64,
    pub content: String,
}

impl From<&Choice> for PublicChoice {
    fn from(c: &Choice) -> Self {
        PublicChoice {
            id: c.id,
            content: c.content.clone(),
        }
    }
}

/// DTO for sending a question to the client inside a session.
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub content: String,
    pub topic_id: Option<i64>,
    pub difficulty: Difficulty,
    pub choices: Vec<PublicChoice>,
}
