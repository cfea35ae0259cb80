// src/models/user_answer.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "evaluation_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    Pending,
    Evaluated,
    Error,
    McqScored,
    NotApplicable,
}

/// Represents the 'user_answers' table.
/// Selected MCQ choices live in 'user_answer_choices' and are loaded separately.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserAnswer {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    /// `None` for standalone evaluation requests.
    pub session_id: Option<i64>,
    pub answer_text: Option<String>,
    pub calculation_input: Option<serde_json::Value>,
    pub raw_score: Option<f64>,
    pub weighted_score: Option<f64>,
    pub max_possible_score: f64,
    pub is_correct: Option<bool>,
    pub evaluation_status: EvaluationStatus,
    pub ai_feedback: Option<String>,
    pub retry_count: i32,
    pub submission_time: chrono::DateTime<chrono::Utc>,
}

/// What the candidate submitted for one question.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct AnswerPayload {
    #[validate(length(max = 20000))]
    pub answer_text: Option<String>,
    pub calculation_input: Option<serde_json::Value>,
    #[serde(default)]
    #[validate(length(max = 50))]
    pub selected_choice_ids: Vec<i64>,
}

impl AnswerPayload {
    /// True when the payload carries anything an evaluator could look at.
    pub fn has_content(&self) -> bool {
        self.answer_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
            || self
                .calculation_input
                .as_ref()
                .is_some_and(|v| !v.is_null())
            || !self.selected_choice_ids.is_empty()
    }
}

/// Body of `POST /exam-sessions/{id}/submit_answer`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: i64,
    #[serde(flatten)]
    #[validate(nested)]
    pub payload: AnswerPayload,
}

/// Body of `POST /user-answers`. `session_id` is optional.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserAnswerRequest {
    pub session_id: Option<i64>,
    pub question_id: i64,
    #[serde(flatten)]
    #[validate(nested)]
    pub payload: AnswerPayload,
}

/// Answer as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerView {
    pub id: i64,
    pub question_id: i64,
    pub session_id: Option<i64>,
    pub answer_text: Option<String>,
    pub calculation_input: Option<serde_json::Value>,
    pub selected_choice_ids: Vec<i64>,
    pub raw_score: Option<f64>,
    pub weighted_score: Option<f64>,
    pub max_possible_score: f64,
    pub is_correct: Option<bool>,
    pub evaluation_status: EvaluationStatus,
    pub ai_feedback: Option<String>,
    pub retry_count: i32,
    pub submission_time: chrono::DateTime<chrono::Utc>,
}

impl AnswerView {
    pub fn new(answer: UserAnswer, selected_choice_ids: Vec<i64>) -> Self {
        AnswerView {
            id: answer.id,
            question_id: answer.question_id,
            session_id: answer.session_id,
            answer_text: answer.answer_text,
            calculation_input: answer.calculation_input,
            selected_choice_ids,
            raw_score: answer.raw_score,
            weighted_score: answer.weighted_score,
            max_possible_score: answer.max_possible_score,
            is_correct: answer.is_correct,
            evaluation_status: answer.evaluation_status,
            ai_feedback: answer.ai_feedback,
            retry_count: answer.retry_count,
            submission_time: answer.submission_time,
        }
    }

    /// Strips scoring so an in-progress real exam leaks nothing.
    pub fn redacted(mut self) -> Self {
        self.raw_score = None;
        self.weighted_score = None;
        self.is_correct = None;
        self.ai_feedback = None;
        self
    }
}
