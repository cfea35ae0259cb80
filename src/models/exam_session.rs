// src/models/exam_session.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::{question::PublicQuestion, user_answer::AnswerView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "session_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Practice,
    RealExam,
    /// Legacy; behaves according to the stored evaluation mode.
    TimedExam,
    /// Legacy; behaves according to the stored evaluation mode.
    Assessment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "exam_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamType {
    #[default]
    Full,
    TopicBased,
}

/// When AI scoring of free-text answers happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "evaluation_mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationMode {
    RealTime,
    EndOfExam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "session_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

/// Represents the 'exam_sessions' table.
///
/// `evaluation_mode` is resolved once at creation and never recomputed.
/// `total_possible_score` is frozen at question assignment.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExamSession {
    pub id: i64,
    pub user_id: i64,
    pub exam_id: i64,
    pub session_type: SessionType,
    pub exam_type: ExamType,
    pub evaluation_mode: EvaluationMode,
    pub is_timed: bool,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub expected_end_time: chrono::DateTime<chrono::Utc>,
    pub actual_end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub time_limit_seconds: i32,
    pub total_possible_score: f64,
    pub total_score_achieved: Option<f64>,
    pub pass_threshold: f64,
    pub passed: Option<bool>,
    pub status: SessionStatus,
    pub learning_material_viewed: bool,
}

impl ExamSession {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Scores stay hidden from the candidate until a real exam is over.
    pub fn hides_scores(&self) -> bool {
        self.is_active() && self.evaluation_mode == EvaluationMode::EndOfExam
    }

    pub fn requires_learning_material(&self) -> bool {
        self.session_type == SessionType::Practice && !self.learning_material_viewed
    }

    pub fn time_remaining_seconds(&self, now: chrono::DateTime<chrono::Utc>) -> Option<i64> {
        if !self.is_timed || !self.is_active() {
            return None;
        }
        Some((self.expected_end_time - now).num_seconds().max(0))
    }
}

/// Represents the 'exam_session_questions' join table.
/// `points` is the question's value copied at assignment time.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SessionQuestion {
    pub session_id: i64,
    pub question_id: i64,
    pub display_order: i32,
    pub question_weight: f64,
    pub points: f64,
}

/// DTO for creating a session.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSessionRequest {
    pub exam_id: i64,
    pub session_type: SessionType,
    #[serde(default)]
    pub exam_type: ExamType,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub topic_ids: Vec<i64>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub question_ids: Vec<i64>,
    #[validate(range(min = 1, max = 500))]
    pub num_questions: Option<i64>,
    /// Seconds. Ignored for practice sessions, range-checked for the rest
    /// when the policy is resolved.
    pub time_limit: Option<i32>,
    /// Only honoured for legacy session types.
    pub is_timed: Option<bool>,
    /// Only honoured for legacy session types.
    pub evaluation_mode: Option<EvaluationMode>,
}

/// One assigned question with the caller's current answer.
#[derive(Debug, Serialize)]
pub struct SessionQuestionView {
    pub display_order: i32,
    pub question_weight: f64,
    pub question: PublicQuestion,
    pub answer: Option<AnswerView>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: ExamSession,
    pub time_remaining_seconds: Option<i64>,
    pub requires_learning_material: bool,
    pub questions: Vec<SessionQuestionView>,
}

/// Result of `complete` (and of the admin rescore).
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub session_id: i64,
    pub status: SessionStatus,
    pub total_score_achieved: f64,
    pub total_possible_score: f64,
    pub passed: bool,
    pub answers_scored: usize,
    pub duplicates_removed: usize,
    pub evaluations_failed: usize,
    pub fallback_scored: usize,
    /// `None` when analytics aggregation failed; completion still stands.
    pub analytics_records: Option<usize>,
}
