//! Creation-time policy: mode-derived defaults and question selection.
//!
//! Both are resolved once, before anything is persisted, so the rest of the
//! engine only ever reads the stored result.

use crate::{
    config::{
        DEFAULT_TIME_LIMIT_SECS, MAX_TIME_LIMIT_SECS, MIN_TIME_LIMIT_SECS,
        PRACTICE_TIME_LIMIT_SECS,
    },
    error::AppError,
    models::{
        exam::Exam,
        exam_session::{CreateSessionRequest, EvaluationMode, ExamType, SessionType},
    },
};

/// Timing and evaluation settings a new session is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub is_timed: bool,
    pub time_limit_seconds: i32,
    pub evaluation_mode: EvaluationMode,
}

/// Applies the per-session-type defaults.
///
/// Practice and real exams ignore conflicting client input. Legacy types
/// keep whatever the client asked for. A client time limit is only checked
/// for the types that use it.
pub fn resolve_policy(req: &CreateSessionRequest, exam: &Exam) -> Result<SessionPolicy, AppError> {
    if req.session_type == SessionType::Practice {
        return Ok(SessionPolicy {
            is_timed: false,
            time_limit_seconds: PRACTICE_TIME_LIMIT_SECS,
            evaluation_mode: EvaluationMode::RealTime,
        });
    }

    if let Some(limit) = req.time_limit {
        if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&limit) {
            return Err(AppError::BadRequest(format!(
                "time_limit must be between {} and {} seconds",
                MIN_TIME_LIMIT_SECS, MAX_TIME_LIMIT_SECS
            )));
        }
    }

    let requested_limit = req
        .time_limit
        .or(exam.time_limit_seconds)
        .unwrap_or(DEFAULT_TIME_LIMIT_SECS);

    let policy = match req.session_type {
        SessionType::RealExam => SessionPolicy {
            is_timed: true,
            time_limit_seconds: requested_limit,
            evaluation_mode: EvaluationMode::EndOfExam,
        },
        legacy => SessionPolicy {
            is_timed: req.is_timed.unwrap_or(legacy == SessionType::TimedExam),
            time_limit_seconds: requested_limit,
            evaluation_mode: req.evaluation_mode.unwrap_or(EvaluationMode::RealTime),
        },
    };
    Ok(policy)
}

/// How the question set of a new session is drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionSelection {
    /// Exactly these questions, in this order.
    Explicit(Vec<i64>),
    /// `count` random active questions from the given topics.
    TopicSample { topic_ids: Vec<i64>, count: i64 },
    /// `count` random active questions from the whole exam.
    ExamSample { count: i64 },
    /// Every active question in the exam.
    AllActive,
}

pub fn resolve_selection(req: &CreateSessionRequest) -> Result<QuestionSelection, AppError> {
    if !req.question_ids.is_empty() {
        let mut seen = std::collections::HashSet::new();
        let ids: Vec<i64> = req
            .question_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        return Ok(QuestionSelection::Explicit(ids));
    }

    if let Some(count) = req.num_questions {
        if count < 1 {
            return Err(AppError::InvalidSelectionCriteria(
                "num_questions must be at least 1".to_string(),
            ));
        }
    }

    match (req.exam_type, req.num_questions) {
        (ExamType::TopicBased, Some(count)) if !req.topic_ids.is_empty() => {
            let mut topic_ids = req.topic_ids.clone();
            topic_ids.sort_unstable();
            topic_ids.dedup();
            Ok(QuestionSelection::TopicSample { topic_ids, count })
        }
        (ExamType::TopicBased, _) => Err(AppError::InvalidSelectionCriteria(
            "topic-based sessions need topic_ids and num_questions".to_string(),
        )),
        (ExamType::Full, Some(count)) => Ok(QuestionSelection::ExamSample { count }),
        (ExamType::Full, None) => Ok(QuestionSelection::AllActive),
    }
}
