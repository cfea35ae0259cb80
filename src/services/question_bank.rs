//! Read-only access to exams, questions and choices.

use std::collections::HashMap;

use sqlx::{PgConnection, PgExecutor, PgPool};

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        question::{Choice, Question},
    },
    services::policy::QuestionSelection,
};

pub const QUESTION_COLUMNS: &str =
    "id, exam_id, topic_id, question_type, difficulty, content, points, is_active, created_at";

const CHOICE_COLUMNS: &str = "id, question_id, content, is_correct, display_order";

pub async fn fetch_exam<'e>(executor: impl PgExecutor<'e>, exam_id: i64) -> Result<Exam, AppError> {
    sqlx::query_as::<_, Exam>(
        "SELECT id, title, is_active, time_limit_seconds, pass_threshold, language FROM exams WHERE id = $1",
    )
    .bind(exam_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Exam {} not found", exam_id)))
}

pub async fn fetch_question<'e>(
    executor: impl PgExecutor<'e>,
    question_id: i64,
) -> Result<Question, AppError> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {} FROM questions WHERE id = $1",
        QUESTION_COLUMNS
    ))
    .bind(question_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Question {} not found", question_id)))
}

pub async fn fetch_questions(pool: &PgPool, ids: &[i64]) -> Result<HashMap<i64, Question>, sqlx::Error> {
    let rows: Vec<Question> = sqlx::query_as(&format!(
        "SELECT {} FROM questions WHERE id = ANY($1)",
        QUESTION_COLUMNS
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|q| (q.id, q)).collect())
}

pub async fn fetch_choices<'e>(
    executor: impl PgExecutor<'e>,
    question_id: i64,
) -> Result<Vec<Choice>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {} FROM question_choices WHERE question_id = $1 ORDER BY display_order, id",
        CHOICE_COLUMNS
    ))
    .bind(question_id)
    .fetch_all(executor)
    .await
}

/// Choices of many questions at once, keyed by question id.
pub async fn fetch_choices_for(
    pool: &PgPool,
    question_ids: &[i64],
) -> Result<HashMap<i64, Vec<Choice>>, sqlx::Error> {
    let rows: Vec<Choice> = sqlx::query_as(&format!(
        "SELECT {} FROM question_choices WHERE question_id = ANY($1) ORDER BY display_order, id",
        CHOICE_COLUMNS
    ))
    .bind(question_ids)
    .fetch_all(pool)
    .await?;

    let mut by_question: HashMap<i64, Vec<Choice>> = HashMap::new();
    for choice in rows {
        by_question.entry(choice.question_id).or_default().push(choice);
    }
    Ok(by_question)
}

/// Draws the question set for a new session.
///
/// Only active questions of the exam are eligible. An explicit id list must
/// resolve completely; an empty result is never a valid session.
pub async fn select_questions(
    conn: &mut PgConnection,
    exam_id: i64,
    selection: &QuestionSelection,
) -> Result<Vec<Question>, AppError> {
    let base = format!(
        "SELECT {} FROM questions WHERE exam_id = $1 AND is_active",
        QUESTION_COLUMNS
    );

    let questions: Vec<Question> = match selection {
        QuestionSelection::Explicit(ids) => {
            let found: Vec<Question> = sqlx::query_as(&format!("{} AND id = ANY($2)", base))
                .bind(exam_id)
                .bind(ids)
                .fetch_all(&mut *conn)
                .await?;

            if found.len() != ids.len() {
                return Err(AppError::InvalidSelectionCriteria(
                    "some question ids are unknown, inactive or belong to another exam".to_string(),
                ));
            }

            // Keep the caller's order.
            let mut by_id: HashMap<i64, Question> = found.into_iter().map(|q| (q.id, q)).collect();
            ids.iter().filter_map(|id| by_id.remove(id)).collect()
        }
        QuestionSelection::TopicSample { topic_ids, count } => {
            sqlx::query_as(&format!(
                "{} AND topic_id = ANY($2) ORDER BY RANDOM() LIMIT $3",
                base
            ))
            .bind(exam_id)
            .bind(topic_ids)
            .bind(count)
            .fetch_all(&mut *conn)
            .await?
        }
        QuestionSelection::ExamSample { count } => {
            sqlx::query_as(&format!("{} ORDER BY RANDOM() LIMIT $2", base))
                .bind(exam_id)
                .bind(count)
                .fetch_all(&mut *conn)
                .await?
        }
        QuestionSelection::AllActive => {
            sqlx::query_as(&format!("{} ORDER BY id", base))
                .bind(exam_id)
                .fetch_all(&mut *conn)
                .await?
        }
    };

    if questions.is_empty() {
        return Err(AppError::InvalidSelectionCriteria(
            "no active questions match the selection".to_string(),
        ));
    }

    Ok(questions)
}
