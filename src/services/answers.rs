//! Answer intake: the single upsert path used by every submission endpoint,
//! manual re-evaluation, and the background reconcile job.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        exam_session::{EvaluationMode, SessionStatus},
        question::{Choice, Question},
        user_answer::{AnswerPayload, AnswerView, EvaluationStatus, UserAnswer},
    },
    services::{
        evaluator::{AnswerEvaluator, EvaluationRequest},
        exam_session, question_bank,
        scoring::{self, McqScore},
    },
    state::AppState,
    utils::text::normalize_answer_text,
};

pub const ANSWER_COLUMNS: &str = "id, user_id, question_id, session_id, answer_text, calculation_input, \
     raw_score, weighted_score, max_possible_score, is_correct, evaluation_status, ai_feedback, \
     retry_count, submission_time";

#[derive(FromRow)]
struct SelectedChoice {
    answer_id: i64,
    choice_id: i64,
}

/// Selected MCQ choice ids per answer id.
pub async fn selected_choices<'e>(
    executor: impl PgExecutor<'e>,
    answer_ids: &[i64],
) -> Result<HashMap<i64, Vec<i64>>, sqlx::Error> {
    let rows: Vec<SelectedChoice> = sqlx::query_as(
        "SELECT answer_id, choice_id FROM user_answer_choices WHERE answer_id = ANY($1) ORDER BY choice_id",
    )
    .bind(answer_ids)
    .fetch_all(executor)
    .await?;

    let mut by_answer: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        by_answer.entry(row.answer_id).or_default().push(row.choice_id);
    }
    Ok(by_answer)
}

pub fn answer_has_content(answer: &UserAnswer, selected: &[i64]) -> bool {
    answer
        .answer_text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty())
        || answer
            .calculation_input
            .as_ref()
            .is_some_and(|v| !v.is_null())
        || !selected.is_empty()
}

/// Writes the scoring columns of an existing answer.
pub async fn update_answer_scores(
    conn: &mut PgConnection,
    answer: &UserAnswer,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE user_answers
        SET raw_score = $1, weighted_score = $2, is_correct = $3,
            evaluation_status = $4, ai_feedback = $5
        WHERE id = $6
        "#,
    )
    .bind(answer.raw_score)
    .bind(answer.weighted_score)
    .bind(answer.is_correct)
    .bind(answer.evaluation_status)
    .bind(&answer.ai_feedback)
    .bind(answer.id)
    .execute(conn)
    .await?;
    Ok(())
}

fn draft_answer(
    user_id: i64,
    question_id: i64,
    session_id: Option<i64>,
    payload: &AnswerPayload,
    max_possible_score: f64,
) -> UserAnswer {
    UserAnswer {
        id: 0,
        user_id,
        question_id,
        session_id,
        answer_text: payload.answer_text.clone(),
        calculation_input: payload.calculation_input.clone().filter(|v| !v.is_null()),
        raw_score: None,
        weighted_score: None,
        max_possible_score,
        is_correct: None,
        evaluation_status: EvaluationStatus::Pending,
        ai_feedback: None,
        retry_count: 0,
        submission_time: Utc::now(),
    }
}

/// Deduplicates the selection and rejects ids of other questions.
fn validated_choice_ids(selected: &[i64], choices: &[Choice]) -> Result<Vec<i64>, AppError> {
    let mut ids = selected.to_vec();
    ids.sort_unstable();
    ids.dedup();

    if let Some(stray) = ids.iter().find(|id| !choices.iter().any(|c| c.id == **id)) {
        return Err(AppError::BadRequest(format!(
            "Choice {} does not belong to this question",
            stray
        )));
    }
    Ok(ids)
}

fn apply_mcq(draft: &mut UserAnswer, score: McqScore, weight: Option<f64>) {
    draft.raw_score = Some(score.raw_score);
    draft.weighted_score = Some(scoring::weighted(score.raw_score, weight));
    draft.is_correct = Some(score.is_correct);
    draft.evaluation_status = EvaluationStatus::McqScored;
}

/// Calls the evaluator inline; a failure is recorded on the answer, never raised.
async fn evaluate_inline(
    evaluator: &dyn AnswerEvaluator,
    answer: &mut UserAnswer,
    question: &Question,
    language: &str,
    weight: Option<f64>,
) {
    let request = EvaluationRequest {
        question_id: question.id,
        question_type: question.question_type,
        question_content: question.content.clone(),
        answer_text: answer.answer_text.clone(),
        calculation_input: answer.calculation_input.clone(),
        language: language.to_string(),
        max_score: answer.max_possible_score,
    };

    match evaluator.evaluate(&request).await {
        Ok(evaluation) => scoring::apply_evaluation(answer, &evaluation, weight),
        Err(err) => {
            tracing::warn!(
                question_id = question.id,
                answer_id = answer.id,
                error = %err,
                "answer evaluation failed"
            );
            scoring::mark_evaluation_error(answer, &err);
        }
    }
}

async fn insert_answer(
    conn: &mut PgConnection,
    draft: &UserAnswer,
    choice_ids: &[i64],
) -> Result<UserAnswer, sqlx::Error> {
    let stored: UserAnswer = sqlx::query_as(&format!(
        r#"
        INSERT INTO user_answers
            (user_id, question_id, session_id, answer_text, calculation_input, raw_score,
             weighted_score, max_possible_score, is_correct, evaluation_status, ai_feedback)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {}
        "#,
        ANSWER_COLUMNS
    ))
    .bind(draft.user_id)
    .bind(draft.question_id)
    .bind(draft.session_id)
    .bind(&draft.answer_text)
    .bind(&draft.calculation_input)
    .bind(draft.raw_score)
    .bind(draft.weighted_score)
    .bind(draft.max_possible_score)
    .bind(draft.is_correct)
    .bind(draft.evaluation_status)
    .bind(&draft.ai_feedback)
    .fetch_one(&mut *conn)
    .await?;

    if !choice_ids.is_empty() {
        let mut builder =
            QueryBuilder::<Postgres>::new("INSERT INTO user_answer_choices (answer_id, choice_id) ");
        builder.push_values(choice_ids, |mut row, choice_id| {
            row.push_bind(stored.id).push_bind(*choice_id);
        });
        builder.build().execute(&mut *conn).await?;
    }

    Ok(stored)
}

/// Stores the caller's answer to a question, replacing any earlier answer in
/// the same session. Without a session the answer is a standalone evaluation
/// request handled in the background.
pub async fn upsert_answer(
    state: &AppState,
    user_id: i64,
    session_id: Option<i64>,
    question_id: i64,
    mut payload: AnswerPayload,
) -> Result<AnswerView, AppError> {
    payload.answer_text = payload
        .answer_text
        .as_deref()
        .and_then(normalize_answer_text);

    let question = question_bank::fetch_question(&state.pool, question_id).await?;

    match session_id {
        Some(session_id) => submit_in_session(state, user_id, session_id, &question, payload).await,
        None => submit_standalone(state, user_id, &question, payload).await,
    }
}

async fn submit_in_session(
    state: &AppState,
    user_id: i64,
    session_id: i64,
    question: &Question,
    payload: AnswerPayload,
) -> Result<AnswerView, AppError> {
    let session = exam_session::load_session_for_user(&state.pool, session_id, user_id).await?;
    exam_session::ensure_active(&session)?;

    let slot = exam_session::session_question(&state.pool, session.id, question.id)
        .await?
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "Question {} is not part of session {}",
                question.id, session.id
            ))
        })?;
    let weight = Some(slot.question_weight);

    let mut draft = draft_answer(
        user_id,
        question.id,
        Some(session.id),
        &payload,
        slot.points * slot.question_weight,
    );

    let selected = if question.question_type.is_mcq() {
        let choices = question_bank::fetch_choices(&state.pool, question.id).await?;
        let selected = validated_choice_ids(&payload.selected_choice_ids, &choices)?;
        apply_mcq(&mut draft, scoring::score_mcq(&selected, &choices, slot.points), weight);
        selected
    } else {
        if !payload.has_content() {
            draft.evaluation_status = EvaluationStatus::NotApplicable;
        } else if session.evaluation_mode == EvaluationMode::RealTime {
            let exam = question_bank::fetch_exam(&state.pool, session.exam_id).await?;
            evaluate_inline(state.evaluator.as_ref(), &mut draft, question, &exam.language, weight)
                .await;
        }
        Vec::new()
    };

    let mut tx = state.pool.begin().await?;

    // Re-check under lock: the session may have completed while we evaluated.
    let locked = exam_session::lock_session(&mut tx, session.id).await?;
    exam_session::ensure_active(&locked)?;

    let replaced = sqlx::query(
        "DELETE FROM user_answers WHERE user_id = $1 AND session_id = $2 AND question_id = $3",
    )
    .bind(user_id)
    .bind(session.id)
    .bind(question.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let stored = insert_answer(&mut tx, &draft, &selected).await?;
    tx.commit().await?;

    tracing::info!(
        session_id = session.id,
        question_id = question.id,
        answer_id = stored.id,
        replaced,
        status = ?stored.evaluation_status,
        "answer stored"
    );

    let view = AnswerView::new(stored, selected);
    Ok(if locked.hides_scores() { view.redacted() } else { view })
}

async fn submit_standalone(
    state: &AppState,
    user_id: i64,
    question: &Question,
    payload: AnswerPayload,
) -> Result<AnswerView, AppError> {
    let mut draft = draft_answer(user_id, question.id, None, &payload, question.points);

    let selected = if question.question_type.is_mcq() {
        let choices = question_bank::fetch_choices(&state.pool, question.id).await?;
        let selected = validated_choice_ids(&payload.selected_choice_ids, &choices)?;
        apply_mcq(&mut draft, scoring::score_mcq(&selected, &choices, question.points), None);
        selected
    } else {
        if !payload.has_content() {
            draft.evaluation_status = EvaluationStatus::NotApplicable;
        }
        Vec::new()
    };

    let mut tx = state.pool.begin().await?;
    let stored = insert_answer(&mut tx, &draft, &selected).await?;
    tx.commit().await?;

    if stored.evaluation_status == EvaluationStatus::Pending {
        state.queue.enqueue(stored.id);
    }

    Ok(AnswerView::new(stored, selected))
}

/// Back to PENDING, one more retry used, old failure feedback cleared.
fn reset_for_retry(answer: &mut UserAnswer) {
    answer.retry_count += 1;
    answer.evaluation_status = EvaluationStatus::Pending;
    answer.ai_feedback = None;
}

/// Puts an ERROR-state answer back in the queue, within the retry budget.
pub async fn retry_evaluation(
    state: &AppState,
    user_id: i64,
    answer_id: i64,
) -> Result<AnswerView, AppError> {
    let not_found = || AppError::NotFound(format!("Answer {} not found", answer_id));

    let answer: UserAnswer = sqlx::query_as(&format!(
        "SELECT {} FROM user_answers WHERE id = $1 AND user_id = $2",
        ANSWER_COLUMNS
    ))
    .bind(answer_id)
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(not_found)?;

    let mut tx = state.pool.begin().await?;

    // Session first, then answer: same lock order as completion.
    if let Some(session_id) = answer.session_id {
        let session = exam_session::lock_session(&mut tx, session_id).await?;
        exam_session::ensure_active(&session)?;
    }

    let current: UserAnswer = sqlx::query_as(&format!(
        "SELECT {} FROM user_answers WHERE id = $1 FOR UPDATE",
        ANSWER_COLUMNS
    ))
    .bind(answer_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(not_found)?;

    if current.evaluation_status != EvaluationStatus::Error {
        return Err(AppError::BadRequest(
            "Only answers whose evaluation failed can be re-evaluated".to_string(),
        ));
    }
    if current.retry_count >= state.config.max_evaluation_retries {
        return Err(AppError::Conflict(format!(
            "Answer {} has used all {} re-evaluation attempts",
            answer_id, state.config.max_evaluation_retries
        )));
    }

    let mut requeued = current;
    reset_for_retry(&mut requeued);

    let updated: UserAnswer = sqlx::query_as(&format!(
        r#"
        UPDATE user_answers
        SET retry_count = $2, evaluation_status = $3, ai_feedback = $4
        WHERE id = $1
        RETURNING {}
        "#,
        ANSWER_COLUMNS
    ))
    .bind(answer_id)
    .bind(requeued.retry_count)
    .bind(requeued.evaluation_status)
    .bind(&requeued.ai_feedback)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    state.queue.enqueue(updated.id);
    tracing::info!(answer_id, retry_count = updated.retry_count, "answer re-queued for evaluation");

    Ok(AnswerView::new(updated, Vec::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Evaluated,
    Failed,
    Skipped(&'static str),
}

/// Background evaluation of one answer. Safe to run more than once.
///
/// Only non-MCQ answers in PENDING/ERROR state are touched, and only when they
/// are standalone or belong to an IN_PROGRESS real-time session.
pub async fn reconcile_answer(
    pool: &PgPool,
    evaluator: &dyn AnswerEvaluator,
    answer_id: i64,
) -> Result<ReconcileOutcome, AppError> {
    let answer: Option<UserAnswer> = sqlx::query_as(&format!(
        "SELECT {} FROM user_answers WHERE id = $1",
        ANSWER_COLUMNS
    ))
    .bind(answer_id)
    .fetch_optional(pool)
    .await?;

    let Some(answer) = answer else {
        return Ok(ReconcileOutcome::Skipped("answer no longer exists"));
    };
    if !matches!(
        answer.evaluation_status,
        EvaluationStatus::Pending | EvaluationStatus::Error
    ) {
        return Ok(ReconcileOutcome::Skipped("answer already scored"));
    }

    let question = question_bank::fetch_question(pool, answer.question_id).await?;
    if question.question_type.is_mcq() {
        return Ok(ReconcileOutcome::Skipped("MCQ answers are scored on submission"));
    }

    let mut weight = None;
    if let Some(session_id) = answer.session_id {
        let Some(session) = exam_session::fetch_session(pool, session_id).await? else {
            return Ok(ReconcileOutcome::Skipped("session no longer exists"));
        };
        if !session.is_active() || session.evaluation_mode != EvaluationMode::RealTime {
            return Ok(ReconcileOutcome::Skipped("session is not open for real-time evaluation"));
        }
        weight = exam_session::session_question(pool, session_id, question.id)
            .await?
            .map(|slot| slot.question_weight);
    }

    let exam = question_bank::fetch_exam(pool, question.exam_id).await?;
    let mut evaluated = answer.clone();
    evaluate_inline(evaluator, &mut evaluated, &question, &exam.language, weight).await;

    let mut tx = pool.begin().await?;
    if let Some(session_id) = answer.session_id {
        let status: Option<SessionStatus> =
            sqlx::query_scalar("SELECT status FROM exam_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        if status != Some(SessionStatus::InProgress) {
            return Ok(ReconcileOutcome::Skipped("session closed during evaluation"));
        }
    }

    let current: Option<EvaluationStatus> =
        sqlx::query_scalar("SELECT evaluation_status FROM user_answers WHERE id = $1 FOR UPDATE")
            .bind(answer_id)
            .fetch_optional(&mut *tx)
            .await?;
    match current {
        Some(EvaluationStatus::Pending | EvaluationStatus::Error) => {}
        Some(_) => return Ok(ReconcileOutcome::Skipped("answer scored concurrently")),
        None => return Ok(ReconcileOutcome::Skipped("answer replaced during evaluation")),
    }

    update_answer_scores(&mut tx, &evaluated).await?;
    tx.commit().await?;

    Ok(match evaluated.evaluation_status {
        EvaluationStatus::Evaluated => ReconcileOutcome::Evaluated,
        _ => ReconcileOutcome::Failed,
    })
}

/// Queue entry point: runs [`reconcile_answer`] and logs the result.
pub async fn run_reconcile_job(pool: &PgPool, evaluator: &dyn AnswerEvaluator, answer_id: i64) {
    match reconcile_answer(pool, evaluator, answer_id).await {
        Ok(ReconcileOutcome::Evaluated) => {
            tracing::info!(answer_id, "background evaluation finished")
        }
        Ok(ReconcileOutcome::Failed) => {
            tracing::warn!(answer_id, "background evaluation failed, answer left in ERROR")
        }
        Ok(ReconcileOutcome::Skipped(reason)) => {
            tracing::debug!(answer_id, reason, "background evaluation skipped")
        }
        Err(e) => tracing::error!(answer_id, "background evaluation job crashed: {}", e),
    }
}
