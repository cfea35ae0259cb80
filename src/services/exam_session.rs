//! Exam session lifecycle: IN_PROGRESS -> {COMPLETED, ABANDONED}.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgConnection, PgExecutor, PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        exam_session::{
            CompletionResponse, CreateSessionRequest, ExamSession, SessionDetailResponse,
            SessionQuestion, SessionQuestionView, SessionStatus,
        },
        question::{PublicChoice, PublicQuestion, Question, QuestionType},
        user_answer::{AnswerView, UserAnswer},
    },
    services::{
        answers::{self, ANSWER_COLUMNS},
        finalizer::{self, CompletionOutcome, WorkingAnswer},
        policy, question_bank, scoring,
    },
    state::AppState,
};

pub const SESSION_COLUMNS: &str = "id, user_id, exam_id, session_type, exam_type, evaluation_mode, \
     is_timed, start_time, expected_end_time, actual_end_time, time_limit_seconds, \
     total_possible_score, total_score_achieved, pass_threshold, passed, status, \
     learning_material_viewed";

/// Weight given to every question at assignment.
pub const DEFAULT_QUESTION_WEIGHT: f64 = 1.0;

pub async fn fetch_session<'e>(
    executor: impl PgExecutor<'e>,
    session_id: i64,
) -> Result<Option<ExamSession>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {} FROM exam_sessions WHERE id = $1",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(executor)
    .await
}

/// Loads a session owned by `user_id`. Other users' sessions are reported as missing.
pub async fn load_session_for_user<'e>(
    executor: impl PgExecutor<'e>,
    session_id: i64,
    user_id: i64,
) -> Result<ExamSession, AppError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM exam_sessions WHERE id = $1 AND user_id = $2",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| session_not_found(session_id))
}

/// Row-locks a session for the rest of the transaction.
pub async fn lock_session(conn: &mut PgConnection, session_id: i64) -> Result<ExamSession, AppError> {
    sqlx::query_as(&format!(
        "SELECT {} FROM exam_sessions WHERE id = $1 FOR UPDATE",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| session_not_found(session_id))
}

async fn lock_session_for_user(
    conn: &mut PgConnection,
    session_id: i64,
    user_id: i64,
) -> Result<ExamSession, AppError> {
    let session = lock_session(conn, session_id).await?;
    if session.user_id != user_id {
        return Err(session_not_found(session_id));
    }
    Ok(session)
}

fn session_not_found(session_id: i64) -> AppError {
    AppError::NotFound(format!("Exam session {} not found", session_id))
}

pub async fn session_question<'e>(
    executor: impl PgExecutor<'e>,
    session_id: i64,
    question_id: i64,
) -> Result<Option<SessionQuestion>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT session_id, question_id, display_order, question_weight, points
        FROM exam_session_questions
        WHERE session_id = $1 AND question_id = $2
        "#,
    )
    .bind(session_id)
    .bind(question_id)
    .fetch_optional(executor)
    .await
}

/// Sum of `points * weight` over the assigned questions.
pub fn total_possible(slots: &[SessionQuestion]) -> f64 {
    slots.iter().map(|s| s.points * s.question_weight).sum()
}

/// Snapshots the selected questions into session slots, in display order.
/// Points are copied so later question edits leave the session alone.
fn assign_slots(questions: &[Question]) -> Vec<SessionQuestion> {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| SessionQuestion {
            session_id: 0,
            question_id: q.id,
            display_order: i as i32 + 1,
            question_weight: DEFAULT_QUESTION_WEIGHT,
            points: q.points,
        })
        .collect()
}

pub fn ensure_active(session: &ExamSession) -> Result<(), AppError> {
    if session.is_active() {
        Ok(())
    } else {
        Err(AppError::SessionNotActive(session.id))
    }
}

/// Terminal COMPLETED state with the final aggregate.
fn apply_completion(
    session: &mut ExamSession,
    total_score_achieved: f64,
    passed: bool,
    now: DateTime<Utc>,
) {
    session.status = SessionStatus::Completed;
    session.actual_end_time = Some(now);
    session.total_score_achieved = Some(total_score_achieved);
    session.passed = Some(passed);
}

/// Creates a session with a frozen question set.
///
/// Nothing is persisted when the selection cannot be resolved.
pub async fn create_session(
    pool: &PgPool,
    user_id: i64,
    req: &CreateSessionRequest,
) -> Result<ExamSession, AppError> {
    let selection = policy::resolve_selection(req)?;

    let mut tx = pool.begin().await?;

    let exam = question_bank::fetch_exam(&mut *tx, req.exam_id).await?;
    if !exam.is_active {
        return Err(AppError::InvalidSelectionCriteria(format!(
            "exam {} is not active",
            exam.id
        )));
    }

    let questions = question_bank::select_questions(&mut tx, exam.id, &selection).await?;
    let session_policy = policy::resolve_policy(req, &exam)?;

    let slots = assign_slots(&questions);

    let start_time = Utc::now();
    let expected_end_time = start_time + Duration::seconds(i64::from(session_policy.time_limit_seconds));

    let session: ExamSession = sqlx::query_as(&format!(
        r#"
        INSERT INTO exam_sessions
            (user_id, exam_id, session_type, exam_type, evaluation_mode, is_timed, start_time,
             expected_end_time, time_limit_seconds, total_possible_score, pass_threshold, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING {}
        "#,
        SESSION_COLUMNS
    ))
    .bind(user_id)
    .bind(exam.id)
    .bind(req.session_type)
    .bind(req.exam_type)
    .bind(session_policy.evaluation_mode)
    .bind(session_policy.is_timed)
    .bind(start_time)
    .bind(expected_end_time)
    .bind(session_policy.time_limit_seconds)
    .bind(total_possible(&slots))
    .bind(exam.pass_threshold)
    .bind(SessionStatus::InProgress)
    .fetch_one(&mut *tx)
    .await?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO exam_session_questions (session_id, question_id, display_order, question_weight, points) ",
    );
    builder.push_values(&slots, |mut row, slot| {
        row.push_bind(session.id)
            .push_bind(slot.question_id)
            .push_bind(slot.display_order)
            .push_bind(slot.question_weight)
            .push_bind(slot.points);
    });
    builder.build().execute(&mut *tx).await?;

    tx.commit().await?;

    tracing::info!(
        session_id = session.id,
        user_id,
        exam_id = exam.id,
        questions = slots.len(),
        mode = ?session.evaluation_mode,
        "exam session created"
    );

    Ok(session)
}

pub async fn list_sessions(pool: &PgPool, user_id: i64) -> Result<Vec<ExamSession>, AppError> {
    let sessions: Vec<ExamSession> = sqlx::query_as(&format!(
        "SELECT {} FROM exam_sessions WHERE user_id = $1 ORDER BY start_time DESC, id DESC",
        SESSION_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(sessions)
}

/// The session with its ordered questions and the caller's current answers.
pub async fn session_detail(
    pool: &PgPool,
    session: ExamSession,
) -> Result<SessionDetailResponse, AppError> {
    let slots: Vec<SessionQuestion> = sqlx::query_as(
        r#"
        SELECT session_id, question_id, display_order, question_weight, points
        FROM exam_session_questions
        WHERE session_id = $1
        ORDER BY display_order
        "#,
    )
    .bind(session.id)
    .fetch_all(pool)
    .await?;

    let question_ids: Vec<i64> = slots.iter().map(|s| s.question_id).collect();
    let questions = question_bank::fetch_questions(pool, &question_ids).await?;
    let choices = question_bank::fetch_choices_for(pool, &question_ids).await?;

    let stored: Vec<UserAnswer> = sqlx::query_as(&format!(
        "SELECT {} FROM user_answers WHERE session_id = $1 AND user_id = $2 ORDER BY submission_time, id",
        ANSWER_COLUMNS
    ))
    .bind(session.id)
    .bind(session.user_id)
    .fetch_all(pool)
    .await?;

    let answer_ids: Vec<i64> = stored.iter().map(|a| a.id).collect();
    let mut selected = answers::selected_choices(pool, &answer_ids).await?;

    // Ordered by submission time, so the last insert per question wins.
    let mut latest: HashMap<i64, UserAnswer> = HashMap::new();
    for answer in stored {
        latest.insert(answer.question_id, answer);
    }

    let hide_scores = session.hides_scores();
    let views = slots
        .iter()
        .filter_map(|slot| {
            let question = questions.get(&slot.question_id)?;
            let answer = latest.remove(&slot.question_id).map(|a| {
                let ids = selected.remove(&a.id).unwrap_or_default();
                let view = AnswerView::new(a, ids);
                if hide_scores { view.redacted() } else { view }
            });

            Some(SessionQuestionView {
                display_order: slot.display_order,
                question_weight: slot.question_weight,
                question: PublicQuestion {
                    id: question.id,
                    question_type: question.question_type,
                    content: question.content.clone(),
                    topic_id: question.topic_id,
                    difficulty: question.difficulty,
                    choices: choices
                        .get(&question.id)
                        .map(|cs| cs.iter().map(PublicChoice::from).collect())
                        .unwrap_or_default(),
                },
                answer,
            })
        })
        .collect();

    Ok(SessionDetailResponse {
        time_remaining_seconds: session.time_remaining_seconds(Utc::now()),
        requires_learning_material: session.requires_learning_material(),
        session,
        questions: views,
    })
}

#[derive(FromRow)]
struct QuestionFacts {
    id: i64,
    question_type: QuestionType,
    content: String,
}

/// Every stored answer of the session owner, with the facts the finalizer needs.
async fn load_working_answers(
    conn: &mut PgConnection,
    session: &ExamSession,
) -> Result<Vec<WorkingAnswer>, sqlx::Error> {
    let stored: Vec<UserAnswer> = sqlx::query_as(&format!(
        "SELECT {} FROM user_answers WHERE session_id = $1 AND user_id = $2 ORDER BY id FOR UPDATE",
        ANSWER_COLUMNS
    ))
    .bind(session.id)
    .bind(session.user_id)
    .fetch_all(&mut *conn)
    .await?;

    let question_ids: Vec<i64> = stored
        .iter()
        .map(|a| a.question_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let facts: HashMap<i64, QuestionFacts> =
        sqlx::query_as::<_, QuestionFacts>("SELECT id, question_type, content FROM questions WHERE id = ANY($1)")
            .bind(&question_ids)
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .map(|f| (f.id, f))
            .collect();

    let weights: HashMap<i64, f64> = sqlx::query_as::<_, (i64, f64)>(
        "SELECT question_id, question_weight FROM exam_session_questions WHERE session_id = $1",
    )
    .bind(session.id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .collect();

    let answer_ids: Vec<i64> = stored.iter().map(|a| a.id).collect();
    let selected = answers::selected_choices(&mut *conn, &answer_ids).await?;

    let working = stored
        .into_iter()
        .filter_map(|answer| {
            let facts = facts.get(&answer.question_id)?;
            let chosen = selected.get(&answer.id).map(Vec::as_slice).unwrap_or_default();
            Some(WorkingAnswer {
                has_content: answers::answer_has_content(&answer, chosen),
                weight: weights.get(&answer.question_id).copied(),
                question_type: facts.question_type,
                question_content: facts.content.clone(),
                answer,
            })
        })
        .collect();

    Ok(working)
}

async fn persist_outcome(
    conn: &mut PgConnection,
    outcome: &CompletionOutcome,
) -> Result<(), sqlx::Error> {
    if !outcome.discarded_ids.is_empty() {
        sqlx::query("DELETE FROM user_answers WHERE id = ANY($1)")
            .bind(&outcome.discarded_ids)
            .execute(&mut *conn)
            .await?;
    }
    for working in &outcome.answers {
        answers::update_answer_scores(&mut *conn, &working.answer).await?;
    }
    Ok(())
}

/// Runs the aggregator; a failure is logged and reported as `None`.
async fn hand_off_to_analytics(state: &AppState, session: &ExamSession) -> Option<usize> {
    match state.analytics.aggregate(session).await {
        Ok(records) => Some(records),
        Err(e) => {
            tracing::error!(
                session_id = session.id,
                "analytics aggregation failed after completion: {}",
                e
            );
            None
        }
    }
}

/// Completes a session: dedup, end-of-exam evaluation, finalization and
/// aggregation all commit together with the status change.
pub async fn complete_session(
    state: &AppState,
    user_id: i64,
    session_id: i64,
) -> Result<CompletionResponse, AppError> {
    let mut tx = state.pool.begin().await?;

    let session = lock_session_for_user(&mut tx, session_id, user_id).await?;
    ensure_active(&session)?;

    let exam = question_bank::fetch_exam(&mut *tx, session.exam_id).await?;
    let working = load_working_answers(&mut tx, &session).await?;

    let outcome = finalizer::run_completion(
        working,
        session.evaluation_mode,
        state.evaluator.as_ref(),
        &exam.language,
        session.total_possible_score,
        session.pass_threshold,
    )
    .await;

    persist_outcome(&mut tx, &outcome).await?;

    let mut finished = session;
    apply_completion(
        &mut finished,
        outcome.total_score_achieved,
        outcome.passed,
        Utc::now(),
    );

    let completed: ExamSession = sqlx::query_as(&format!(
        r#"
        UPDATE exam_sessions
        SET status = $2, actual_end_time = $3, total_score_achieved = $4, passed = $5
        WHERE id = $1
        RETURNING {}
        "#,
        SESSION_COLUMNS
    ))
    .bind(finished.id)
    .bind(finished.status)
    .bind(finished.actual_end_time)
    .bind(finished.total_score_achieved)
    .bind(finished.passed)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        session_id = completed.id,
        user_id,
        total = outcome.total_score_achieved,
        possible = completed.total_possible_score,
        passed = outcome.passed,
        duplicates = outcome.discarded_ids.len(),
        failed_evaluations = outcome.evaluations_failed,
        "exam session completed"
    );

    let analytics_records = hand_off_to_analytics(state, &completed).await;

    Ok(CompletionResponse {
        session_id: completed.id,
        status: completed.status,
        total_score_achieved: outcome.total_score_achieved,
        total_possible_score: completed.total_possible_score,
        passed: outcome.passed,
        answers_scored: outcome.answers.len(),
        duplicates_removed: outcome.discarded_ids.len(),
        evaluations_failed: outcome.evaluations_failed,
        fallback_scored: outcome.fallback_scored,
        analytics_records,
    })
}

pub async fn abandon_session(
    pool: &PgPool,
    user_id: i64,
    session_id: i64,
) -> Result<ExamSession, AppError> {
    let mut tx = pool.begin().await?;

    let session = lock_session_for_user(&mut tx, session_id, user_id).await?;
    ensure_active(&session)?;

    let abandoned: ExamSession = sqlx::query_as(&format!(
        "UPDATE exam_sessions SET status = $2, actual_end_time = $3 WHERE id = $1 RETURNING {}",
        SESSION_COLUMNS
    ))
    .bind(session.id)
    .bind(SessionStatus::Abandoned)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(session_id, user_id, "exam session abandoned");
    Ok(abandoned)
}

pub async fn mark_learning_material_viewed(
    pool: &PgPool,
    user_id: i64,
    session_id: i64,
) -> Result<ExamSession, AppError> {
    sqlx::query_as(&format!(
        r#"
        UPDATE exam_sessions SET learning_material_viewed = TRUE
        WHERE id = $1 AND user_id = $2
        RETURNING {}
        "#,
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| session_not_found(session_id))
}

/// Operator backfill for a completed session.
///
/// Re-derives correctness, weighted scores and the aggregate from stored raw
/// scores; never calls the evaluator. Running it twice changes nothing.
pub async fn rescore_session(
    state: &AppState,
    session_id: i64,
) -> Result<CompletionResponse, AppError> {
    let mut tx = state.pool.begin().await?;

    let session = lock_session(&mut tx, session_id).await?;
    if session.status != SessionStatus::Completed {
        return Err(AppError::BadRequest(format!(
            "Exam session {} is not completed and cannot be rescored",
            session.id
        )));
    }

    let working = load_working_answers(&mut tx, &session).await?;
    let (mut kept, discarded_ids) = finalizer::dedup_latest(working);
    let fallback_scored = finalizer::rederive_scores(&mut kept);
    let total_score_achieved = finalizer::total_raw_score(&kept);
    let passed = scoring::passed(
        total_score_achieved,
        session.total_possible_score,
        session.pass_threshold,
    );

    let outcome = CompletionOutcome {
        answers: kept,
        discarded_ids,
        total_score_achieved,
        passed,
        evaluations_failed: 0,
        fallback_scored,
    };
    persist_outcome(&mut tx, &outcome).await?;

    let rescored: ExamSession = sqlx::query_as(&format!(
        "UPDATE exam_sessions SET total_score_achieved = $2, passed = $3 WHERE id = $1 RETURNING {}",
        SESSION_COLUMNS
    ))
    .bind(session.id)
    .bind(total_score_achieved)
    .bind(passed)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        session_id,
        previous = ?session.total_score_achieved,
        total = total_score_achieved,
        passed,
        "exam session rescored"
    );

    let analytics_records = hand_off_to_analytics(state, &rescored).await;

    Ok(CompletionResponse {
        session_id: rescored.id,
        status: rescored.status,
        total_score_achieved,
        total_possible_score: rescored.total_possible_score,
        passed,
        answers_scored: outcome.answers.len(),
        duplicates_removed: outcome.discarded_ids.len(),
        evaluations_failed: 0,
        fallback_scored,
        analytics_records,
    })
}
