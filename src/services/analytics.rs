//! Post-completion performance rollups.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use crate::models::{
    exam_session::ExamSession,
    performance::{Dimension, PerformanceSummary},
    question::{Difficulty, QuestionType},
};

#[derive(Debug)]
pub enum AnalyticsError {
    Database(String),
}

impl fmt::Display for AnalyticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsError::Database(msg) => write!(f, "analytics database error: {}", msg),
        }
    }
}

impl std::error::Error for AnalyticsError {}

impl From<sqlx::Error> for AnalyticsError {
    fn from(err: sqlx::Error) -> Self {
        AnalyticsError::Database(err.to_string())
    }
}

/// Consumes a completed session; returns the number of records written.
#[async_trait]
pub trait AnalyticsAggregator: Send + Sync {
    async fn aggregate(&self, session: &ExamSession) -> Result<usize, AnalyticsError>;
}

/// One finalized answer, flattened with its question's grouping facts.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerFact {
    pub topic_id: Option<i64>,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub raw_score: Option<f64>,
    pub max_possible_score: f64,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollup {
    pub attempted: i32,
    pub correct: i32,
    pub score: f64,
    pub possible: f64,
}

/// Groups answer facts by topic, question type and difficulty.
pub fn build_rollups(facts: &[AnswerFact]) -> BTreeMap<(Dimension, String), Rollup> {
    let mut rollups: BTreeMap<(Dimension, String), Rollup> = BTreeMap::new();

    for fact in facts {
        let topic = fact
            .topic_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unassigned".to_string());
        let keys = [
            (Dimension::Topic, topic),
            (Dimension::QuestionType, fact.question_type.as_str().to_string()),
            (Dimension::Difficulty, fact.difficulty.as_str().to_string()),
        ];

        for key in keys {
            let entry = rollups.entry(key).or_default();
            entry.attempted += 1;
            if fact.is_correct == Some(true) {
                entry.correct += 1;
            }
            entry.score += fact.raw_score.unwrap_or(0.0);
            entry.possible += fact.max_possible_score;
        }
    }

    rollups
}

pub struct PgAnalyticsAggregator {
    pool: PgPool,
}

impl PgAnalyticsAggregator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsAggregator for PgAnalyticsAggregator {
    async fn aggregate(&self, session: &ExamSession) -> Result<usize, AnalyticsError> {
        let facts: Vec<AnswerFact> = sqlx::query_as(
            r#"
            SELECT q.topic_id, q.question_type, q.difficulty,
                   a.raw_score, a.max_possible_score, a.is_correct
            FROM user_answers a
            JOIN questions q ON q.id = a.question_id
            WHERE a.session_id = $1 AND a.user_id = $2
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .fetch_all(&self.pool)
        .await?;

        let rollups = build_rollups(&facts);

        // Replace this session's rows so re-runs stay idempotent.
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM performance_records WHERE session_id = $1")
            .bind(session.id)
            .execute(&mut *tx)
            .await?;

        for ((dimension, key), rollup) in &rollups {
            sqlx::query(
                r#"
                INSERT INTO performance_records
                    (session_id, user_id, dimension, dimension_key, attempted, correct, score, possible)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(session.id)
            .bind(session.user_id)
            .bind(dimension.as_str())
            .bind(key)
            .bind(rollup.attempted)
            .bind(rollup.correct)
            .bind(rollup.score)
            .bind(rollup.possible)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            session_id = session.id,
            records = rollups.len(),
            "performance records updated"
        );
        Ok(rollups.len())
    }
}

/// A user's rollups summed across all of their aggregated sessions.
pub async fn performance_for_user(
    pool: &PgPool,
    user_id: i64,
) -> Result<Vec<PerformanceSummary>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT dimension, dimension_key,
               COUNT(DISTINCT session_id) AS sessions,
               SUM(attempted)::BIGINT AS attempted,
               SUM(correct)::BIGINT AS correct,
               SUM(score) AS score,
               SUM(possible) AS possible
        FROM performance_records
        WHERE user_id = $1
        GROUP BY dimension, dimension_key
        ORDER BY dimension, dimension_key
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
