use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::{Config, QueueMode},
    services::{
        analytics::{AnalyticsAggregator, PgAnalyticsAggregator},
        answers,
        evaluator::{AnswerEvaluator, HttpAnswerEvaluator, UnavailableEvaluator},
        queue::{DetachedQueue, EvaluationQueue, WorkerQueue},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub evaluator: Arc<dyn AnswerEvaluator>,
    pub analytics: Arc<dyn AnalyticsAggregator>,
    pub queue: Arc<dyn EvaluationQueue>,
}

impl AppState {
    /// Wires the production collaborators from configuration.
    /// Must be called inside a tokio runtime (the queue spawns its worker).
    pub fn new(pool: PgPool, config: Config) -> Self {
        let evaluator: Arc<dyn AnswerEvaluator> = match &config.evaluator {
            Some(cfg) => match HttpAnswerEvaluator::new(cfg) {
                Ok(http) => {
                    tracing::info!(endpoint = %cfg.base_url, model = %cfg.model, "AI evaluator configured");
                    Arc::new(http)
                }
                Err(e) => {
                    tracing::error!("Failed to build AI evaluator, falling back: {}", e);
                    Arc::new(UnavailableEvaluator)
                }
            },
            None => {
                tracing::warn!("AI_EVALUATOR_URL not set; open-ended answers will use fallback scoring");
                Arc::new(UnavailableEvaluator)
            }
        };

        let analytics: Arc<dyn AnalyticsAggregator> =
            Arc::new(PgAnalyticsAggregator::new(pool.clone()));

        let queue = Self::build_queue(&config, pool.clone(), evaluator.clone());

        Self {
            pool,
            config,
            evaluator,
            analytics,
            queue,
        }
    }

    fn build_queue(
        config: &Config,
        pool: PgPool,
        evaluator: Arc<dyn AnswerEvaluator>,
    ) -> Arc<dyn EvaluationQueue> {
        let handler = move |answer_id: i64| {
            let pool = pool.clone();
            let evaluator = evaluator.clone();
            async move {
                answers::run_reconcile_job(&pool, evaluator.as_ref(), answer_id).await;
            }
        };

        match config.queue_mode {
            QueueMode::Worker => {
                let (queue, _handle) = WorkerQueue::start(config.queue_capacity, handler);
                Arc::new(queue)
            }
            QueueMode::Detached => Arc::new(DetachedQueue::new(handler)),
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
