//! Fire-and-forget background evaluation.
//!
//! Callers only see [`EvaluationQueue::enqueue`]. Which implementation runs is
//! decided once at startup from `EVALUATION_QUEUE`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

pub trait EvaluationQueue: Send + Sync {
    /// Schedules evaluation of a persisted answer. Never blocks, never fails
    /// the caller; jobs must tolerate being run more than once.
    fn enqueue(&self, answer_id: i64);
}

/// A single long-lived worker draining a bounded channel in submission order.
pub struct WorkerQueue {
    tx: mpsc::Sender<i64>,
}

impl WorkerQueue {
    /// At most `capacity` jobs wait behind the one being run; more are dropped.
    pub fn start<F, Fut>(capacity: usize, handler: F) -> (Self, JoinHandle<()>)
    where
        F: Fn(i64) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<i64>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(answer_id) = rx.recv().await {
                tracing::debug!(answer_id, "evaluation job started");
                handler(answer_id).await;
            }
            tracing::warn!("evaluation queue closed, worker exiting");
        });
        (Self { tx }, handle)
    }
}

impl EvaluationQueue for WorkerQueue {
    fn enqueue(&self, answer_id: i64) {
        match self.tx.try_send(answer_id) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(answer_id, "evaluation queue is full, job dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(answer_id, "evaluation worker is gone, job dropped");
            }
        }
    }
}

/// Best-effort fallback: one detached task per job.
pub struct DetachedQueue<F> {
    handler: Arc<F>,
}

impl<F> DetachedQueue<F> {
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<F, Fut> EvaluationQueue for DetachedQueue<F>
where
    F: Fn(i64) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn enqueue(&self, answer_id: i64) {
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            tracing::debug!(answer_id, "detached evaluation job started");
            handler(answer_id).await;
        });
    }
}
