//! Completion-time score reconciliation.
//!
//! Runs entirely in memory over the answers loaded inside the completion
//! transaction; the caller persists the outcome. Every answer leaves
//! [`finalize_scores`] with a raw score, a weighted score and a correctness flag.

use std::collections::HashMap;

use crate::{
    models::{
        exam_session::EvaluationMode,
        question::QuestionType,
        user_answer::{EvaluationStatus, UserAnswer},
    },
    services::{
        evaluator::{AnswerEvaluator, EvaluationRequest},
        scoring::{self, FINALIZATION_EFFORT_CREDIT},
    },
};

/// An answer plus the question facts needed to score it.
#[derive(Debug, Clone)]
pub struct WorkingAnswer {
    pub answer: UserAnswer,
    pub question_type: QuestionType,
    pub question_content: String,
    /// Weight recorded for this question in the session, if any.
    pub weight: Option<f64>,
    pub has_content: bool,
}

impl WorkingAnswer {
    fn evaluation_request(&self, language: &str) -> EvaluationRequest {
        EvaluationRequest {
            question_id: self.answer.question_id,
            question_type: self.question_type,
            question_content: self.question_content.clone(),
            answer_text: self.answer.answer_text.clone(),
            calculation_input: self.answer.calculation_input.clone(),
            language: language.to_string(),
            max_score: self.answer.max_possible_score,
        }
    }
}

#[derive(Debug)]
pub struct CompletionOutcome {
    /// Surviving answers, fully scored.
    pub answers: Vec<WorkingAnswer>,
    /// Older duplicates to delete.
    pub discarded_ids: Vec<i64>,
    pub total_score_achieved: f64,
    pub passed: bool,
    pub evaluations_failed: usize,
    pub fallback_scored: usize,
}

/// Keeps the latest answer per (user, session, question).
///
/// Ties on submission time go to the higher id.
pub fn dedup_latest(answers: Vec<WorkingAnswer>) -> (Vec<WorkingAnswer>, Vec<i64>) {
    let mut latest: HashMap<(i64, Option<i64>, i64), WorkingAnswer> = HashMap::new();
    let mut discarded = Vec::new();

    for candidate in answers {
        let key = (
            candidate.answer.user_id,
            candidate.answer.session_id,
            candidate.answer.question_id,
        );
        match latest.remove(&key) {
            None => {
                latest.insert(key, candidate);
            }
            Some(current) => {
                let newer = (candidate.answer.submission_time, candidate.answer.id)
                    > (current.answer.submission_time, current.answer.id);
                let (keep, drop) = if newer {
                    (candidate, current)
                } else {
                    (current, candidate)
                };
                discarded.push(drop.answer.id);
                latest.insert(key, keep);
            }
        }
    }

    let mut kept: Vec<WorkingAnswer> = latest.into_values().collect();
    kept.sort_by_key(|w| w.answer.id);
    discarded.sort_unstable();
    (kept, discarded)
}

/// Evaluates every pending non-MCQ answer, one at a time.
///
/// A failure on one answer never stops the others; it earns effort credit.
/// Returns the number of failed evaluations.
pub async fn evaluate_pending(
    answers: &mut [WorkingAnswer],
    evaluator: &dyn AnswerEvaluator,
    language: &str,
) -> usize {
    let mut failed = 0;

    for working in answers.iter_mut() {
        if working.question_type.is_mcq()
            || working.answer.evaluation_status != EvaluationStatus::Pending
            || !working.has_content
        {
            continue;
        }

        let request = working.evaluation_request(language);
        match evaluator.evaluate(&request).await {
            Ok(evaluation) => {
                scoring::apply_evaluation(&mut working.answer, &evaluation, working.weight);
            }
            Err(err) => {
                tracing::warn!(
                    answer_id = working.answer.id,
                    error = %err,
                    "end-of-exam evaluation failed, granting effort credit"
                );
                scoring::apply_evaluation_failure_credit(&mut working.answer, &err, working.weight);
                failed += 1;
            }
        }
    }

    failed
}

/// Fills every missing score deterministically.
///
/// Returns how many answers needed a fallback score.
pub fn finalize_scores(answers: &mut [WorkingAnswer]) -> usize {
    let mut fallback = 0;

    for working in answers.iter_mut() {
        let answer = &mut working.answer;
        let max = answer.max_possible_score;

        if working.question_type.is_mcq() {
            if answer.raw_score.is_none() {
                answer.raw_score = Some(0.0);
                answer.is_correct = Some(false);
                fallback += 1;
            }
        } else {
            // PENDING and ERROR answers without credit end up here.
            if answer.raw_score.is_none() {
                if working.has_content {
                    answer.raw_score = Some(max * FINALIZATION_EFFORT_CREDIT);
                } else {
                    answer.raw_score = Some(0.0);
                }
                answer.is_correct = Some(false);
                fallback += 1;
            }
        }

        let raw = answer.raw_score.unwrap_or(0.0);
        if answer.is_correct.is_none() {
            answer.is_correct = Some(scoring::derive_is_correct(working.question_type, raw, max));
        }
        if answer.weighted_score.is_none() {
            answer.weighted_score = Some(scoring::weighted(raw, working.weight));
        }
    }

    fallback
}

/// Re-derives correctness and weighted scores from stored raw scores only.
/// Used by the rescore backfill; never calls the evaluator.
pub fn rederive_scores(answers: &mut [WorkingAnswer]) -> usize {
    let fallback = finalize_scores(answers);
    for working in answers.iter_mut() {
        let answer = &mut working.answer;
        let raw = answer.raw_score.unwrap_or(0.0);
        answer.is_correct = Some(scoring::derive_is_correct(
            working.question_type,
            raw,
            answer.max_possible_score,
        ));
        answer.weighted_score = Some(scoring::weighted(raw, working.weight));
    }
    fallback
}

pub fn total_raw_score(answers: &[WorkingAnswer]) -> f64 {
    answers
        .iter()
        .map(|w| w.answer.raw_score.unwrap_or(0.0))
        .sum()
}

/// Steps 1 to 4 of completion: dedup, evaluate, finalize, aggregate.
pub async fn run_completion(
    answers: Vec<WorkingAnswer>,
    evaluation_mode: EvaluationMode,
    evaluator: &dyn AnswerEvaluator,
    language: &str,
    total_possible_score: f64,
    pass_threshold: f64,
) -> CompletionOutcome {
    let (mut answers, discarded_ids) = dedup_latest(answers);

    let evaluations_failed = match evaluation_mode {
        EvaluationMode::EndOfExam => evaluate_pending(&mut answers, evaluator, language).await,
        EvaluationMode::RealTime => 0,
    };

    let fallback_scored = finalize_scores(&mut answers);
    let total_score_achieved = total_raw_score(&answers);
    let passed = scoring::passed(total_score_achieved, total_possible_score, pass_threshold);

    CompletionOutcome {
        answers,
        discarded_ids,
        total_score_achieved,
        passed,
        evaluations_failed,
        fallback_scored,
    }
}
