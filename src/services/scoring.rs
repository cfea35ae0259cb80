//! Scoring rules shared by submission, completion and rescoring.

use std::collections::HashSet;

use crate::{
    models::{
        question::{Choice, QuestionType},
        user_answer::{EvaluationStatus, UserAnswer},
    },
    services::evaluator::{Evaluation, EvaluationError},
};

/// Credit for a non-empty answer whose end-of-exam evaluation failed.
pub const EVALUATION_FAILURE_CREDIT: f64 = 0.3;

/// Credit for a non-empty answer that reaches finalization unscored.
pub const FINALIZATION_EFFORT_CREDIT: f64 = 0.1;

/// Fraction of the maximum a non-MCQ answer needs to count as correct.
pub const CORRECTNESS_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McqScore {
    pub raw_score: f64,
    pub is_correct: bool,
}

/// Strict all-or-nothing MCQ scoring.
///
/// Full points only when the selected set equals the correct set exactly.
/// An empty selection is always wrong.
pub fn score_mcq(selected: &[i64], choices: &[Choice], points: f64) -> McqScore {
    let selected: HashSet<i64> = selected.iter().copied().collect();
    let correct: HashSet<i64> = choices
        .iter()
        .filter(|c| c.is_correct)
        .map(|c| c.id)
        .collect();

    if !selected.is_empty() && selected == correct {
        McqScore {
            raw_score: points,
            is_correct: true,
        }
    } else {
        McqScore {
            raw_score: 0.0,
            is_correct: false,
        }
    }
}

/// Maps an evaluator score onto points.
///
/// `[0, 1]` is a fraction of `max_score`; above 1 is absolute, capped at `max_score`.
pub fn normalize_score(score: f64, max_score: f64) -> f64 {
    if score <= 1.0 {
        score.max(0.0) * max_score
    } else {
        score.min(max_score)
    }
}

pub fn derive_is_correct(question_type: QuestionType, raw_score: f64, max_score: f64) -> bool {
    if question_type.is_mcq() {
        raw_score > 0.0
    } else {
        raw_score >= max_score * CORRECTNESS_THRESHOLD
    }
}

/// `raw × weight`; a missing weight record leaves the raw score as is.
pub fn weighted(raw_score: f64, weight: Option<f64>) -> f64 {
    match weight {
        Some(w) => raw_score * w,
        None => raw_score,
    }
}

pub fn passed(total_score_achieved: f64, total_possible_score: f64, pass_threshold: f64) -> bool {
    total_score_achieved >= total_possible_score * pass_threshold
}

/// Records a successful evaluation on the answer.
pub fn apply_evaluation(answer: &mut UserAnswer, evaluation: &Evaluation, weight: Option<f64>) {
    let raw = normalize_score(evaluation.score, answer.max_possible_score);
    answer.raw_score = Some(raw);
    answer.weighted_score = Some(weighted(raw, weight));
    answer.is_correct = Some(evaluation.is_correct);
    answer.ai_feedback = Some(evaluation.feedback.clone());
    answer.evaluation_status = EvaluationStatus::Evaluated;
}

/// Real-time path: keep the answer, flag it, leave scoring to finalization.
pub fn mark_evaluation_error(answer: &mut UserAnswer, err: &EvaluationError) {
    answer.evaluation_status = EvaluationStatus::Error;
    answer.ai_feedback = Some(format!(
        "Automatic evaluation failed ({}). Your answer was saved and will be scored when the session is finalized.",
        err
    ));
}

/// End-of-exam path: flag the answer and grant effort credit.
pub fn apply_evaluation_failure_credit(
    answer: &mut UserAnswer,
    err: &EvaluationError,
    weight: Option<f64>,
) {
    let raw = answer.max_possible_score * EVALUATION_FAILURE_CREDIT;
    answer.raw_score = Some(raw);
    answer.weighted_score = Some(weighted(raw, weight));
    answer.is_correct = Some(false);
    answer.evaluation_status = EvaluationStatus::Error;
    answer.ai_feedback = Some(format!(
        "Automatic evaluation failed ({}). Partial credit was awarded for your attempt.",
        err
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choices() -> Vec<Choice> {
        ["A", "B", "C", "D"]
            .iter()
            .enumerate()
            .map(|(i, label)| Choice {
                id: i as i64 + 1,
                question_id: 1,
                content: label.to_string(),
                is_correct: *label == "A",
                display_order: i as i32,
            })
            .collect()
    }

    #[test]
    fn mcq_exact_match_scores_full_points() {
        let score = score_mcq(&[1], &choices(), 4.0);
        assert_eq!(score, McqScore { raw_score: 4.0, is_correct: true });
    }

    #[test]
    fn mcq_superset_subset_and_empty_score_zero() {
        for selected in [vec![1, 2], vec![], vec![2], vec![2, 3, 4]] {
            let score = score_mcq(&selected, &choices(), 4.0);
            assert_eq!(score.raw_score, 0.0, "selection {:?}", selected);
            assert!(!score.is_correct);
        }
    }

    #[test]
    fn mcq_multi_answer_needs_every_correct_choice() {
        let mut cs = choices();
        cs[2].is_correct = true; // A and C
        assert!(!score_mcq(&[1], &cs, 2.0).is_correct);
        assert!(score_mcq(&[3, 1], &cs, 2.0).is_correct);
        // Duplicated ids in the submission do not matter.
        assert!(score_mcq(&[1, 3, 3], &cs, 2.0).is_correct);
    }

    #[test]
    fn mcq_without_correct_choices_cannot_be_answered() {
        let mut cs = choices();
        cs.iter_mut().for_each(|c| c.is_correct = false);
        assert!(!score_mcq(&[], &cs, 1.0).is_correct);
    }

    #[test]
    fn normalize_fraction_vs_absolute() {
        assert_eq!(normalize_score(0.5, 10.0), 5.0);
        assert_eq!(normalize_score(1.0, 10.0), 10.0);
        assert_eq!(normalize_score(7.0, 10.0), 7.0);
        assert_eq!(normalize_score(15.0, 10.0), 10.0);
        assert_eq!(normalize_score(-0.2, 10.0), 0.0);
    }

    #[test]
    fn correctness_rule_per_type() {
        assert!(derive_is_correct(QuestionType::Mcq, 0.5, 1.0));
        assert!(!derive_is_correct(QuestionType::Mcq, 0.0, 1.0));
        assert!(derive_is_correct(QuestionType::OpenEnded, 7.0, 10.0));
        assert!(!derive_is_correct(QuestionType::Calculation, 6.9, 10.0));
    }

    #[test]
    fn pass_threshold_is_inclusive() {
        assert!(passed(70.0, 100.0, 0.7));
        assert!(!passed(69.999, 100.0, 0.7));
        assert!(passed(0.0, 0.0, 0.7));
    }

    #[test]
    fn weight_falls_back_to_raw() {
        assert_eq!(weighted(3.0, Some(2.0)), 6.0);
        assert_eq!(weighted(3.0, None), 3.0);
    }
}
