//! AI answer evaluation collaborator.
//!
//! The engine only depends on [`AnswerEvaluator`]. The HTTP implementation
//! talks to an OpenAI-compatible chat completions endpoint with a bounded
//! timeout; the engine never retries on its own.

use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{config::EvaluatorConfig, models::question::QuestionType};

/// Everything an evaluator needs to judge one answer.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub question_id: i64,
    pub question_type: QuestionType,
    pub question_content: String,
    pub answer_text: Option<String>,
    pub calculation_input: Option<serde_json::Value>,
    pub language: String,
    pub max_score: f64,
}

/// Verdict as returned by the evaluator, before normalization.
///
/// `score` in `[0, 1]` is a fraction of the maximum; anything above 1 is an
/// absolute point value. See `scoring::normalize_score`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: f64,
    pub is_correct: bool,
    pub feedback: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug)]
pub enum EvaluationError {
    /// No evaluator is configured for this deployment.
    Unavailable(String),
    /// The evaluator did not answer within the configured timeout.
    Timeout(u64),
    /// Connection-level failure.
    Transport(String),
    /// The evaluator answered with a non-success HTTP status.
    Api { status: u16, message: String },
    /// The evaluator answered, but not with a usable verdict.
    MalformedResponse(String),
}

impl fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::Unavailable(msg) => write!(f, "evaluator unavailable: {}", msg),
            EvaluationError::Timeout(secs) => write!(f, "evaluation timed out after {}s", secs),
            EvaluationError::Transport(msg) => write!(f, "evaluator unreachable: {}", msg),
            EvaluationError::Api { status, message } => {
                write!(f, "evaluator returned HTTP {}: {}", status, message)
            }
            EvaluationError::MalformedResponse(msg) => {
                write!(f, "malformed evaluator response: {}", msg)
            }
        }
    }
}

impl std::error::Error for EvaluationError {}

#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError>;
}

/// Stand-in used when `AI_EVALUATOR_URL` is not set.
pub struct UnavailableEvaluator;

#[async_trait]
impl AnswerEvaluator for UnavailableEvaluator {
    async fn evaluate(&self, _request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        Err(EvaluationError::Unavailable(
            "AI evaluation is not configured".to_string(),
        ))
    }
}

const SYSTEM_PROMPT: &str = "You grade exam answers. Reply with a single JSON object \
{\"score\": <number between 0 and 1>, \"is_correct\": <bool>, \"feedback\": <string>} and nothing else.";

pub struct HttpAnswerEvaluator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
}

impl HttpAnswerEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Result<Self, EvaluationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvaluationError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                config.base_url.as_str().trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct Verdict {
    score: f64,
    is_correct: bool,
    #[serde(default)]
    feedback: String,
}

fn user_prompt(request: &EvaluationRequest) -> String {
    let submitted = match (&request.answer_text, &request.calculation_input) {
        (Some(text), _) if !text.trim().is_empty() => text.clone(),
        (_, Some(input)) => input.to_string(),
        _ => String::new(),
    };
    format!(
        "Question type: {}\nLanguage: {}\nMaximum points: {}\n\nQuestion:\n{}\n\nCandidate answer:\n{}",
        request.question_type.as_str(),
        request.language,
        request.max_score,
        request.question_content,
        submitted
    )
}

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex is valid")
});

/// Pulls the verdict object out of the model reply, fenced or bare.
fn parse_verdict(content: &str) -> Result<Verdict, EvaluationError> {
    let candidate = match FENCED_JSON.captures(content) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => match (content.find('{'), content.rfind('}')) {
            (Some(start), Some(end)) if start < end => &content[start..=end],
            _ => {
                return Err(EvaluationError::MalformedResponse(
                    "no JSON object in reply".to_string(),
                ));
            }
        },
    };

    let verdict: Verdict = serde_json::from_str(candidate)
        .map_err(|e| EvaluationError::MalformedResponse(e.to_string()))?;

    if !verdict.score.is_finite() || verdict.score < 0.0 {
        return Err(EvaluationError::MalformedResponse(format!(
            "score out of range: {}",
            verdict.score
        )));
    }
    Ok(verdict)
}

#[async_trait]
impl AnswerEvaluator for HttpAnswerEvaluator {
    #[instrument(skip(self, request), fields(question_id = request.question_id))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation, EvaluationError> {
        let start = Instant::now();

        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(request),
                },
            ],
        };

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EvaluationError::Timeout(self.timeout_secs)
            } else {
                EvaluationError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EvaluationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| EvaluationError::MalformedResponse(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| EvaluationError::MalformedResponse("empty choices".to_string()))?;

        let verdict = parse_verdict(content)?;
        let latency_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(latency_ms, score = verdict.score, "answer evaluated");

        Ok(Evaluation {
            score: verdict.score,
            is_correct: verdict.is_correct,
            feedback: verdict.feedback,
            metadata: serde_json::json!({
                "model": chat.model.unwrap_or_else(|| self.model.clone()),
                "latency_ms": latency_ms,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let v = parse_verdict(r#"{"score": 0.8, "is_correct": true, "feedback": "good"}"#).unwrap();
        assert_eq!(v.score, 0.8);
        assert!(v.is_correct);
        assert_eq!(v.feedback, "good");
    }

    #[test]
    fn parses_fenced_json_with_chatter() {
        let reply = "Here you go:\n```json\n{\"score\": 4, \"is_correct\": false}\n```\nThanks";
        let v = parse_verdict(reply).unwrap();
        assert_eq!(v.score, 4.0);
        assert!(!v.is_correct);
        assert!(v.feedback.is_empty());
    }

    #[test]
    fn rejects_replies_without_verdict() {
        assert!(matches!(
            parse_verdict("I cannot grade this."),
            Err(EvaluationError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_verdict(r#"{"feedback": "missing score"}"#),
            Err(EvaluationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn rejects_negative_scores() {
        assert!(parse_verdict(r#"{"score": -1, "is_correct": false}"#).is_err());
    }

    #[test]
    fn prompt_falls_back_to_calculation_input() {
        let req = EvaluationRequest {
            question_id: 1,
            question_type: QuestionType::Calculation,
            question_content: "2+2?".into(),
            answer_text: Some("  ".into()),
            calculation_input: Some(serde_json::json!({"result": 4})),
            language: "en".into(),
            max_score: 5.0,
        };
        let prompt = user_prompt(&req);
        assert!(prompt.contains(r#"{"result":4}"#));
        assert!(prompt.contains("CALCULATION"));
    }

    #[tokio::test]
    async fn unavailable_evaluator_always_fails() {
        let req = EvaluationRequest {
            question_id: 1,
            question_type: QuestionType::OpenEnded,
            question_content: "Explain".into(),
            answer_text: Some("Because".into()),
            calculation_input: None,
            language: "en".into(),
            max_score: 10.0,
        };
        assert!(matches!(
            UnavailableEvaluator.evaluate(&req).await,
            Err(EvaluationError::Unavailable(_))
        ));
    }
}
