// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;
use url::Url;

/// Time limit forced onto practice sessions (24 hours).
pub const PRACTICE_TIME_LIMIT_SECS: i32 = 24 * 60 * 60;

/// Fallback time limit when neither the client nor the exam provides one.
pub const DEFAULT_TIME_LIMIT_SECS: i32 = 60 * 60;

/// Bounds for a client-supplied time limit on session types that honour it.
pub const MIN_TIME_LIMIT_SECS: i32 = 60;
pub const MAX_TIME_LIMIT_SECS: i32 = 7 * 24 * 60 * 60;

/// How background evaluation jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// A single long-lived worker task fed through a channel.
    Worker,
    /// One detached task per job.
    Detached,
}

impl FromStr for QueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" => Ok(QueueMode::Worker),
            "detached" => Ok(QueueMode::Detached),
            other => Err(format!("unknown EVALUATION_QUEUE value '{}'", other)),
        }
    }
}

/// Connection details for the AI answer evaluator.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_expiration: u64,
    pub rust_log: String,
    pub bind_addr: String,
    /// `None` when no evaluator endpoint is configured.
    pub evaluator: Option<EvaluatorConfig>,
    pub queue_mode: QueueMode,
    /// Backlog limit of the single-worker queue.
    pub queue_capacity: usize,
    pub max_evaluation_retries: i32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let jwt_expiration = parse_or("JWT_EXPIRATION", 86_400);

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let evaluator = match env::var("AI_EVALUATOR_URL") {
            Ok(raw) if !raw.trim().is_empty() => {
                let base_url = Url::parse(raw.trim())
                    .expect("AI_EVALUATOR_URL must be a valid URL");
                Some(EvaluatorConfig {
                    base_url,
                    api_key: env::var("AI_EVALUATOR_API_KEY").ok(),
                    model: env::var("AI_EVALUATOR_MODEL")
                        .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                    timeout_secs: parse_or("AI_EVALUATOR_TIMEOUT_SECS", 30),
                })
            }
            _ => None,
        };

        let queue_mode = env::var("EVALUATION_QUEUE")
            .ok()
            .map(|v| v.parse::<QueueMode>().expect("EVALUATION_QUEUE must be 'worker' or 'detached'"))
            .unwrap_or(QueueMode::Worker);

        let queue_capacity = parse_or("EVALUATION_QUEUE_CAPACITY", 1024);

        let max_evaluation_retries = parse_or("MAX_EVALUATION_RETRIES", 3);

        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            rust_log,
            bind_addr,
            evaluator,
            queue_mode,
            queue_capacity,
            max_evaluation_retries,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
