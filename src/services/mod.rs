//! Domain logic behind the HTTP handlers.
//!
//! `finalizer`, `scoring` and `policy` are pure; everything else talks to
//! Postgres or to an external collaborator.

pub mod analytics;
pub mod answers;
pub mod evaluator;
pub mod exam_session;
pub mod finalizer;
pub mod policy;
pub mod question_bank;
pub mod queue;
pub mod scoring;
