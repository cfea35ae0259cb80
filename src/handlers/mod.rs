// src/handlers/mod.rs

pub mod admin;
pub mod analytics;
pub mod exam_session;
pub mod user_answer;
