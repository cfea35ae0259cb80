// src/models/mod.rs

pub mod exam;
pub mod exam_session;
pub mod performance;
pub mod question;
pub mod user_answer;
