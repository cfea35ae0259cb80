// src/utils/text.rs

/// Normalizes a free-text answer before it is stored or evaluated.
///
/// The text is kept verbatim apart from surrounding whitespace; answers are
/// plain text, never markup, so `<`, `>` and `&` are data. Blank input
/// counts as no answer.
pub fn normalize_answer_text(input: &str) -> Option<String> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
