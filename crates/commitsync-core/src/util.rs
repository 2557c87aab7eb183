//! Small helpers shared by the models, config and stores.

/// Longest excerpt of a foreign error kept in our own messages
const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed text, or `None` when nothing but whitespace is left
pub fn non_blank(value: &str) -> Option<&str> {
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

/// Prefix a foreign error with context, cutting long payload echoes short
pub fn error_excerpt(context: &str, error: &impl std::fmt::Display) -> String {
    let detail: String = error
        .to_string()
        .trim()
        .chars()
        .take(ERROR_EXCERPT_CHARS)
        .collect();
    format!("{context}: {detail}")
}

/// Current Unix timestamp in milliseconds.
pub fn unix_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
