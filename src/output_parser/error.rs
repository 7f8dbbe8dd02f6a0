//! Error types for payload decoding.

use crate::error::PipelineError;

/// Errors returned when a sanitized payload cannot be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The service response was empty or whitespace-only.
    #[error("empty response")]
    EmptyResponse,

    /// The sanitized payload failed to deserialize into the target type.
    #[error("payload did not match the expected {expected} shape: {reason}")]
    DeserializationFailed {
        /// Short name of the target type.
        expected: &'static str,
        /// The serde error message.
        reason: String,
        /// A truncated copy of the sanitized payload (max 200 chars).
        raw_json: String,
    },

    /// A required field was missing, empty, or out of range after decoding.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        PipelineError::structural(err.to_string())
    }
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}
