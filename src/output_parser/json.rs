//! Typed decoding of generative-service payloads.
//!
//! [`decode`] runs the raw text through [`sanitize`](super::sanitize::sanitize)
//! and deserializes the result. Any failure is a [`ParseError`], which the
//! pipeline treats as a structural failure.

use serde::de::DeserializeOwned;

use crate::output_parser::error::{truncate, ParseError};
use crate::output_parser::sanitize::sanitize;

/// Sanitize a raw payload and deserialize it into `T`.
///
/// # Examples
///
/// ```
/// use serde::Deserialize;
/// use curriculum_forge::output_parser::decode;
///
/// #[derive(Deserialize)]
/// struct Outline {
///     titles: Vec<String>,
/// }
///
/// let outline: Outline = decode("```json\n{\"titles\": [\"Safety\", \"Tool").unwrap();
/// assert_eq!(outline.titles, vec!["Safety", "Tool"]);
/// ```
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::EmptyResponse);
    }
    let cleaned = sanitize(raw);
    serde_json::from_str::<T>(&cleaned).map_err(|e| ParseError::DeserializationFailed {
        expected: short_type_name::<T>(),
        reason: e.to_string(),
        raw_json: truncate(&cleaned, 200),
    })
}

/// Decode into a `serde_json::Value` when the shape is not known.
pub fn decode_value(raw: &str) -> Result<serde_json::Value, ParseError> {
    decode(raw)
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Kv {
        key: String,
    }

    #[test]
    fn direct_json_object() {
        let result: Kv = decode(r#"{"key": "value"}"#).unwrap();
        assert_eq!(result.key, "value");
    }

    #[test]
    fn code_block_json() {
        let input = "Here's the data:\n```json\n{\"key\": \"value\"}\n```";
        let result: Kv = decode(input).unwrap();
        assert_eq!(result.key, "value");
    }

    #[test]
    fn truncated_json_still_decodes() {
        let result: Kv = decode(r#"{"key": "val"#).unwrap();
        assert_eq!(result.key, "val");
    }

    #[test]
    fn json_with_surrounding_text() {
        let input = "Sure! Here's your result: {\"key\": \"value\"}\nHope that helps!";
        let result: Kv = decode(input).unwrap();
        assert_eq!(result.key, "value");
    }

    #[test]
    fn decode_value_works() {
        let val = decode_value(r#"{"a": 1, "b": "two"}"#).unwrap();
        assert_eq!(val["a"], 1);
        assert_eq!(val["b"], "two");
    }

    #[test]
    fn empty_response_fails() {
        assert!(matches!(decode::<Kv>("  \n"), Err(ParseError::EmptyResponse)));
    }

    #[test]
    fn wrong_shape_reports_type() {
        let err = decode::<Kv>("no json at all").unwrap_err();
        match err {
            ParseError::DeserializationFailed {
                expected, raw_json, ..
            } => {
                assert_eq!(expected, "Kv");
                assert_eq!(raw_json, "{}");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
