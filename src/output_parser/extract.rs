//! Shared extraction helpers for generative-service payloads.
//!
//! Fence and think-block stripping used by the sanitizer, string-aware
//! bracket matching, and the field-span salvage the unit orchestrator falls
//! back to when a whole payload will not decode.

/// Strip all `<think>...</think>` and `<thinking>...</thinking>` blocks from text.
///
/// Handles complete blocks, incomplete blocks (no closing tag),
/// and multiple sequential blocks.
///
/// # Examples
///
/// ```
/// use curriculum_forge::output_parser::strip_think_tags;
///
/// assert_eq!(strip_think_tags("<think>reasoning</think>result"), "result");
/// assert_eq!(strip_think_tags("<think>no closing tag"), "");
/// ```
pub fn strip_think_tags(text: &str) -> String {
    let result = strip_tag_variant(text, "<think>", "</think>");
    strip_tag_variant(&result, "<thinking>", "</thinking>")
}

fn strip_tag_variant(text: &str, open: &str, close: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find(open) {
        if let Some(end_offset) = result[start..].find(close) {
            let end = start + end_offset + close.len();
            result = format!("{}{}", &result[..start], &result[end..]);
        } else {
            result.truncate(start);
            break;
        }
    }
    result
}

/// Strip a markdown code-fence opener (and its language hint) that precedes
/// the payload, and trim surrounding whitespace.
///
/// Only a fence appearing before the first `{` or `[` is treated as a
/// wrapper. Backticks inside the payload's strings are left alone.
///
/// # Examples
///
/// ```
/// use curriculum_forge::output_parser::extract::strip_fence_wrapper;
///
/// assert_eq!(strip_fence_wrapper("```json\n{\"a\": 1}\n```"), "{\"a\": 1}\n```");
/// assert_eq!(strip_fence_wrapper("{\"md\": \"```rust\"}"), "{\"md\": \"```rust\"}");
/// ```
pub fn strip_fence_wrapper(text: &str) -> &str {
    let text = text.trim();
    let Some(fence) = text.find("```") else {
        return text;
    };
    if first_opener(text).is_some_and(|opener| opener < fence) {
        return text;
    }
    text[fence + 3..]
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim()
}

/// Byte offset of the first `{` or `[` in `text`.
pub fn first_opener(text: &str) -> Option<usize> {
    text.find(|c: char| c == '{' || c == '[')
}

/// Byte offset of the delimiter closing the one at `open_at`.
///
/// Nesting-aware and string-aware. Returns `None` when `open_at` is not a
/// `{` or `[`, or when the structure never closes.
pub fn matching_close(text: &str, open_at: usize) -> Option<usize> {
    let open = text[open_at..].chars().next()?;
    let close = match open {
        '{' => '}',
        '[' => ']',
        _ => return None,
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text[open_at..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(open_at + i);
            }
        }
    }
    None
}

/// Byte offset of the first non-whitespace character after `"field":`.
fn value_start(text: &str, field: &str) -> Option<usize> {
    let key = format!("\"{}\"", field);
    let mut scan_from = 0;
    while let Some(offset) = text[scan_from..].find(&key) {
        let after_key = scan_from + offset + key.len();
        let rest = &text[after_key..];
        let trimmed = rest.trim_start();
        if let Some(after_colon) = trimmed.strip_prefix(':') {
            let value = after_colon.trim_start();
            return Some(text.len() - value.len());
        }
        scan_from = after_key;
    }
    None
}

/// Pull a complete string value for `field` out of an otherwise broken payload.
///
/// Raw newlines, carriage returns, and tabs inside the value are tolerated.
/// Returns `None` if the key is absent, the value is not a string, or the
/// string never terminates.
///
/// # Examples
///
/// ```
/// use curriculum_forge::output_parser::extract::extract_string_field;
///
/// let broken = "{\"content\": \"# Title\nline two\", \"quiz\": [oops";
/// assert_eq!(extract_string_field(broken, "content").as_deref(), Some("# Title\nline two"));
/// ```
pub fn extract_string_field(text: &str, field: &str) -> Option<String> {
    let start = value_start(text, field)?;
    let body = text[start..].strip_prefix('"')?;

    let mut literal = String::with_capacity(body.len() + 2);
    literal.push('"');
    let mut escape_next = false;
    for ch in body.chars() {
        if escape_next {
            escape_next = false;
            literal.push(ch);
            continue;
        }
        match ch {
            '\\' => {
                escape_next = true;
                literal.push(ch);
            }
            '"' => {
                literal.push('"');
                return serde_json::from_str(&literal).ok();
            }
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            c if (c as u32) < 0x20 => {}
            c => literal.push(c),
        }
    }
    None
}

/// Pull the complete array value for `field` out of an otherwise broken payload.
///
/// Returns the raw span including its brackets. The span itself may still
/// need sanitizing before it decodes.
///
/// # Examples
///
/// ```
/// use curriculum_forge::output_parser::extract::extract_array_field;
///
/// let broken = r#"{"content": "unterminated..., "quiz": [{"question": "Q"}]}"#;
/// assert_eq!(extract_array_field(broken, "quiz"), Some(r#"[{"question": "Q"}]"#));
/// ```
pub fn extract_array_field<'a>(text: &'a str, field: &str) -> Option<&'a str> {
    let start = value_start(text, field)?;
    if !text[start..].starts_with('[') {
        return None;
    }
    let end = matching_close(text, start)?;
    Some(&text[start..=end])
}
