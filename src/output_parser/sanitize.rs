//! Best-effort repair of structured-text payloads.
//!
//! Generative services truncate output near their token budget, sometimes
//! mid-string, and wrap it in fences or prose. [`sanitize`] turns such a
//! payload into text a JSON decoder can attempt, without altering content
//! that is already well formed. No regex is used: the repair is a single
//! left-to-right scan with a stack of open containers.

use super::extract::{first_opener, strip_fence_wrapper, strip_think_tags};

/// Returned when the payload holds no object or array at all.
pub const EMPTY_OBJECT: &str = "{}";

/// Position within an object, used to finish a dangling member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Expecting a key or the closer.
    Key,
    /// Key read, colon not yet seen.
    Colon,
    /// Colon read, value not yet started.
    Value,
    /// Member complete or value in progress.
    Done,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Object(Slot),
    Array,
}

impl Frame {
    fn closer(self) -> char {
        match self {
            Frame::Object(_) => '}',
            Frame::Array => ']',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringRole {
    Key,
    Value,
}

struct Scanner {
    out: String,
    stack: Vec<Frame>,
    in_string: Option<StringRole>,
    escaped: bool,
    scalar_start: Option<usize>,
}

impl Scanner {
    fn new(capacity: usize) -> Self {
        Self {
            out: String::with_capacity(capacity + 8),
            stack: Vec::new(),
            in_string: None,
            escaped: false,
            scalar_start: None,
        }
    }

    fn set_slot(&mut self, next: Slot) {
        if let Some(Frame::Object(slot)) = self.stack.last_mut() {
            *slot = next;
        }
    }

    fn value_started(&mut self) {
        self.set_slot(Slot::Done);
    }

    /// Consume one character. Returns `true` once the root container closes.
    fn feed(&mut self, ch: char) -> bool {
        if is_stray_control(ch) {
            // An escape whose character is dropped would swallow the next one.
            if self.in_string.is_some() && self.escaped {
                self.escaped = false;
                self.out.pop();
            }
            return false;
        }
        if let Some(role) = self.in_string {
            self.feed_string(ch, role);
            return false;
        }

        let structural = matches!(ch, '"' | '{' | '[' | '}' | ']' | ',' | ':' | '`')
            || is_json_whitespace(ch);
        if structural {
            self.scalar_start = None;
        }

        match ch {
            '"' => {
                let role = if matches!(self.stack.last(), Some(Frame::Object(Slot::Key))) {
                    StringRole::Key
                } else {
                    self.value_started();
                    StringRole::Value
                };
                self.in_string = Some(role);
                self.out.push('"');
            }
            '{' => {
                self.value_started();
                self.stack.push(Frame::Object(Slot::Key));
                self.out.push('{');
            }
            '[' => {
                self.value_started();
                self.stack.push(Frame::Array);
                self.out.push('[');
            }
            '}' | ']' => return self.close(ch),
            ',' => {
                self.set_slot(Slot::Key);
                self.out.push(',');
            }
            ':' => {
                self.set_slot(Slot::Value);
                self.out.push(':');
            }
            // Stray fence backticks outside any string.
            '`' => {}
            c if is_json_whitespace(c) => self.out.push(c),
            c => {
                if self.scalar_start.is_none() {
                    self.scalar_start = Some(self.out.len());
                    self.value_started();
                }
                self.out.push(c);
            }
        }
        false
    }

    fn feed_string(&mut self, ch: char, role: StringRole) {
        if self.escaped {
            self.escaped = false;
            match ch {
                '\n' => self.out.push('n'),
                '\r' => self.out.push('r'),
                '\t' => self.out.push('t'),
                c => self.out.push(c),
            }
            return;
        }
        match ch {
            '\\' => {
                self.escaped = true;
                self.out.push('\\');
            }
            '"' => {
                self.out.push('"');
                self.in_string = None;
                if role == StringRole::Key {
                    self.set_slot(Slot::Colon);
                }
            }
            '\n' => self.out.push_str("\\n"),
            '\r' => self.out.push_str("\\r"),
            '\t' => self.out.push_str("\\t"),
            c => self.out.push(c),
        }
    }

    /// Handle a closer, emitting any closers it skips over. A closer with no
    /// matching opener is dropped.
    fn close(&mut self, ch: char) -> bool {
        let Some(pos) = self.stack.iter().rposition(|f| f.closer() == ch) else {
            return false;
        };
        while self.stack.len() > pos {
            if let Some(frame) = self.stack.pop() {
                self.close_frame(frame);
            }
        }
        self.stack.is_empty()
    }

    fn close_frame(&mut self, frame: Frame) {
        let kept = self
            .out
            .trim_end_matches(|c: char| is_json_whitespace(c) || c == ',' || c == ':')
            .len();
        if self.out[kept..].contains(|c: char| c == ',' || c == ':') {
            self.out.truncate(kept);
        }
        if let Frame::Object(Slot::Colon | Slot::Value) = frame {
            self.out.push_str(":null");
        }
        self.out.push(frame.closer());
    }

    /// Complete whatever the input left open.
    fn finish(mut self) -> String {
        if self.stack.is_empty() {
            return self.out;
        }

        if let Some(role) = self.in_string.take() {
            if self.escaped {
                self.out.pop();
            }
            trim_partial_unicode_escape(&mut self.out);
            self.out.push('"');
            if role == StringRole::Key {
                self.set_slot(Slot::Colon);
            }
        } else if let Some(start) = self.scalar_start.take() {
            let completed = complete_scalar(&self.out[start..]);
            self.out.truncate(start);
            match completed {
                Some(token) => self.out.push_str(&token),
                None => self.set_slot(Slot::Value),
            }
        }

        while let Some(frame) = self.stack.pop() {
            self.close_frame(frame);
        }
        self.out
    }
}

fn is_json_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r')
}

/// Finish a literal or number cut off mid-token. `None` if nothing usable remains.
fn complete_scalar(token: &str) -> Option<String> {
    for literal in ["true", "false", "null"] {
        if literal.starts_with(token) {
            return Some(literal.to_string());
        }
    }
    let number = token.trim_end_matches(|c: char| matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if number.is_empty() {
        None
    } else {
        Some(number.to_string())
    }
}

/// Whether the backslash at `at` starts an escape rather than ending one.
fn is_live_escape(out: &str, at: usize) -> bool {
    out[..at].bytes().rev().take_while(|&b| b == b'\\').count() % 2 == 0
}

/// Drop an incomplete `\uXXXX` escape or an unpaired high surrogate at the end
/// of a string that was cut off.
fn trim_partial_unicode_escape(out: &mut String) {
    if let Some(p) = out.rfind("\\u") {
        let tail = &out[p + 2..];
        if tail.len() < 4 && tail.bytes().all(|b| b.is_ascii_hexdigit()) && is_live_escape(out, p)
        {
            out.truncate(p);
        }
    }

    if out.len() >= 6 {
        let p = out.len() - 6;
        if out.is_char_boundary(p) && out[p..].starts_with("\\u") && is_live_escape(out, p) {
            let hex = &out[p + 2..];
            if hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                if let Ok(code) = u16::from_str_radix(hex, 16) {
                    if (0xD800..0xDC00).contains(&code) {
                        out.truncate(p);
                    }
                }
            }
        }
    }
}

/// Remove commas followed only by whitespace and a closer, outside strings.
fn remove_trailing_commas(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len());
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &ch) in chars.iter().enumerate() {
        if escape_next {
            escape_next = false;
            result.push(ch);
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(ch);
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }
    result
}

/// Control characters below space other than newline, carriage return and tab.
fn is_stray_control(c: char) -> bool {
    c < ' ' && !matches!(c, '\n' | '\r' | '\t')
}

/// Repair a raw payload into a best-effort JSON document.
///
/// Never fails. Fence wrappers, leading prose, and anything after the root
/// container are discarded; truncated strings, members, and containers are
/// closed. The result may still fail to decode for pathological input.
///
/// # Examples
///
/// ```
/// use curriculum_forge::output_parser::sanitize;
///
/// assert_eq!(sanitize("```json\n{\"a\": [1, 2"), "{\"a\": [1, 2]}");
/// assert_eq!(sanitize("no structure here"), "{}");
/// ```
pub fn sanitize(raw: &str) -> String {
    let trimmed = raw.trim();
    let unthought;
    let text = if trimmed.starts_with("<think") {
        unthought = strip_think_tags(trimmed);
        unthought.as_str()
    } else {
        trimmed
    };
    let text = strip_fence_wrapper(text);

    let Some(start) = first_opener(text) else {
        tracing::debug!(len = raw.len(), "payload holds no object or array");
        return EMPTY_OBJECT.to_string();
    };

    let body = &text[start..];
    let mut scanner = Scanner::new(body.len());
    for ch in body.chars() {
        if scanner.feed(ch) {
            break;
        }
    }
    if !scanner.stack.is_empty() {
        tracing::debug!(
            open_containers = scanner.stack.len(),
            in_string = scanner.in_string.is_some(),
            "closing truncated payload"
        );
    }

    remove_trailing_commas(&scanner.finish())
}
