//! Best-effort repair of model-emitted tool arguments
//!
//! Models regularly produce argument strings that are almost JSON. Before
//! giving up, the following fixes are applied in order, re-parsing after
//! each one:
//!
//! 1. empty or whitespace-only input is read as `{}`
//! 2. strict parse
//! 3. strip a surrounding markdown code fence
//! 4. drop trailing commas before `}` or `]` (outside strings)
//! 5. close an unterminated string literal
//! 6. append closers for unbalanced `{` and `[`, innermost first
//!
//! Closing brackets can expose a new trailing comma (`{"a": 1,`), so step 4
//! runs once more at the end. Whatever parses must be a JSON object.

use serde_json::{Map, Value};

use crate::core::{Result, StepwiseError};

/// Parse raw tool arguments into an object, repairing common defects
pub fn parse_arguments(tool: &str, raw: &str) -> Result<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }

    let strict_error = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => return into_object(tool, value),
        Err(e) => e,
    };

    let mut text = strip_code_fence(trimmed).to_string();
    if let Some(value) = try_parse(&text) {
        return into_object(tool, value);
    }

    let passes: [fn(&str) -> String; 4] = [
        remove_trailing_commas,
        close_unterminated_string,
        close_brackets,
        remove_trailing_commas,
    ];
    for pass in passes {
        text = pass(&text);
        if let Some(value) = try_parse(&text) {
            tracing::debug!(tool, repaired = %text, "Repaired malformed tool arguments");
            return into_object(tool, value);
        }
    }

    Err(StepwiseError::malformed(
        tool,
        format!("invalid JSON ({})", strict_error),
    ))
}

fn try_parse(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

fn into_object(tool: &str, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StepwiseError::malformed(
            tool,
            format!("expected a JSON object, got {}", kind(&other)),
        )),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Remove a ```json ... ``` wrapper
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the info string (e.g. `json`) up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Walks `text` and reports, for every char, whether it sits inside a string
struct Scanner {
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            in_string: false,
            escaped: false,
        }
    }

    /// Feed one char; returns true if the char is structural (outside strings)
    fn feed(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            false
        } else if c == '"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut scanner = Scanner::new();

    for (i, &c) in chars.iter().enumerate() {
        if scanner.feed(c) && c == ',' {
            let next = chars[i + 1..].iter().copied().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn close_unterminated_string(text: &str) -> String {
    let mut scanner = Scanner::new();
    for c in text.chars() {
        scanner.feed(c);
    }
    if !scanner.in_string {
        return text.to_string();
    }

    let mut out = text.to_string();
    if scanner.escaped {
        // A dangling backslash would escape the closing quote
        out.pop();
    }
    out.push('"');
    out
}

fn close_brackets(text: &str) -> String {
    let mut scanner = Scanner::new();
    let mut stack = Vec::new();

    for c in text.chars() {
        if !scanner.feed(c) {
            continue;
        }
        match c {
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    out.extend(stack.into_iter().rev());
    out
}
