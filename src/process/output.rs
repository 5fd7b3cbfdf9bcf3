//! Normalization of the AI tool's stdout.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Envelope fields that may carry the tool's answer, in lookup order.
const MESSAGE_FIELDS: &[&str] = &["result", "response", "content", "output", "message"];

/// Answer extracted from the tool's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolMessage {
    pub text: String,
    /// The envelope reported `"is_error": true`.
    pub is_error: bool,
}

/// Remove ANSI escape sequences and stray control characters, keeping line
/// structure intact.
pub fn strip_ansi(raw: &str) -> String {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    static CONTROL: OnceLock<Option<Regex>> = OnceLock::new();

    let ansi = ANSI.get_or_init(|| {
        Regex::new(r"\x1B\[[0-9;?]*[ -/]*[@-~]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B[@-Z\\-_]|\u{9b}[0-9;?]*[@-~]").ok()
    });
    let control = CONTROL.get_or_init(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]+").ok());

    let mut text = raw.to_string();
    if let Some(regex) = ansi {
        text = regex.replace_all(&text, "").into_owned();
    }
    if let Some(regex) = control {
        text = regex.replace_all(&text, "").into_owned();
    }
    text.replace("\r\n", "\n")
}

/// Unwrap the tool's JSON envelope. Non-JSON output is returned as-is.
pub fn extract_message(output: &str) -> ToolMessage {
    let trimmed = output.trim();
    let plain = || ToolMessage {
        text: trimmed.to_string(),
        is_error: false,
    };

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return plain();
    };

    match value {
        Value::String(text) => ToolMessage {
            text,
            is_error: false,
        },
        Value::Object(map) => {
            let is_error = map.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            MESSAGE_FIELDS
                .iter()
                .filter_map(|field| map.get(*field))
                .find_map(text_of)
                .map(|text| ToolMessage { text, is_error })
                .unwrap_or_else(plain)
        }
        _ => plain(),
    }
}

/// String value, or the joined `text` of a list of content blocks.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

/// Remove a ```json fence that wraps the whole text.
pub fn strip_json_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed
        .strip_prefix("```json")
        .and_then(|rest| rest.strip_suffix("```"))
    {
        return inner.trim().to_string();
    }
    trimmed.to_string()
}

/// Full cleanup applied to a successful invocation's stdout.
pub fn normalize(raw: &str) -> ToolMessage {
    let message = extract_message(&strip_ansi(raw));
    ToolMessage {
        text: strip_json_fence(&message.text),
        is_error: message.is_error,
    }
}
