//! Log helpers: level selection and safe previews of user/tool text.

use regex::Regex;
use std::sync::OnceLock;

/// Keys whose quoted values are hidden before text reaches the logs.
const SECRET_KEYS: &[&str] = &[
    "api_key",
    "token",
    "password",
    "secret",
    "key",
    "appid",
    "appsecret",
    "app_key",
    "access_token",
];

/// Resolve the tracing level from the `--debug` flag and the configured name.
pub fn resolve_level(debug: bool, configured: &str) -> tracing::Level {
    if debug {
        return tracing::Level::DEBUG;
    }
    match configured.trim().to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    }
}

/// Truncate to `max_chars` characters, appending an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Replace `"secret_key": "value"` pairs with a masked value.
pub fn mask_secrets(text: &str) -> String {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        let keys = SECRET_KEYS.join("|");
        Regex::new(&format!(r#"(?i)("(?:{keys})"\s*:\s*")[^"]*(")"#)).ok()
    });
    match pattern {
        Some(regex) => regex.replace_all(text, "${1}***MASKED***${2}").into_owned(),
        None => text.to_string(),
    }
}

/// Masked, truncated preview used for every log line that quotes user text.
pub fn log_preview(text: &str) -> String {
    preview(&mask_secrets(text), 100)
}
