//! Keyword classification of request text.
//!
//! Checked in order: direct command, doc-gen, web-research, code-dev. The
//! first family with a matching keyword wins; nothing matching means generic.

use crate::types::{Classification, DocFormat, Intent, IntentParams};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const DIRECT_PREFIXES: &[&str] = &["$ ", "/run "];

struct Family {
    intent: Intent,
    keywords: Regex,
}

fn families() -> &'static [Family] {
    static FAMILIES: OnceLock<Vec<Family>> = OnceLock::new();
    FAMILIES.get_or_init(|| {
        [
            (
                Intent::DocGen,
                r"(?i)写文档|生成文档|创建文档|文档|\b(document|report|whitepaper|write[- ]?up)s?\b|\b(pdf|docx)\b",
            ),
            (
                Intent::WebResearch,
                r"(?i)搜索|查找|获取信息|上网|\b(search|google|look\s+up|browse|latest news|on the web|online)\b",
            ),
            (
                Intent::CodeDev,
                r"(?i)写代码|开发|编程|代码|程序|\b(code|coding|program|programming|script|function|implement|debug|refactor)\b",
            ),
        ]
        .into_iter()
        .filter_map(|(intent, expr)| match Regex::new(expr) {
            Ok(keywords) => Some(Family { intent, keywords }),
            Err(e) => {
                tracing::error!("Invalid classifier keywords for {}: {}", intent, e);
                None
            }
        })
        .collect()
    })
}

/// Classify `text` by keywords. Total: every input gets an intent.
pub fn classify(text: &str) -> Classification {
    if let Some(command) = direct_command(text) {
        return Classification {
            intent: Intent::CodeDev,
            params: IntentParams {
                command: Some(command),
                ..Default::default()
            },
        };
    }

    let intent = families()
        .iter()
        .find(|family| family.keywords.is_match(text))
        .map(|family| family.intent)
        .unwrap_or(Intent::Generic);

    Classification {
        intent,
        params: params_for(intent, text),
    }
}

/// Parameters the pipelines need for `intent`, read from the request text.
pub fn params_for(intent: Intent, text: &str) -> IntentParams {
    match intent {
        Intent::DocGen => IntentParams {
            format: Some(detect_format(text)),
            ..Default::default()
        },
        Intent::WebResearch => IntentParams {
            query: Some(search_query(text)),
            ..Default::default()
        },
        Intent::CodeDev => IntentParams {
            language: requested_language(text),
            command: direct_command(text),
            ..Default::default()
        },
        Intent::Generic => IntentParams::default(),
    }
}

/// The command of a `$ cmd` or `/run cmd` message.
pub fn direct_command(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    DIRECT_PREFIXES.iter().find_map(|prefix| {
        let command = trimmed.strip_prefix(prefix)?.trim();
        (!command.is_empty()).then(|| command.to_string())
    })
}

pub fn detect_format(text: &str) -> DocFormat {
    let lower = text.to_lowercase();
    if lower.contains("pdf") {
        DocFormat::Pdf
    } else if lower.contains("docx") || lower.contains("word") {
        DocFormat::Docx
    } else if lower.contains("html") {
        DocFormat::Html
    } else {
        DocFormat::Markdown
    }
}

/// Strip a leading "search for" style verb so the rest can be used as the
/// query.
fn search_query(text: &str) -> String {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| {
        Regex::new(r"(?i)^\s*(please\s+)?(search(\s+the\s+web)?(\s+for)?|google|look\s+up|搜索|查找)[\s:：,，]*").ok()
    });
    let stripped = match prefix {
        Some(regex) => regex.replace(text, "").into_owned(),
        None => text.to_string(),
    };
    let query = stripped.trim();
    if query.is_empty() {
        text.trim().to_string()
    } else {
        query.to_string()
    }
}

/// Language named in the request ("... in rust", "a python script").
fn requested_language(text: &str) -> Option<String> {
    const NAMES: &[(&str, &str)] = &[
        ("python", "python"),
        ("javascript", "javascript"),
        ("node", "javascript"),
        ("typescript", "typescript"),
        ("golang", "go"),
        ("rust", "rust"),
        ("bash", "shell"),
        ("shell", "shell"),
        ("c++", "cpp"),
        ("cpp", "cpp"),
        ("java", "java"),
    ];
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '+'))
        .filter(|w| !w.is_empty())
        .collect();
    NAMES
        .iter()
        .find(|(name, _)| words.contains(name))
        .map(|(_, language)| language.to_string())
}

/// Guess the language of a code snippet with no fence tag.
pub fn detect_language(code: &str) -> &'static str {
    let trimmed = code.trim_start();
    if trimmed.starts_with("#!") {
        let shebang = trimmed.lines().next().unwrap_or_default();
        if shebang.contains("python") {
            return "python";
        }
        if shebang.contains("node") {
            return "javascript";
        }
        return "shell";
    }
    if trimmed.contains("package main") {
        "go"
    } else if trimmed.contains("#include") || trimmed.contains("using namespace") {
        "cpp"
    } else if trimmed.contains("function ")
        || trimmed.contains("const ")
        || trimmed.contains("let ")
        || trimmed.contains("console.log")
    {
        "javascript"
    } else {
        "python"
    }
}

/// Prompt asking the AI tool to classify a request as JSON.
pub fn analysis_prompt(text: &str) -> String {
    format!(
        "Classify the following user request. Reply with JSON only, in the form \
         {{\"task_type\": \"document_generation\" | \"web_browsing\" | \"program_development\" | \"general\", \
         \"description\": \"...\"}}.\n\nRequest: {}",
        text
    )
}

/// Read the intent from the tool's analysis reply. The JSON object may be
/// surrounded by prose.
pub fn parse_tool_analysis(reply: &str) -> Option<Intent> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;
    value
        .get("task_type")
        .and_then(Value::as_str)
        .and_then(Intent::from_task_type)
}
