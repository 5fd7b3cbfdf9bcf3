use crate::collab::Renderer;
use crate::config::DocumentsSection;
use crate::error::GatewayError;
use crate::process::{run_supervised, ProcessInvocation, RunOptions};
use crate::types::DocFormat;
use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Markdown and HTML output without external programs.
#[derive(Debug, Clone, Default)]
pub struct BuiltinRenderer {
    title: String,
}

impl BuiltinRenderer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

#[async_trait]
impl Renderer for BuiltinRenderer {
    async fn render(&self, content: &str, format: DocFormat) -> Result<Bytes, GatewayError> {
        match format {
            DocFormat::Markdown => Ok(Bytes::from(content.to_string())),
            DocFormat::Html => Ok(Bytes::from(html_document(&self.title, content))),
            DocFormat::Docx | DocFormat::Pdf => Err(GatewayError::RenderFailed {
                format,
                reason: "the built-in renderer only produces markdown and html".to_string(),
            }),
        }
    }
}

/// Binary formats through `pandoc`.
#[derive(Debug, Clone)]
pub struct PandocRenderer {
    program: PathBuf,
    timeout: Duration,
}

impl PandocRenderer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Resolve `name` on PATH; `None` when pandoc is not installed.
    pub fn discover(name: &str, timeout: Duration) -> Option<Self> {
        which::which(name).ok().map(|program| Self::new(program, timeout))
    }
}

#[async_trait]
impl Renderer for PandocRenderer {
    async fn render(&self, content: &str, format: DocFormat) -> Result<Bytes, GatewayError> {
        let out_path =
            std::env::temp_dir().join(format!("agent-gateway-{}.{}", Uuid::new_v4(), format.extension()));
        let args = vec![
            "-f".to_string(),
            "markdown".to_string(),
            "-o".to_string(),
            out_path.display().to_string(),
        ];
        let mut invocation = ProcessInvocation::new(&self.program, args, std::env::temp_dir(), self.timeout);
        let options = RunOptions {
            stdin: Some(content.to_string()),
            grace: Duration::from_secs(1),
            ..Default::default()
        };

        let failed = |reason: String| GatewayError::RenderFailed { format, reason };
        let report = run_supervised(&mut invocation, options)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let result = report
            .into_result("pandoc", self.timeout)
            .map_err(|e| failed(e.to_string()));

        let bytes = match result {
            Ok(_) => tokio::fs::read(&out_path).await.map_err(|e| failed(e.to_string())),
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_file(&out_path).await {
            debug!("Could not remove {}: {}", out_path.display(), e);
        }
        bytes.map(Bytes::from)
    }
}

/// Routes each format to the renderer that can produce it.
#[derive(Debug, Clone)]
pub struct DocumentRenderer {
    builtin: BuiltinRenderer,
    pandoc: Option<PandocRenderer>,
}

impl DocumentRenderer {
    pub fn new(builtin: BuiltinRenderer, pandoc: Option<PandocRenderer>) -> Self {
        Self { builtin, pandoc }
    }

    pub fn from_section(section: &DocumentsSection) -> Self {
        let pandoc = PandocRenderer::discover(&section.pandoc, section.render_timeout);
        if pandoc.is_none() {
            warn!(
                "⚠️  {} not found; docx and pdf documents will be sent as text",
                section.pandoc
            );
        }
        Self::new(BuiltinRenderer::new(section.title.clone()), pandoc)
    }

    pub fn supports(&self, format: DocFormat) -> bool {
        matches!(format, DocFormat::Markdown | DocFormat::Html) || self.pandoc.is_some()
    }
}

#[async_trait]
impl Renderer for DocumentRenderer {
    async fn render(&self, content: &str, format: DocFormat) -> Result<Bytes, GatewayError> {
        match (format, &self.pandoc) {
            (DocFormat::Markdown | DocFormat::Html, _) => self.builtin.render(content, format).await,
            (_, Some(pandoc)) => pandoc.render(content, format).await,
            (_, None) => Err(GatewayError::RenderFailed {
                format,
                reason: "pandoc is not installed".to_string(),
            }),
        }
    }
}

fn html_document(title: &str, markdown: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        markdown_to_html(markdown)
    )
}

/// Small Markdown subset: headings, paragraphs, lists, fenced code, and
/// inline code, bold, italic and links.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut html = String::new();
    let mut paragraph: Vec<String> = Vec::new();
    let mut list: Option<&'static str> = None;
    let mut in_code = false;

    let flush_paragraph = |html: &mut String, paragraph: &mut Vec<String>| {
        if !paragraph.is_empty() {
            html.push_str(&format!("<p>{}</p>\n", paragraph.join(" ")));
            paragraph.clear();
        }
    };
    let close_list = |html: &mut String, list: &mut Option<&'static str>| {
        if let Some(tag) = list.take() {
            html.push_str(&format!("</{}>\n", tag));
        }
    };

    for line in markdown.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            if in_code {
                html.push_str("</code></pre>\n");
            } else {
                flush_paragraph(&mut html, &mut paragraph);
                close_list(&mut html, &mut list);
                html.push_str("<pre><code>");
            }
            in_code = !in_code;
            continue;
        }
        if in_code {
            html.push_str(&escape_html(line));
            html.push('\n');
            continue;
        }

        if trimmed.is_empty() {
            flush_paragraph(&mut html, &mut paragraph);
            close_list(&mut html, &mut list);
            continue;
        }

        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) && trimmed[level..].starts_with(' ') {
            flush_paragraph(&mut html, &mut paragraph);
            close_list(&mut html, &mut list);
            html.push_str(&format!(
                "<h{level}>{}</h{level}>\n",
                inline(trimmed[level..].trim())
            ));
            continue;
        }

        if let Some((tag, item)) = list_item(trimmed) {
            flush_paragraph(&mut html, &mut paragraph);
            if list != Some(tag) {
                close_list(&mut html, &mut list);
                html.push_str(&format!("<{}>\n", tag));
                list = Some(tag);
            }
            html.push_str(&format!("<li>{}</li>\n", inline(item)));
            continue;
        }

        close_list(&mut html, &mut list);
        paragraph.push(inline(trimmed));
    }

    if in_code {
        html.push_str("</code></pre>\n");
    }
    flush_paragraph(&mut html, &mut paragraph);
    close_list(&mut html, &mut list);
    html
}

fn list_item(line: &str) -> Option<(&'static str, &str)> {
    if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(("ul", item));
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(item) = line[digits..].strip_prefix(". ") {
            return Some(("ol", item));
        }
    }
    None
}

fn inline(text: &str) -> String {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"`([^`]+)`", "<code>$1</code>"),
            (r"\*\*([^*]+)\*\*", "<strong>$1</strong>"),
            (r"\*([^*]+)\*", "<em>$1</em>"),
            (r"\[([^\]]+)\]\(([^)\s]+)\)", "<a href=\"$2\">$1</a>"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    });

    let mut html = escape_html(text);
    for (regex, replacement) in rules {
        html = regex.replace_all(&html, *replacement).into_owned();
    }
    html
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
