//! Request/response data model shared by every stage of the gateway.

use crate::error::GatewayError;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

/// One inbound chat message. Immutable once created.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub user: String,
    pub text: String,
    pub received_at: SystemTime,
}

impl Request {
    pub fn new(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            text: text.into(),
            received_at: SystemTime::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    Ok,
    Denied,
    RateLimited,
    Timeout,
    Error,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResponseStatus::Ok => "ok",
            ResponseStatus::Denied => "denied",
            ResponseStatus::RateLimited => "rate-limited",
            ResponseStatus::Timeout => "timeout",
            ResponseStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Output formats understood by the renderer collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocFormat {
    Markdown,
    Html,
    Docx,
    Pdf,
}

impl DocFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DocFormat::Markdown => "md",
            DocFormat::Html => "html",
            DocFormat::Docx => "docx",
            DocFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DocFormat::Markdown => "markdown",
            DocFormat::Html => "html",
            DocFormat::Docx => "docx",
            DocFormat::Pdf => "pdf",
        };
        f.write_str(label)
    }
}

impl FromStr for DocFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(DocFormat::Markdown),
            "html" | "htm" => Ok(DocFormat::Html),
            "docx" | "word" => Ok(DocFormat::Docx),
            "pdf" => Ok(DocFormat::Pdf),
            other => Err(format!("unknown document format: {other}")),
        }
    }
}

/// What gets delivered back to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    File {
        bytes: Bytes,
        format: DocFormat,
        file_name: String,
        caption: String,
    },
}

impl Payload {
    /// Text content, or the caption for file payloads.
    pub fn text(&self) -> &str {
        match self {
            Payload::Text(text) => text,
            Payload::File { caption, .. } => caption,
        }
    }
}

/// Terminal answer to a [`Request`]. Exactly one is produced per request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub request_id: Uuid,
    pub status: ResponseStatus,
    pub payload: Payload,
}

impl Response {
    pub fn ok(request_id: Uuid, payload: Payload) -> Self {
        Self {
            request_id,
            status: ResponseStatus::Ok,
            payload,
        }
    }

    pub fn ok_text(request_id: Uuid, text: impl Into<String>) -> Self {
        Self::ok(request_id, Payload::Text(text.into()))
    }

    pub fn from_error(request_id: Uuid, error: &GatewayError) -> Self {
        Self {
            request_id,
            status: error.status(),
            payload: Payload::Text(error.user_message()),
        }
    }

    /// Like [`Response::from_error`] but keeps results computed before the
    /// failure in front of the error text.
    pub fn from_error_with_context(request_id: Uuid, error: &GatewayError, context: &str) -> Self {
        let mut response = Self::from_error(request_id, error);
        if !context.trim().is_empty() {
            response.payload = Payload::Text(format!("{}\n\n{}", context.trim(), error.user_message()));
        }
        response
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

/// Capability kinds a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    DocGen,
    WebResearch,
    CodeDev,
    Generic,
}

impl Intent {
    /// Accepts both the short names and the long task-type names the AI tool
    /// uses when asked to analyse a request.
    pub fn from_task_type(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "doc-gen" | "document-generation" => Some(Intent::DocGen),
            "web-research" | "web-browsing" => Some(Intent::WebResearch),
            "code-dev" | "program-development" => Some(Intent::CodeDev),
            "generic" | "general" => Some(Intent::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Intent::DocGen => "doc-gen",
            Intent::WebResearch => "web-research",
            Intent::CodeDev => "code-dev",
            Intent::Generic => "generic",
        };
        f.write_str(label)
    }
}

/// Parameters extracted alongside the intent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntentParams {
    pub format: Option<DocFormat>,
    pub query: Option<String>,
    pub language: Option<String>,
    /// Set when the user typed a command to run directly.
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub params: IntentParams,
}

impl Classification {
    pub fn generic() -> Self {
        Self {
            intent: Intent::Generic,
            params: IntentParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One remembered message of a user's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_format_parse() {
        assert_eq!("PDF".parse::<DocFormat>(), Ok(DocFormat::Pdf));
        assert_eq!("word".parse::<DocFormat>(), Ok(DocFormat::Docx));
        assert_eq!("md".parse::<DocFormat>(), Ok(DocFormat::Markdown));
        assert!("rtf".parse::<DocFormat>().is_err());
    }

    #[test]
    fn test_intent_from_task_type() {
        assert_eq!(
            Intent::from_task_type("document_generation"),
            Some(Intent::DocGen)
        );
        assert_eq!(Intent::from_task_type("web_browsing"), Some(Intent::WebResearch));
        assert_eq!(
            Intent::from_task_type("program_development"),
            Some(Intent::CodeDev)
        );
        assert_eq!(Intent::from_task_type("general"), Some(Intent::Generic));
        assert_eq!(Intent::from_task_type("dance"), None);
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ResponseStatus::RateLimited.to_string(), "rate-limited");
        assert_eq!(ResponseStatus::Ok.to_string(), "ok");
    }

    #[test]
    fn test_requests_get_unique_ids() {
        let a = Request::new("u1", "hi");
        let b = Request::new("u1", "hi");
        assert_ne!(a.id, b.id);
    }
}
