//! Error kinds surfaced by the gateway.
//!
//! Every variant maps onto exactly one [`ResponseStatus`], so a failure at any
//! stage can still be turned into the single response a request is owed.

use crate::types::{DocFormat, ResponseStatus};
use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of partial output echoed back to a user.
const PARTIAL_PREVIEW_CHARS: usize = 1500;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("user {user} is not allowed to use this assistant")]
    Unauthorized { user: String },

    #[error("rate limit exceeded: {reason}")]
    RateLimited { reason: String },

    #[error("message rejected by content rule '{rule_id}': {reason}")]
    ContentRejected { rule_id: String, reason: String },

    #[error("command '{command}' rejected: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("AI tool executable not found (searched: {})", searched.join(", "))]
    ToolNotFound { searched: Vec<String> },

    #[error("{what} timed out after {}s", timeout.as_secs())]
    ProcessTimeout {
        what: String,
        timeout: Duration,
        partial: String,
    },

    #[error("{what} failed with exit code {}: {stderr}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()))]
    ProcessFailed {
        what: String,
        exit_code: Option<i32>,
        stderr: String,
        partial: String,
    },

    #[error("rendering {format} failed: {reason}")]
    RenderFailed { format: DocFormat, reason: String },

    #[error("all {pool_size} execution slots stayed busy for {}s", waited.as_secs())]
    Backpressure { pool_size: usize, waited: Duration },

    #[error("request was cancelled")]
    Cancelled { partial: String },

    #[error("web search failed: {0}")]
    SearchFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Discriminant of [`GatewayError`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthorized,
    RateLimited,
    ContentRejected,
    CommandRejected,
    ToolNotFound,
    ProcessTimeout,
    ProcessFailed,
    RenderFailed,
    Backpressure,
    Cancelled,
    SearchFailed,
    Io,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthorized { .. } => ErrorKind::Unauthorized,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimited,
            GatewayError::ContentRejected { .. } => ErrorKind::ContentRejected,
            GatewayError::CommandRejected { .. } => ErrorKind::CommandRejected,
            GatewayError::ToolNotFound { .. } => ErrorKind::ToolNotFound,
            GatewayError::ProcessTimeout { .. } => ErrorKind::ProcessTimeout,
            GatewayError::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            GatewayError::RenderFailed { .. } => ErrorKind::RenderFailed,
            GatewayError::Backpressure { .. } => ErrorKind::Backpressure,
            GatewayError::Cancelled { .. } => ErrorKind::Cancelled,
            GatewayError::SearchFailed(_) => ErrorKind::SearchFailed,
            GatewayError::Io(_) => ErrorKind::Io,
        }
    }

    /// Response status reported to the user for this error.
    pub fn status(&self) -> ResponseStatus {
        match self.kind() {
            ErrorKind::Unauthorized | ErrorKind::ContentRejected | ErrorKind::CommandRejected => {
                ResponseStatus::Denied
            }
            ErrorKind::RateLimited => ResponseStatus::RateLimited,
            ErrorKind::ProcessTimeout => ResponseStatus::Timeout,
            _ => ResponseStatus::Error,
        }
    }

    /// Gate failures end the request before any subprocess is spawned.
    pub fn is_gate_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Unauthorized
                | ErrorKind::RateLimited
                | ErrorKind::ContentRejected
                | ErrorKind::CommandRejected
        )
    }

    /// Output captured before the failure, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            GatewayError::ProcessTimeout { partial, .. }
            | GatewayError::ProcessFailed { partial, .. }
            | GatewayError::Cancelled { partial } => {
                let trimmed = partial.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }

    /// Human-readable text sent back over the chat transport.
    pub fn user_message(&self) -> String {
        let headline = match self {
            GatewayError::Unauthorized { .. } => {
                "Sorry, you are not allowed to use this assistant.".to_string()
            }
            GatewayError::RateLimited { reason } => {
                format!("You are sending requests too quickly ({reason}). Please wait a moment.")
            }
            GatewayError::ContentRejected { reason, .. } => {
                format!("Your message was blocked by the content policy: {reason}")
            }
            GatewayError::CommandRejected { command, reason } => {
                format!("The command `{command}` is not allowed: {reason}")
            }
            GatewayError::Backpressure { .. } => {
                "The assistant is busy with other requests right now. Please try again shortly."
                    .to_string()
            }
            GatewayError::Cancelled { .. } => {
                "The previous request was cancelled.".to_string()
            }
            other => format!("Sorry, something went wrong: {other}"),
        };

        match self.partial_output() {
            Some(partial) => format!(
                "{headline}\n\nPartial output:\n{}",
                crate::logging::preview(partial, PARTIAL_PREVIEW_CHARS)
            ),
            None => headline,
        }
    }
}
