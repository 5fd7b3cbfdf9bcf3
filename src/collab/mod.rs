//! Narrow interfaces to the gateway's external collaborators, plus the small
//! implementations the binary ships with.

pub mod installer;
pub mod renderer;
pub mod search;
pub mod transport;

pub use installer::CommandInstaller;
pub use renderer::{BuiltinRenderer, DocumentRenderer, PandocRenderer};
pub use search::{searcher_from_section, CommandSearcher, DisabledSearcher};
pub use transport::ConsoleTransport;

use crate::error::GatewayError;
use crate::types::{DocFormat, Payload};
use async_trait::async_trait;
use bytes::Bytes;

/// Outbound side of the chat front end.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, user: &str, payload: &Payload) -> anyhow::Result<()>;

    /// Interim status line. Transports without a progress channel ignore it.
    async fn progress(&self, _user: &str, _line: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, content: &str, format: DocFormat) -> Result<Bytes, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait Searcher: Send + Sync {
    /// Ordered hits, best first, at most `limit`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, GatewayError>;
}

#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Make sure the executable `package` is available.
    async fn ensure(&self, package: &str) -> Result<(), GatewayError>;
}
