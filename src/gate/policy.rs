use crate::config::SecuritySection;
use crate::gate::access::AccessPolicy;
use crate::gate::command_guard::CommandGuard;
use crate::gate::content_filter::ContentFilter;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Immutable rule set read once per request.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub access: AccessPolicy,
    pub content_filter: ContentFilter,
    pub command_guard: CommandGuard,
    /// md5 of the configuration text the snapshot was compiled from.
    pub fingerprint: String,
}

impl PolicySnapshot {
    pub fn compile(security: &SecuritySection, source: &str) -> Result<Self> {
        let content_filter = ContentFilter::compile(&security.content_filter)
            .with_context(|| "Failed to compile content filter")?;
        let command_guard =
            CommandGuard::compile(&security.command_whitelist, &security.command_blacklist)
                .with_context(|| "Failed to compile command guard")?;

        Ok(Self {
            access: AccessPolicy::from_section(security),
            content_filter,
            command_guard,
            fingerprint: format!("{:x}", md5::compute(source)),
        })
    }

    pub fn short_fingerprint(&self) -> &str {
        self.fingerprint.get(..8).unwrap_or(&self.fingerprint)
    }
}

/// Holds the active snapshot; replaced wholesale on reload.
#[derive(Debug)]
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub async fn current(&self) -> Arc<PolicySnapshot> {
        self.current.read().await.clone()
    }

    /// Swap in a new snapshot, returning the previous one.
    pub async fn replace(&self, snapshot: PolicySnapshot) -> Arc<PolicySnapshot> {
        let mut guard = self.current.write().await;
        std::mem::replace(&mut *guard, Arc::new(snapshot))
    }
}
