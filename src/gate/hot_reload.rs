use crate::config::load_config_with_source;
use crate::gate::policy::{PolicySnapshot, PolicyStore};
use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches the config file and swaps the security policy when it changes.
pub struct PolicyReloader {
    store: Arc<PolicyStore>,
    reloads: Arc<AtomicU64>,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for PolicyReloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyReloader")
            .field("store", &self.store)
            .field("reloads", &self.reloads)
            .field("_watcher", &"<watcher>")
            .finish()
    }
}

impl PolicyReloader {
    /// Must be called from inside a tokio runtime.
    pub fn watch(path: &Path, store: Arc<PolicyStore>) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .with_context(|| "Policy hot reload requires a tokio runtime")?;
        let config_path = path.to_path_buf();
        let file_name = path.file_name().map(|name| name.to_os_string());
        let generation = Arc::new(AtomicU64::new(0));
        let reloads = Arc::new(AtomicU64::new(0));

        let store_ref = store.clone();
        let reloads_ref = reloads.clone();
        let mut watcher = notify::recommended_watcher(move |res: NotifyResult<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            // Editors often replace the file, so the directory is watched
            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_config {
                return;
            }

            let current = generation.fetch_add(1, Ordering::SeqCst) + 1;
            let generation = generation.clone();
            let store = store_ref.clone();
            let reloads = reloads_ref.clone();
            let path = config_path.clone();
            handle.spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;
                // A newer event arrived while waiting; let it do the reload
                if generation.load(Ordering::SeqCst) != current {
                    return;
                }
                reloads.fetch_add(1, Ordering::SeqCst);
                if let Err(e) = reload_policy(&store, &path).await {
                    tracing::error!("❌ Failed to reload security policy: {:#}", e);
                    tracing::warn!("   Keeping existing policy active");
                }
            });
        })?;

        let watch_dir = watch_dir(path);
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", watch_dir.display()))?;

        Ok(Self {
            store,
            reloads,
            _watcher: watcher,
        })
    }

    pub fn store(&self) -> Arc<PolicyStore> {
        self.store.clone()
    }

    /// Debounced reload passes run so far, successful or not.
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }
}

/// Re-read the config file and swap the policy. Returns `false` when the
/// file is unchanged. On error the current snapshot stays in place.
pub async fn reload_policy(store: &PolicyStore, path: &Path) -> Result<bool> {
    let (config, source) = load_config_with_source(path)?;
    let snapshot = PolicySnapshot::compile(&config.security, &source)?;

    if store.current().await.fingerprint == snapshot.fingerprint {
        tracing::debug!("Policy file touched but unchanged");
        return Ok(false);
    }

    let fingerprint = snapshot.short_fingerprint().to_string();
    let previous = store.replace(snapshot).await;
    tracing::info!(
        "✅ Security policy reloaded from {} ({} -> {})",
        path.display(),
        previous.short_fingerprint(),
        fingerprint
    );
    Ok(true)
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
