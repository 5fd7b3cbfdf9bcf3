use crate::collab::ChatTransport;
use crate::types::Payload;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Prints replies to stdout and saves file payloads to a directory.
#[derive(Debug, Clone)]
pub struct ConsoleTransport {
    files_dir: PathBuf,
    show_progress: bool,
}

impl ConsoleTransport {
    pub fn new(files_dir: PathBuf, show_progress: bool) -> Self {
        Self {
            files_dir,
            show_progress,
        }
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send(&self, user: &str, payload: &Payload) -> Result<()> {
        match payload {
            Payload::Text(text) => println!("🤖 [{}] {}", user, text),
            Payload::File {
                bytes,
                file_name,
                caption,
                ..
            } => {
                tokio::fs::create_dir_all(&self.files_dir)
                    .await
                    .with_context(|| format!("Failed to create {}", self.files_dir.display()))?;
                let path = self.files_dir.join(file_name);
                tokio::fs::write(&path, bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("📎 [{}] {} -> {}", user, caption, path.display());
            }
        }
        Ok(())
    }

    async fn progress(&self, user: &str, line: &str) -> Result<()> {
        if self.show_progress {
            println!("⏳ [{}] {}", user, line);
        }
        Ok(())
    }
}
