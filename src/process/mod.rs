//! The AI tool boundary.
//!
//! [`ProcessClient`] locates the CLI once, then runs one supervised
//! subprocess per [`ToolInvoker::invoke`] call inside the global
//! [`ProcessPool`].

pub mod locator;
pub mod output;
pub mod pool;
pub mod runner;

pub use locator::locate_tool;
pub use pool::ProcessPool;
pub use runner::{
    run_supervised, InvocationState, ProcessInvocation, RunError, RunOptions, RunReport,
};

use crate::config::{PromptVia, ToolSection};
use crate::error::GatewayError;
use crate::logging::log_preview;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-call overrides for an invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub timeout: Option<Duration>,
    pub working_dir: Option<PathBuf>,
    pub cancel: CancellationToken,
    pub progress: Option<UnboundedSender<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Cleaned answer text.
    pub text: String,
    /// Stdout exactly as the tool wrote it.
    pub raw: String,
    pub elapsed: Duration,
}

/// Anything that can answer a prompt. Implemented by [`ProcessClient`] and
/// by test doubles.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str, options: InvokeOptions) -> Result<ToolOutput, GatewayError>;
}

#[derive(Debug, Clone)]
pub struct ProcessClient {
    program: PathBuf,
    settings: ToolSection,
    pool: ProcessPool,
}

impl ProcessClient {
    pub fn new(program: PathBuf, settings: ToolSection, pool: ProcessPool) -> Self {
        Self {
            program,
            settings,
            pool,
        }
    }

    /// Locate the tool and build a client. Fails with `ToolNotFound`.
    pub fn locate(settings: ToolSection, pool: ProcessPool) -> Result<Self, GatewayError> {
        let program = locate_tool(&settings)?;
        info!("🔧 Using AI tool at {}", program.display());
        Ok(Self::new(program, settings, pool))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.pool
    }

    /// Argument list and stdin payload for one prompt.
    pub fn build_command(&self, prompt: &str) -> (Vec<String>, Option<String>) {
        let mut args: Vec<String> = self
            .settings
            .args
            .iter()
            .map(|arg| arg.replace("{model}", &self.settings.model))
            .collect();

        match self.settings.prompt_via {
            PromptVia::Stdin => (args, Some(prompt.to_string())),
            PromptVia::Arg => {
                args.push(prompt.to_string());
                (args, None)
            }
        }
    }

    /// Run `<tool> --version`.
    pub async fn probe_version(&self) -> Result<String, GatewayError> {
        let mut invocation = ProcessInvocation::new(
            &self.program,
            vec!["--version".to_string()],
            &self.settings.working_dir,
            VERSION_PROBE_TIMEOUT,
        );
        let options = RunOptions {
            grace: self.settings.kill_grace,
            ..Default::default()
        };
        let report = run_supervised(&mut invocation, options).await?;
        let stdout = report.into_result(&invocation.name(), VERSION_PROBE_TIMEOUT)?;
        Ok(output::strip_ansi(&stdout).trim().to_string())
    }
}

#[async_trait]
impl ToolInvoker for ProcessClient {
    async fn invoke(&self, prompt: &str, options: InvokeOptions) -> Result<ToolOutput, GatewayError> {
        let timeout = options.timeout.unwrap_or(self.settings.timeout);
        let working_dir = options
            .working_dir
            .clone()
            .unwrap_or_else(|| self.settings.working_dir.clone());

        let _slot = self.pool.acquire(&options.cancel).await?;

        let (args, stdin) = self.build_command(prompt);
        let mut invocation = ProcessInvocation::new(&self.program, args, working_dir, timeout);
        let name = invocation.name();
        info!("🤖 Invoking {} (timeout {:?})", name, timeout);
        debug!("Prompt: {}", log_preview(prompt));

        let run_options = RunOptions {
            stdin,
            grace: self.settings.kill_grace,
            cancel: options.cancel,
            progress: options.progress,
            env: Vec::new(),
        };
        let report = run_supervised(&mut invocation, run_options).await?;
        let elapsed = report.elapsed;
        let raw = report.into_result(&name, timeout)?;

        let message = output::normalize(&raw);
        if message.is_error {
            warn!("❌ {} reported an error: {}", name, log_preview(&message.text));
            return Err(GatewayError::ProcessFailed {
                what: name,
                exit_code: Some(0),
                stderr: runner::stderr_excerpt(&message.text),
                partial: String::new(),
            });
        }

        debug!("✅ {} answered in {:?}: {}", name, elapsed, log_preview(&message.text));
        Ok(ToolOutput {
            text: message.text,
            raw,
            elapsed,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(script: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    fn client(path: PathBuf, settings: ToolSection) -> ProcessClient {
        ProcessClient::new(path, settings, ProcessPool::new(2, Duration::from_secs(5)))
    }

    fn settings() -> ToolSection {
        ToolSection {
            timeout: Duration::from_secs(5),
            kill_grace: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_command_substitutes_model() {
        let c = client(PathBuf::from("/bin/true"), settings());
        let (args, stdin) = c.build_command("hi");
        assert_eq!(args, vec!["-p", "--output-format", "json", "--model", "sonnet"]);
        assert_eq!(stdin.as_deref(), Some("hi"));

        let c = client(
            PathBuf::from("/bin/true"),
            ToolSection {
                prompt_via: PromptVia::Arg,
                model: "opus".to_string(),
                ..settings()
            },
        );
        let (args, stdin) = c.build_command("hi");
        assert_eq!(args.last().map(String::as_str), Some("hi"));
        assert!(args.contains(&"opus".to_string()));
        assert!(stdin.is_none());
    }

    #[tokio::test]
    async fn test_invoke_unwraps_json_envelope() {
        let (_dir, path) = fake_tool(r#"cat >/dev/null; echo '{"type":"result","result":"Hello from the tool"}'"#);
        let output = client(path, settings())
            .invoke("hi", InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "Hello from the tool");
        assert!(output.raw.contains("\"result\""));
    }

    #[tokio::test]
    async fn test_prompt_reaches_tool_over_stdin() {
        let (_dir, path) = fake_tool("printf 'echo: '; cat");
        let output = client(path, settings())
            .invoke("ping", InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(output.text, "echo: ping");
    }

    #[tokio::test]
    async fn test_error_envelope_is_failure() {
        let (_dir, path) = fake_tool(r#"echo '{"is_error": true, "result": "bad model"}'"#);
        let err = client(path, settings())
            .invoke("hi", InvokeOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert!(err.to_string().contains("bad model"));
    }

    #[tokio::test]
    async fn test_timeout_override() {
        let (_dir, path) = fake_tool("echo partial; exec sleep 30");
        let options = InvokeOptions {
            timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let err = client(path, settings()).invoke("hi", options).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessTimeout);
        assert_eq!(err.partial_output(), Some("partial"));
    }

    #[tokio::test]
    async fn test_probe_version() {
        let (_dir, path) = fake_tool("echo '1.2.3 (Fake Tool)'");
        let version = client(path, settings()).probe_version().await.unwrap();
        assert_eq!(version, "1.2.3 (Fake Tool)");
    }
}
