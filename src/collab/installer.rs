use crate::collab::DependencyInstaller;
use crate::error::GatewayError;
use crate::process::{run_supervised, ProcessInvocation, RunOptions};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Checks `PATH` for an executable and, if configured, runs an install
/// command for missing ones.
#[derive(Debug, Clone, Default)]
pub struct CommandInstaller {
    /// e.g. `["apt-get", "install", "-y"]`; the package name is appended.
    install_command: Vec<String>,
    timeout: Duration,
}

impl CommandInstaller {
    pub fn new(install_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            install_command,
            timeout,
        }
    }
}

#[async_trait]
impl DependencyInstaller for CommandInstaller {
    async fn ensure(&self, package: &str) -> Result<(), GatewayError> {
        if which::which(package).is_ok() {
            return Ok(());
        }

        let Some((program, base_args)) = self.install_command.split_first() else {
            return Err(GatewayError::ToolNotFound {
                searched: vec![format!("{} (PATH)", package)],
            });
        };

        info!("📦 Installing missing dependency {}", package);
        let mut args = base_args.to_vec();
        args.push(package.to_string());
        let mut invocation = ProcessInvocation::new(program, args, std::env::temp_dir(), self.timeout);
        let options = RunOptions {
            grace: Duration::from_secs(2),
            ..Default::default()
        };
        let report = run_supervised(&mut invocation, options).await?;
        report.into_result(&invocation.name(), self.timeout)?;

        if which::which(package).is_ok() {
            Ok(())
        } else {
            Err(GatewayError::ToolNotFound {
                searched: vec![format!("{} (PATH, after install)", package)],
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_present_executable_needs_no_install() {
        let installer = CommandInstaller::default();
        assert!(installer.ensure("sh").await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_without_install_command() {
        let installer = CommandInstaller::default();
        let err = installer.ensure("no-such-runtime-4711").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn test_failed_install_is_reported() {
        let installer = CommandInstaller::new(vec!["false".to_string()], Duration::from_secs(5));
        let err = installer.ensure("no-such-runtime-4711").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
    }
}
