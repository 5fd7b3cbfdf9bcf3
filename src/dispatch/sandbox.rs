//! Execution of generated code.
//!
//! Shell commands run as a plain argv with no shell in between. Scripts are
//! written to a file in the sandbox directory and run by the interpreter
//! configured for their language; the interpreter argv is authorized like any
//! other command. Languages with a configured compiler are built first and
//! the resulting binary is run instead.

use crate::collab::DependencyInstaller;
use crate::config::CodeExecutionSection;
use crate::error::GatewayError;
use crate::gate::command_guard::single_command_argv;
use crate::gate::{CommandDecision, CommandGuard};
use crate::process::{run_supervised, ProcessInvocation, ProcessPool, RunOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub language: String,
    pub stdout: String,
    pub elapsed: Duration,
}

pub struct CodeSandbox {
    dir: PathBuf,
    timeout: Duration,
    runtimes: BTreeMap<String, Vec<String>>,
    compilers: BTreeMap<String, Vec<String>>,
    pool: ProcessPool,
    installer: Arc<dyn DependencyInstaller>,
}

impl CodeSandbox {
    pub fn new(
        dir: PathBuf,
        timeout: Duration,
        runtimes: BTreeMap<String, Vec<String>>,
        pool: ProcessPool,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            dir,
            timeout,
            runtimes,
            compilers: BTreeMap::new(),
            pool,
            installer,
        }
    }

    /// Compiler argv templates per language. `{source}` and `{binary}` are
    /// replaced by the snippet and output paths.
    pub fn with_compilers(mut self, compilers: BTreeMap<String, Vec<String>>) -> Self {
        self.compilers = compilers;
        self
    }

    /// `None` when code execution is disabled.
    pub fn from_section(
        section: &CodeExecutionSection,
        pool: ProcessPool,
        installer: Arc<dyn DependencyInstaller>,
    ) -> Option<Self> {
        if !section.enabled {
            return None;
        }
        let dir = section
            .sandbox_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("agent-gateway-sandbox"));
        Some(
            Self::new(dir, section.timeout, section.runtimes.clone(), pool, installer)
                .with_compilers(section.compilers.clone()),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn runtimes(&self) -> &BTreeMap<String, Vec<String>> {
        &self.runtimes
    }

    /// Interpreter argv for a fence tag or language name.
    pub fn runtime_for(&self, language: &str) -> Option<&[String]> {
        self.runtimes
            .get(canonical_language(language))
            .filter(|argv| !argv.is_empty())
            .map(Vec::as_slice)
    }

    pub fn compiler_for(&self, language: &str) -> Option<&[String]> {
        self.compilers
            .get(canonical_language(language))
            .filter(|argv| !argv.is_empty())
            .map(Vec::as_slice)
    }

    /// Whether a script in `language` can be built or interpreted here.
    pub fn supports(&self, language: &str) -> bool {
        self.compiler_for(language).is_some() || self.runtime_for(language).is_some()
    }

    /// Run one command line. Lines that need a shell (pipes, lists,
    /// redirections) are refused.
    pub async fn run_command(
        &self,
        line: &str,
        guard: &CommandGuard,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, GatewayError> {
        let Some(argv) = single_command_argv(line) else {
            return Err(GatewayError::CommandRejected {
                command: line.to_string(),
                reason: "only single commands without pipes, lists or redirections can be run"
                    .to_string(),
            });
        };
        authorize_argv(guard, &argv)?;

        let (stdout, elapsed) = self.execute(&argv, cancel).await?;
        Ok(ExecutionReport {
            language: "shell".to_string(),
            stdout,
            elapsed,
        })
    }

    /// Run each line in order, stopping at the first failure. Output of all
    /// lines run so far is kept as partial output.
    pub async fn run_commands(
        &self,
        lines: &[String],
        guard: &CommandGuard,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, GatewayError> {
        let mut combined = String::new();
        let mut elapsed = Duration::ZERO;
        for line in lines {
            match self.run_command(line, guard, cancel).await {
                Ok(report) => {
                    combined.push_str(&format!("$ {}\n{}", line, report.stdout));
                    elapsed += report.elapsed;
                }
                Err(e) => return Err(with_partial(e, &combined)),
            }
        }
        Ok(ExecutionReport {
            language: "shell".to_string(),
            stdout: combined,
            elapsed,
        })
    }

    /// Write `code` to a script file and run it with its interpreter.
    pub async fn run_script(
        &self,
        language: &str,
        code: &str,
        guard: &CommandGuard,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, GatewayError> {
        let language = canonical_language(language);
        if let Some(compiler) = self.compiler_for(language) {
            let compiler = compiler.to_vec();
            return self.compile_and_run(language, &compiler, code, guard, cancel).await;
        }
        let Some(runtime) = self.runtime_for(language) else {
            return Err(GatewayError::CommandRejected {
                command: language.to_string(),
                reason: format!("no runtime is configured for {}", language),
            });
        };
        let runtime = runtime.to_vec();

        tokio::fs::create_dir_all(&self.dir).await?;
        let script = self.snippet_path(language);
        let mut argv = runtime.clone();
        argv.push(script.to_string_lossy().into_owned());
        authorize_argv(guard, &argv)?;

        self.installer.ensure(&runtime[0]).await?;
        tokio::fs::write(&script, code).await?;
        debug!("📝 Wrote {} script to {}", language, script.display());

        let result = self.execute(&argv, cancel).await;
        if let Err(e) = tokio::fs::remove_file(&script).await {
            warn!("Failed to remove {}: {}", script.display(), e);
        }
        let (stdout, elapsed) = result?;
        Ok(ExecutionReport {
            language: language.to_string(),
            stdout,
            elapsed,
        })
    }

    /// Build `code` with the compiler template, then run the binary. The
    /// compiler argv is authorized; both files are removed afterwards.
    async fn compile_and_run(
        &self,
        language: &str,
        compiler: &[String],
        code: &str,
        guard: &CommandGuard,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, GatewayError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let source = self.snippet_path(language);
        let binary = source.with_extension(std::env::consts::EXE_EXTENSION);
        let build = compile_argv(compiler, &source, &binary);
        authorize_argv(guard, &build)?;

        self.installer.ensure(&build[0]).await?;
        tokio::fs::write(&source, code).await?;
        debug!("📝 Wrote {} source to {}", language, source.display());

        let result = match self.execute(&build, cancel).await {
            Ok(_) => {
                info!("🔨 Built {} snippet", language);
                let run = vec![binary.to_string_lossy().into_owned()];
                self.execute(&run, cancel).await
            }
            Err(e) => Err(e),
        };
        for path in [&source, &binary] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        let (stdout, elapsed) = result?;
        Ok(ExecutionReport {
            language: language.to_string(),
            stdout,
            elapsed,
        })
    }

    fn snippet_path(&self, language: &str) -> PathBuf {
        self.dir.join(format!(
            "snippet_{}.{}",
            uuid::Uuid::new_v4().simple(),
            extension(language)
        ))
    }

    async fn execute(
        &self,
        argv: &[String],
        cancel: &CancellationToken,
    ) -> Result<(String, Duration), GatewayError> {
        let Some((program, args)) = argv.split_first() else {
            return Err(GatewayError::CommandRejected {
                command: String::new(),
                reason: "empty command".to_string(),
            });
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let _slot = self.pool.acquire(cancel).await?;

        let mut invocation = ProcessInvocation::new(program, args.to_vec(), &self.dir, self.timeout);
        let name = invocation.name();
        info!("▶️  Executing {} in {}", argv.join(" "), self.dir.display());
        let options = RunOptions {
            grace: KILL_GRACE,
            cancel: cancel.clone(),
            ..Default::default()
        };
        let report = run_supervised(&mut invocation, options).await?;
        let elapsed = report.elapsed;
        let stdout = report.into_result(&name, self.timeout)?;
        Ok((stdout, elapsed))
    }
}

/// Fill `{source}` and `{binary}` in a compiler template. Templates without
/// `{source}` get the source path appended.
fn compile_argv(template: &[String], source: &Path, binary: &Path) -> Vec<String> {
    let source = source.to_string_lossy();
    let binary = binary.to_string_lossy();
    let mut argv: Vec<String> = template
        .iter()
        .map(|arg| arg.replace("{source}", &source).replace("{binary}", &binary))
        .collect();
    if !template.iter().any(|arg| arg.contains("{source}")) {
        argv.push(source.into_owned());
    }
    argv
}

fn authorize_argv(guard: &CommandGuard, argv: &[String]) -> Result<(), GatewayError> {
    match guard.authorize_argv(argv) {
        CommandDecision::Permit => Ok(()),
        CommandDecision::Reject { reason } => Err(GatewayError::CommandRejected {
            command: argv.join(" "),
            reason,
        }),
    }
}

fn with_partial(error: GatewayError, earlier: &str) -> GatewayError {
    if earlier.is_empty() {
        return error;
    }
    match error {
        GatewayError::ProcessTimeout {
            what,
            timeout,
            partial,
        } => GatewayError::ProcessTimeout {
            what,
            timeout,
            partial: format!("{}{}", earlier, partial),
        },
        GatewayError::ProcessFailed {
            what,
            exit_code,
            stderr,
            partial,
        } => GatewayError::ProcessFailed {
            what,
            exit_code,
            stderr,
            partial: format!("{}{}", earlier, partial),
        },
        GatewayError::Cancelled { partial } => GatewayError::Cancelled {
            partial: format!("{}{}", earlier, partial),
        },
        other => other,
    }
}

/// Map fence tags and aliases onto runtime keys.
pub fn canonical_language(tag: &str) -> &str {
    match tag {
        "py" | "python3" => "python",
        "js" | "node" | "nodejs" => "javascript",
        "ts" => "typescript",
        "golang" => "go",
        "c++" | "cc" | "cxx" => "cpp",
        "rs" => "rust",
        "rb" => "ruby",
        "sh" | "bash" | "zsh" | "console" | "terminal" => "shell",
        other => other,
    }
}

fn extension(language: &str) -> &'static str {
    match language {
        "python" => "py",
        "javascript" => "js",
        "typescript" => "ts",
        "go" => "go",
        "ruby" => "rb",
        "shell" => "sh",
        "cpp" => "cpp",
        "c" => "c",
        "rust" => "rs",
        "java" => "java",
        _ => "txt",
    }
}
