//! Supervised subprocess execution.
//!
//! Every external command the gateway runs goes through [`run_supervised`]:
//! one OS process per call, stdout streamed line by line, and a
//! `tokio::select!` over process exit, the wall-clock timer and the caller's
//! cancellation token. On timeout or cancellation the whole process group gets
//! `SIGTERM`, then `SIGKILL` once the grace period runs out, and the child is
//! always reaped before this returns. Whatever the leader leaves behind in its
//! group after a normal exit is killed too.

use crate::error::GatewayError;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long reader tasks may keep draining pipes after the child is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const STDERR_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationState::Completed
                | InvocationState::TimedOut
                | InvocationState::Failed
                | InvocationState::Cancelled
        )
    }

    fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, TimedOut)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// One execution of an external program. Owned by the runner while it runs.
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    pub started_at: Option<Instant>,
    state: InvocationState,
}

impl ProcessInvocation {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            timeout,
            started_at: None,
            state: InvocationState::Pending,
        }
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.started_at.map(|started| started + self.timeout)
    }

    /// Program file name, used in logs and error messages.
    pub fn name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Apply a state change. Invalid changes, including any change out of a
    /// terminal state, are ignored and return `false`.
    pub fn transition(&mut self, next: InvocationState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                "⚠️  Ignoring invalid state change {:?} -> {:?} for {}",
                self.state,
                next,
                self.name()
            );
            return false;
        }
        debug!("{}: {:?} -> {:?}", self.name(), self.state, next);
        self.state = next;
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
    /// Time between SIGTERM and SIGKILL.
    pub grace: Duration,
    pub cancel: CancellationToken,
    /// Receives each stdout line as it arrives.
    pub progress: Option<UnboundedSender<String>>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: InvocationState,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub elapsed: Duration,
    pub pid: Option<u32>,
}

impl RunReport {
    /// Map the terminal state onto the gateway's error kinds. `what` names the
    /// program in messages.
    pub fn into_result(self, what: &str, timeout: Duration) -> Result<String, GatewayError> {
        match self.state {
            InvocationState::Completed => Ok(self.stdout),
            InvocationState::TimedOut => Err(GatewayError::ProcessTimeout {
                what: what.to_string(),
                timeout,
                partial: self.stdout,
            }),
            InvocationState::Cancelled => Err(GatewayError::Cancelled {
                partial: self.stdout,
            }),
            InvocationState::Failed | InvocationState::Pending | InvocationState::Running => {
                Err(GatewayError::ProcessFailed {
                    what: what.to_string(),
                    exit_code: self.exit_code,
                    stderr: stderr_excerpt(&self.stderr),
                    partial: self.stdout,
                })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("lost track of {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<RunError> for GatewayError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Spawn { source, .. } | RunError::Wait { source, .. } => GatewayError::Io(source),
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `invocation` to a terminal state.
pub async fn run_supervised(
    invocation: &mut ProcessInvocation,
    options: RunOptions,
) -> Result<RunReport, RunError> {
    let name = invocation.name();
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .current_dir(&invocation.working_dir)
        .envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            invocation.transition(InvocationState::Failed);
            return Err(RunError::Spawn {
                program: name,
                source,
            });
        }
    };

    let started = Instant::now();
    invocation.started_at = Some(started);
    invocation.transition(InvocationState::Running);
    let pid = child.id();
    debug!("🚀 Spawned {} (pid {:?})", name, pid);

    if let (Some(mut stdin), Some(input)) = (child.stdin.take(), options.stdin) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("stdin closed early: {}", e);
            }
            // Dropping stdin closes the pipe
        });
    }

    let stdout_buf = Arc::new(Mutex::new(String::new()));
    let stdout_task = child.stdout.take().map(|stdout| {
        let buf = stdout_buf.clone();
        let progress = options.progress.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&line);
                        if let Ok(mut out) = buf.lock() {
                            out.push_str(&text);
                        }
                        if let Some(progress) = &progress {
                            let _ = progress.send(text.trim_end_matches(['\r', '\n']).to_string());
                        }
                    }
                }
            }
        })
    });

    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut bytes = Vec::new();
            let _ = stderr.read_to_end(&mut bytes).await;
            String::from_utf8_lossy(&bytes).into_owned()
        })
    });

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
        _ = options.cancel.cancelled() => Outcome::Cancelled,
    };

    let mut exit_code = None;
    match outcome {
        Outcome::Exited(Ok(status)) => {
            exit_code = status.code();
            // Background children may still hold the output pipes
            kill_group(pid);
            if status.success() {
                invocation.transition(InvocationState::Completed);
            } else {
                invocation.transition(InvocationState::Failed);
            }
        }
        Outcome::Exited(Err(source)) => {
            terminate(&mut child, options.grace).await;
            invocation.transition(InvocationState::Failed);
            return Err(RunError::Wait {
                program: name,
                source,
            });
        }
        Outcome::TimedOut => {
            info!("⏰ {} exceeded {:?}, terminating", name, invocation.timeout);
            if let Some(status) = terminate(&mut child, options.grace).await {
                exit_code = status.code();
            }
            invocation.transition(InvocationState::TimedOut);
        }
        Outcome::Cancelled => {
            info!("🛑 {} cancelled, terminating", name);
            if let Some(status) = terminate(&mut child, options.grace).await {
                exit_code = status.code();
            }
            invocation.transition(InvocationState::Cancelled);
        }
    }

    if let Some(mut task) = stdout_task {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await.is_err() {
            debug!("stdout of {} still open after exit", name);
            task.abort();
        }
    }
    let stderr = match stderr_task {
        Some(mut task) => match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
            Ok(Ok(text)) => text,
            Ok(Err(_)) => String::new(),
            Err(_) => {
                task.abort();
                String::new()
            }
        },
        None => String::new(),
    };
    let stdout = stdout_buf
        .lock()
        .map(|out| out.clone())
        .unwrap_or_default();

    Ok(RunReport {
        state: invocation.state(),
        stdout,
        stderr,
        exit_code,
        elapsed: started.elapsed(),
        pid,
    })
}

/// SIGKILL whatever is left in the group of an already reaped leader.
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};

        if let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
            // ESRCH just means the group is already empty
            let _ = killpg(nix::unistd::Pid::from_raw(pgid), Signal::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// SIGTERM the process group, wait `grace`, then SIGKILL and reap.
async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};

        let group = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .map(nix::unistd::Pid::from_raw);
        if let Some(pgid) = group {
            if let Err(e) = killpg(pgid, Signal::SIGTERM) {
                debug!("SIGTERM to group {} failed: {}", pgid, e);
            }
            if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                // Leader is gone; clear any stragglers left in its group
                let _ = killpg(pgid, Signal::SIGKILL);
                return Some(status);
            }
            warn!("⚠️  Process group {} ignored SIGTERM, killing", pgid);
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {}", e);
    }
    child.wait().await.ok()
}

/// First characters of stderr, for error messages.
pub fn stderr_excerpt(stderr: &str) -> String {
    crate::logging::preview(stderr.trim(), STDERR_EXCERPT_CHARS)
}
