//! Step executor - runs a single command through the platform shell

use crate::core::{ExecutionContext, StepOutcome, StepResult};
use async_trait::async_trait;
use chrono::Utc;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs one command and reports how it ended
///
/// Implementations never return an error: every way a command can end is a
/// `StepOutcome`.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step_id: &str,
        command: &str,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult;
}

/// Shell used to interpret step commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    /// `sh -c`
    Sh,
    /// `bash -c`
    Bash,
    /// `cmd /C`
    Cmd,
}

impl Shell {
    /// `cmd` on Windows, `sh` everywhere else
    pub fn platform_default() -> Self {
        if cfg!(target_os = "windows") {
            Shell::Cmd
        } else {
            Shell::Sh
        }
    }

    fn program(&self) -> (&'static str, &'static str) {
        match self {
            Shell::Sh => ("sh", "-c"),
            Shell::Bash => ("bash", "-c"),
            Shell::Cmd => ("cmd", "/C"),
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// How the wait on a child process ended
enum Exit {
    Finished(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

/// Executes step commands as child processes
///
/// The child sees only the context's environment and runs in the context's
/// working directory. Output from stdout and stderr is merged line by line in
/// the order it arrives.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: Shell,
    /// How long to keep draining output after the child has exited
    output_grace: Duration,
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            shell: Shell::platform_default(),
            output_grace: Duration::from_millis(500),
        }
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn with_output_grace(mut self, grace: Duration) -> Self {
        self.output_grace = grace;
        self
    }

    pub fn shell(&self) -> Shell {
        self.shell
    }
}

async fn forward_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Kill the process group led by the step's shell
///
/// After a normal exit this only reaps leftovers such as background jobs;
/// an empty group is not an error.
#[cfg(unix)]
async fn kill_process_tree(pid: u32, step_id: &str, exited: bool) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) if exited => debug!("Killed leftover processes of step {}", step_id),
        Ok(()) => debug!("Killed process group of step {}", step_id),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group of step {}: {}", step_id, e),
    }
}

/// Kill the step's process and its descendants with `taskkill /T`
///
/// Once the shell has exited its descendants can no longer be found by
/// parent, so only interrupted steps are handled.
#[cfg(windows)]
async fn kill_process_tree(pid: u32, step_id: &str, exited: bool) {
    if exited {
        return;
    }
    let status = Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!("Killed process tree of step {}", step_id),
        Ok(status) => warn!("taskkill for step {} exited with {}", step_id, status),
        Err(e) => warn!("Failed to run taskkill for step {}: {}", step_id, e),
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(
        &self,
        step_id: &str,
        command: &str,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();

        if !context.working_dir.is_dir() {
            let reason = format!(
                "working directory {} does not exist",
                context.working_dir.display()
            );
            error!("Step {} cannot start: {}", step_id, reason);
            return StepResult::infrastructure_failure(step_id, reason, started_at, start.elapsed());
        }

        let (program, flag) = self.shell.program();
        debug!("Step {}: {} {} {:?}", step_id, program, flag, command);

        let mut cmd = Command::new(program);
        cmd.arg(flag)
            .arg(command)
            .env_clear()
            .envs(&context.env)
            .current_dir(&context.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The shell leads its own process group so everything it forks can
        // be signalled together
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to spawn '{}': {}", program, e);
                error!("Step {} cannot start: {}", step_id, reason);
                return StepResult::infrastructure_failure(step_id, reason, started_at, start.elapsed());
            }
        };
        let pid = child.id();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            readers.spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let timeout = context.timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = deadline => Exit::TimedOut(timeout.unwrap_or_default()),
            _ = cancel.cancelled() => Exit::Cancelled,
        };

        // Release every process the command started, on every exit path
        if let Some(pid) = pid {
            kill_process_tree(pid, step_id, matches!(exit, Exit::Finished(_))).await;
        }
        if !matches!(exit, Exit::Finished(_)) {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill step {} process: {}", step_id, e);
            }
        }

        // Processes spawned by the command may keep the pipes open after the
        // shell exits; stop reading once the grace period is over.
        let mut output = String::new();
        let drained = tokio::time::timeout(self.output_grace, async {
            while let Some(chunk) = rx.recv().await {
                output.push_str(&chunk);
            }
        })
        .await;
        if drained.is_err() {
            debug!("Step {} output still open after exit; truncating", step_id);
        }
        readers.abort_all();

        let outcome = match exit {
            Exit::Finished(Ok(status)) if status.success() => StepOutcome::Succeeded,
            Exit::Finished(Ok(status)) => StepOutcome::Failed {
                exit_code: status.code(),
            },
            Exit::Finished(Err(e)) => {
                error!("Failed to wait on step {} process: {}", step_id, e);
                StepOutcome::InfrastructureFailure {
                    reason: format!("failed to wait on '{}': {}", program, e),
                }
            }
            Exit::TimedOut(limit) => {
                warn!("Step {} timed out after {:?}", step_id, limit);
                StepOutcome::TimedOut {
                    after_ms: limit.as_millis().try_into().unwrap_or(u64::MAX),
                }
            }
            Exit::Cancelled => {
                info!("Step {} cancelled", step_id);
                StepOutcome::Cancelled
            }
        };

        StepResult::new(step_id, outcome, output, started_at, start.elapsed())
    }
}
