/// Identity and OS-level handle of one supervised child, plus its exit outcome.
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use tokio_util::sync::CancellationToken;

/// The command to launch: executable name or path plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(command: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One-shot notification that a child's wait has finished.
#[derive(Debug, Clone, Default)]
pub struct CompletionEvent {
    token: CancellationToken,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await
    }
}

/// Shared, read-only view of a running child used to deliver signals.
///
/// The Launcher keeps the OS child and is the only one that waits on it;
/// it fires `exited` once the wait returns. Signals sent after that point
/// are skipped, so a reaped pid is never targeted.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Pid,
    exited: CompletionEvent,
}

impl ProcessHandle {
    pub fn new(pid: u32, exited: CompletionEvent) -> Self {
        Self {
            pid: Pid::from_raw(pid as i32),
            exited,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_done()
    }

    pub async fn exited(&self) {
        self.exited.wait().await
    }

    /// Deliver `sig` to the child. Returns `false` when nothing was sent,
    /// including the harmless case of a child that is already gone.
    pub fn signal(&self, sig: Signal) -> bool {
        if self.has_exited() {
            return false;
        }
        match signal::kill(self.pid, sig) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                tracing::warn!(pid = self.pid(), signal = %sig, error = %e, "failed to signal child");
                false
            }
        }
    }

    /// Forcibly terminate the child (SIGKILL).
    pub fn kill(&self) -> bool {
        self.signal(Signal::SIGKILL)
    }
}

/// How a supervised child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Exited on its own with a non-zero code.
    Failed { code: i32 },
    /// Terminated by a signal (raw signal number).
    Signaled { signal: i32 },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    /// Shell-style exit code: 0, the child's code, or 128 + signal.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Success => 0,
            ExitOutcome::Failed { code } => *code,
            ExitOutcome::Signaled { signal } => 128 + signal,
        }
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(0), _) => ExitOutcome::Success,
            (Some(code), _) => ExitOutcome::Failed { code },
            (None, Some(signal)) => ExitOutcome::Signaled { signal },
            // Stopped/continued statuses are never returned by wait(); treat as failure.
            (None, None) => ExitOutcome::Failed { code: 1 },
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exit status 0"),
            ExitOutcome::Failed { code } => write!(f, "exit status {code}"),
            ExitOutcome::Signaled { signal } => match Signal::try_from(*signal) {
                Ok(sig) => write!(f, "terminated by signal {sig}"),
                Err(_) => write!(f, "terminated by signal {signal}"),
            },
        }
    }
}
