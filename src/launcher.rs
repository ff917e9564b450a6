/// Child lifecycle: start a command attached to the supervisor's terminal,
/// forward termination signals to it, wait for it, and report how it ended.
use crate::cancel::CancellationSignal;
use crate::escalation::EscalationTimer;
use crate::process::{CommandSpec, CompletionEvent, ExitOutcome, ProcessHandle};
use crate::signals::{SignalForwarder, SignalSource, TerminationSignals};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Errors that stop a child from being supervised at all.
#[derive(Debug)]
pub enum LaunchError {
    /// Failed to register the termination signal handlers.
    Signals { source: std::io::Error },
    /// Failed to spawn the command.
    Spawn {
        command: String,
        source: std::io::Error,
    },
    /// Failed to wait on the running command.
    Wait {
        command: String,
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Shell-style exit code for the supervisor itself.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Spawn { source, .. } => match source.kind() {
                std::io::ErrorKind::NotFound => 127,
                std::io::ErrorKind::PermissionDenied => 126,
                _ => 1,
            },
            LaunchError::Signals { .. } | LaunchError::Wait { .. } => 1,
        }
    }
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Signals { source } => {
                write!(f, "failed to register signal handlers: {}", source)
            }
            LaunchError::Spawn { command, source } => {
                write!(f, "error starting command `{}`: {}", command, source)
            }
            LaunchError::Wait { command, source } => {
                write!(f, "error waiting for command `{}`: {}", command, source)
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Signals { source } => Some(source),
            LaunchError::Spawn { source, .. } => Some(source),
            LaunchError::Wait { source, .. } => Some(source),
        }
    }
}

/// A started child, not yet supervised.
#[derive(Debug)]
pub struct RunningChild {
    spec: CommandSpec,
    child: Child,
    handle: ProcessHandle,
    exited: CompletionEvent,
}

impl RunningChild {
    #[allow(dead_code)]
    pub fn handle(&self) -> &ProcessHandle {
        &self.handle
    }

    /// Kill and reap a child that will never be supervised.
    pub async fn abort(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(command = %self.spec, error = %e, "failed to kill command");
        }
        self.exited.notify();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Launcher {
    grace_period: Duration,
    cancel_on_failure: bool,
}

impl Launcher {
    pub fn new(grace_period: Duration, cancel_on_failure: bool) -> Self {
        Self {
            grace_period,
            cancel_on_failure,
        }
    }

    /// Register signals, start the command and supervise it to completion.
    #[allow(dead_code)]
    pub async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationSignal,
    ) -> Result<ExitOutcome, LaunchError> {
        let signals = TerminationSignals::register().map_err(|source| {
            tracing::error!(command = %spec, error = %source, "failed to register signal handlers");
            LaunchError::Signals { source }
        })?;
        let running = self.start(spec)?;
        self.supervise(running, signals, cancel).await
    }

    /// Spawn the command with stdin, stdout and stderr passed straight through.
    ///
    /// The child stays in the supervisor's process group so terminal job
    /// control keeps working for it.
    pub fn start(&self, spec: &CommandSpec) -> Result<RunningChild, LaunchError> {
        let child = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| {
                tracing::error!(command = %spec, error = %source, "error starting command");
                LaunchError::Spawn {
                    command: spec.to_string(),
                    source,
                }
            })?;

        // A freshly spawned, unpolled child always has a pid.
        let pid = child.id().unwrap_or(0);
        tracing::info!(command = %spec, pid, "command started");

        let exited = CompletionEvent::new();
        Ok(RunningChild {
            spec: spec.clone(),
            child,
            handle: ProcessHandle::new(pid, exited.clone()),
            exited,
        })
    }

    /// Forward `signals` to the child while waiting for it to exit.
    ///
    /// Any outcome other than success triggers `cancel` when
    /// `cancel_on_failure` is set.
    pub async fn supervise<S: SignalSource>(
        &self,
        running: RunningChild,
        signals: S,
        cancel: &CancellationSignal,
    ) -> Result<ExitOutcome, LaunchError> {
        let RunningChild {
            spec,
            mut child,
            handle,
            exited,
        } = running;

        let scope = cancel.scope();
        let forwarder = SignalForwarder::new(
            spec.to_string(),
            handle,
            cancel.clone(),
            scope.clone(),
            EscalationTimer::new(self.grace_period),
        );
        let forwarding = tokio::spawn(forwarder.run(signals));

        let status = child.wait().await;
        exited.notify();
        scope.cancel();
        match forwarding.await {
            Ok(outcome) => tracing::debug!(command = %spec, ?outcome, "signal forwarder finished"),
            Err(e) => tracing::warn!(command = %spec, error = %e, "signal forwarder task failed"),
        }

        let status = match status {
            Ok(status) => status,
            Err(source) => {
                tracing::error!(command = %spec, error = %source, "error waiting for command");
                cancel.trigger();
                return Err(LaunchError::Wait {
                    command: spec.to_string(),
                    source,
                });
            }
        };

        let outcome = ExitOutcome::from(status);
        if outcome.is_success() {
            tracing::info!(command = %spec, "command finished successfully");
        } else {
            tracing::warn!(
                command = %spec,
                exit_code = outcome.exit_code(),
                "command exited with error: {outcome}"
            );
            if self.cancel_on_failure {
                cancel.trigger();
            }
        }
        Ok(outcome)
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new(crate::escalation::DEFAULT_GRACE_PERIOD, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use std::time::Instant;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_run_successful_command() {
        let cancel = CancellationSignal::new();
        let outcome = Launcher::default()
            .run(&CommandSpec::new("true", Vec::<String>::new()), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Success);
        assert!(!cancel.is_triggered());
    }

    #[tokio::test]
    async fn test_run_passes_arguments() {
        let cancel = CancellationSignal::new();
        let outcome = Launcher::default()
            .run(&sh("test \"$0\" = sh && exit 0 || exit 9"), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, ExitOutcome::Success);
    }

    #[tokio::test]
    async fn test_nonzero_exit_cancels_group() {
        let cancel = CancellationSignal::new();
        let outcome = Launcher::default().run(&sh("exit 7"), &cancel).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Failed { code: 7 });
        assert!(cancel.is_triggered());
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_cancel_on_failure() {
        let cancel = CancellationSignal::new();
        let launcher = Launcher::new(Duration::from_secs(10), false);
        let outcome = launcher.run(&sh("exit 7"), &cancel).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Failed { code: 7 });
        assert!(!cancel.is_triggered());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let cancel = CancellationSignal::new();
        let err = Launcher::default()
            .run(&CommandSpec::new("nonexistent-binary-xyz", ["arg"]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert_eq!(err.exit_code(), 127);
        assert!(err.to_string().contains("nonexistent-binary-xyz arg"));
    }

    #[tokio::test]
    async fn test_spawn_failure_permission_denied() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("not-executable.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();

        let spec = CommandSpec::new(script.to_string_lossy(), Vec::<String>::new());
        let err = Launcher::default().start(&spec).unwrap_err();
        assert_eq!(err.exit_code(), 126);
    }

    #[tokio::test]
    async fn test_interrupt_is_forwarded_without_kill() {
        let cancel = CancellationSignal::new();
        let launcher = Launcher::default();
        let running = launcher.start(&CommandSpec::new("sleep", ["30"])).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let start = Instant::now();
        tx.send(Signal::SIGINT).await.unwrap();
        let outcome = launcher.supervise(running, rx, &cancel).await.unwrap();

        assert_eq!(
            outcome,
            ExitOutcome::Signaled {
                signal: Signal::SIGINT as i32
            }
        );
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(cancel.is_triggered());
    }

    #[tokio::test]
    async fn test_ignoring_child_is_killed_after_grace() {
        let cancel = CancellationSignal::new();
        let grace = Duration::from_millis(500);
        let launcher = Launcher::new(grace, true);
        let running = launcher
            .start(&sh("trap '' INT; exec sleep 30"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (tx, rx) = mpsc::channel(1);

        let start = Instant::now();
        tx.send(Signal::SIGINT).await.unwrap();
        let outcome = launcher.supervise(running, rx, &cancel).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(
            outcome,
            ExitOutcome::Signaled {
                signal: Signal::SIGKILL as i32
            }
        );
        assert!(elapsed >= grace);
        assert!(elapsed < grace + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_natural_exit_is_never_signaled() {
        let cancel = CancellationSignal::new();
        let launcher = Launcher::default();
        let running = launcher.start(&sh("exit 0")).unwrap();
        let (tx, rx) = mpsc::channel(1);

        let outcome = launcher.supervise(running, rx, &cancel).await.unwrap();
        assert_eq!(outcome, ExitOutcome::Success);
        // The forwarder retired with the child; nobody is listening anymore.
        assert!(tx.send(Signal::SIGTERM).await.is_err());
        assert!(!cancel.is_triggered());
    }

    #[tokio::test]
    async fn test_abort_kills_unsupervised_child() {
        let running = Launcher::default()
            .start(&CommandSpec::new("sleep", ["30"]))
            .unwrap();
        let handle = running.handle().clone();
        running.abort().await;
        assert!(handle.has_exited());
    }
}
