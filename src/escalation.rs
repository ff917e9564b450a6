/// Signal-then-kill escalation for a single supervised child.
///
/// Forwards a termination signal, then races the child's exit against a
/// fixed grace period. A child still running when the grace period runs out
/// is killed with SIGKILL.
use crate::process::ProcessHandle;
use nix::sys::signal::Signal;
use std::time::Duration;

/// Grace period between the forwarded signal and the forced kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// What the escalation ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// The child had already exited; nothing was sent.
    AlreadyExited,
    /// The child exited on its own within the grace period.
    ExitedWithinGrace,
    /// The grace period elapsed and the child was killed.
    Killed,
}

#[derive(Debug, Clone, Copy)]
pub struct EscalationTimer {
    grace_period: Duration,
}

impl EscalationTimer {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    #[allow(dead_code)]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Deliver `signal` to the child and wait up to the grace period for it
    /// to exit, killing it otherwise. Returns once the child has exited or
    /// the kill has been sent.
    pub async fn escalate(&self, process: &ProcessHandle, signal: Signal) -> EscalationOutcome {
        if !process.signal(signal) && process.has_exited() {
            tracing::debug!(pid = process.pid(), %signal, "child already exited, nothing to forward");
            return EscalationOutcome::AlreadyExited;
        }
        tracing::debug!(pid = process.pid(), %signal, "forwarded signal to child");

        tokio::select! {
            // An exit observed at the deadline wins over the kill.
            biased;
            _ = process.exited() => EscalationOutcome::ExitedWithinGrace,
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!(
                    pid = process.pid(),
                    grace_secs = self.grace_period.as_secs_f64(),
                    "killing command due to timeout"
                );
                process.kill();
                EscalationOutcome::Killed
            }
        }
    }
}

impl Default for EscalationTimer {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}
