/// Signal forwarding for one supervised child.
///
/// Each child gets its own forwarder with its own signal registration. The
/// forwarder waits for either a termination signal, which it forwards with
/// escalation before cancelling the group, or for its scope to be cancelled,
/// in which case it exits without touching the child.
use crate::cancel::CancellationSignal;
use crate::escalation::{EscalationOutcome, EscalationTimer};
use crate::process::ProcessHandle;
use nix::sys::signal::Signal;
use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Signals forwarded to supervised children.
///
/// SIGKILL cannot be caught, so it is not registered.
pub const FORWARDED_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGQUIT,
];

/// A stream of termination requests addressed to the supervisor.
pub trait SignalSource: Send + 'static {
    /// Next received signal, or `None` once the source is closed.
    fn recv(&mut self) -> impl Future<Output = Option<Signal>> + Send;
}

/// OS registration for [`FORWARDED_SIGNALS`].
///
/// Every instance is an independent registration, so one child's forwarder
/// never consumes a delivery meant for another.
pub struct TerminationSignals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    pub fn register() -> std::io::Result<Self> {
        let registered = Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
        };
        tracing::debug!(signals = ?FORWARDED_SIGNALS, "registered termination signals");
        Ok(registered)
    }
}

impl SignalSource for TerminationSignals {
    async fn recv(&mut self) -> Option<Signal> {
        tokio::select! {
            r = self.hangup.recv() => r.map(|_| Signal::SIGHUP),
            r = self.interrupt.recv() => r.map(|_| Signal::SIGINT),
            r = self.terminate.recv() => r.map(|_| Signal::SIGTERM),
            r = self.quit.recv() => r.map(|_| Signal::SIGQUIT),
        }
    }
}

impl SignalSource for mpsc::Receiver<Signal> {
    async fn recv(&mut self) -> Option<Signal> {
        mpsc::Receiver::recv(self).await
    }
}

/// How a forwarder finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// A signal was received and escalated against the child.
    Forwarded {
        signal: Signal,
        escalation: EscalationOutcome,
    },
    /// The scope was cancelled first; the child was not touched.
    Retired,
}

enum State {
    Registered,
    Escalating(Signal),
    Cancelled,
    Done(ForwardOutcome),
}

pub struct SignalForwarder {
    command: String,
    process: ProcessHandle,
    cancel: CancellationSignal,
    scope: CancellationToken,
    timer: EscalationTimer,
}

impl SignalForwarder {
    /// `scope` ends the forwarder without signaling; it should be derived
    /// from `cancel` so group cancellation also reaches it.
    pub fn new(
        command: impl Into<String>,
        process: ProcessHandle,
        cancel: CancellationSignal,
        scope: CancellationToken,
        timer: EscalationTimer,
    ) -> Self {
        Self {
            command: command.into(),
            process,
            cancel,
            scope,
            timer,
        }
    }

    /// Run to completion. One-shot: after the first signal or cancellation
    /// the forwarder is done and the source is dropped.
    pub async fn run<S: SignalSource>(self, mut signals: S) -> ForwardOutcome {
        let mut state = State::Registered;
        loop {
            state = match state {
                State::Registered => tokio::select! {
                    received = signals.recv() => match received {
                        Some(sig) => State::Escalating(sig),
                        None => {
                            self.scope.cancelled().await;
                            State::Cancelled
                        }
                    },
                    _ = self.scope.cancelled() => State::Cancelled,
                },
                State::Escalating(sig) => {
                    tracing::info!(command = %self.command, signal = %sig, "received signal");
                    let escalation = self.timer.escalate(&self.process, sig).await;
                    self.cancel.trigger();
                    State::Done(ForwardOutcome::Forwarded {
                        signal: sig,
                        escalation,
                    })
                }
                State::Cancelled => {
                    if self.cancel.is_triggered() {
                        tracing::info!(command = %self.command, "done waiting for signals, group cancelled");
                    } else {
                        tracing::debug!(command = %self.command, "done waiting for signals, child exited");
                    }
                    State::Done(ForwardOutcome::Retired)
                }
                State::Done(outcome) => return outcome,
            };
        }
    }
}
