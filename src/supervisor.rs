/// Supervision of a group of children sharing one cancellation signal.
///
/// Every child is started before any is waited on, so a command that cannot
/// be launched aborts the whole group up front.
use crate::cancel::CancellationSignal;
use crate::config::{ExitCodePolicy, SupervisorConfig};
use crate::launcher::{LaunchError, Launcher};
use crate::process::{CommandSpec, ExitOutcome};
use crate::signals::TerminationSignals;
use tokio::task::JoinSet;

/// Final outcome of one supervised child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildReport {
    pub spec: CommandSpec,
    pub outcome: ExitOutcome,
}

pub struct Supervisor {
    launcher: Launcher,
    exit_code: ExitCodePolicy,
    cancel: CancellationSignal,
}

impl Supervisor {
    pub fn new(config: &SupervisorConfig) -> Self {
        Self {
            launcher: Launcher::new(config.grace_period(), config.cancel_on_failure),
            exit_code: config.exit_code,
            cancel: CancellationSignal::new(),
        }
    }

    /// The group-wide cancellation signal.
    #[allow(dead_code)]
    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancel
    }

    /// Start every command, then supervise them concurrently until all
    /// have exited. Reports come back in command order.
    pub async fn run(&self, commands: &[CommandSpec]) -> Result<Vec<ChildReport>, LaunchError> {
        let mut started = Vec::with_capacity(commands.len());
        for spec in commands {
            let launched = TerminationSignals::register()
                .map_err(|source| {
                    tracing::error!(command = %spec, error = %source, "failed to register signal handlers");
                    LaunchError::Signals { source }
                })
                .and_then(|signals| self.launcher.start(spec).map(|running| (running, signals)));
            match launched {
                Ok(pair) => started.push(pair),
                Err(e) => {
                    self.cancel.trigger();
                    for (running, _) in started {
                        running.abort().await;
                    }
                    return Err(e);
                }
            }
        }

        let mut set = JoinSet::new();
        for (index, (running, signals)) in started.into_iter().enumerate() {
            let launcher = self.launcher;
            let cancel = self.cancel.clone();
            set.spawn(async move { (index, launcher.supervise(running, signals, &cancel).await) });
        }

        let mut outcomes: Vec<Option<ExitOutcome>> = vec![None; commands.len()];
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => outcomes[index] = Some(outcome),
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => tracing::error!(error = %e, "supervision task failed"),
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(commands
            .iter()
            .zip(outcomes)
            .map(|(spec, outcome)| ChildReport {
                spec: spec.clone(),
                // A panicked supervision task leaves no outcome; count it as a failure.
                outcome: outcome.unwrap_or(ExitOutcome::Failed { code: 1 }),
            })
            .collect())
    }

    /// The supervisor's own exit code for a finished group.
    pub fn exit_code(&self, reports: &[ChildReport]) -> i32 {
        resolve_exit_code(self.exit_code, reports)
    }
}

fn resolve_exit_code(policy: ExitCodePolicy, reports: &[ChildReport]) -> i32 {
    let first_failure = reports.iter().find(|r| !r.outcome.is_success());
    match (policy, first_failure) {
        (ExitCodePolicy::AlwaysZero, _) | (_, None) => 0,
        (ExitCodePolicy::Propagate, Some(report)) => report.outcome.exit_code(),
        (ExitCodePolicy::AnyFailure, Some(_)) => 1,
    }
}
