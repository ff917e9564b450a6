mod cancel;
mod config;
mod escalation;
mod launcher;
mod process;
mod signals;
mod supervisor;

use clap::Parser;
use config::{ExitCodePolicy, TetherConfig};
use process::CommandSpec;
use std::path::PathBuf;
use supervisor::Supervisor;
use tracing_subscriber::EnvFilter;

/// Run a command attached to this terminal, forward termination signals to
/// it, and kill it if it ignores them for longer than the grace period.
#[derive(Parser, Debug)]
#[command(name = "tether", version, about)]
pub struct Cli {
    /// Command to run, followed by its arguments (overrides config commands)
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait after forwarding a signal before killing (overrides config)
    #[arg(long, value_name = "SECS")]
    grace_period: Option<u64>,

    /// How tether's own exit code is derived (overrides config)
    #[arg(long, value_enum)]
    exit_code: Option<ExitCodePolicy>,

    /// Keep sibling commands' forwarders armed when one command fails
    #[arg(long)]
    no_cancel_on_failure: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (signal forwarding, cancellation)
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

const DEFAULT_CONFIG_FILE: &str = "tether.toml";

/// Exit code for usage and configuration errors.
const USAGE_EXIT_CODE: i32 = 2;

impl Cli {
    /// Load the config file and apply command line overrides on top.
    fn resolve_config(&self) -> Result<TetherConfig, config::ConfigError> {
        let (path, required) = match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let mut config = TetherConfig::load(&path, required)?;

        if let Some((command, args)) = self.command.split_first() {
            config.commands = vec![CommandSpec::new(command.as_str(), args.iter().map(String::as_str))];
        }
        if let Some(secs) = self.grace_period {
            config.supervisor.grace_period_secs = secs;
        }
        if let Some(policy) = self.exit_code {
            config.supervisor.exit_code = policy;
        }
        if self.no_cancel_on_failure {
            config.supervisor.cancel_on_failure = false;
        }

        config.validate()?;
        Ok(config)
    }

    fn log_filter(&self) -> EnvFilter {
        let level = if self.verbose {
            "tether=debug"
        } else if self.quiet {
            "tether=warn"
        } else {
            return EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tether=info"));
        };
        EnvFilter::new(level)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout belongs to the child.
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(USAGE_EXIT_CODE);
        }
    };

    if cli.dry_run {
        println!("tether v{}", env!("CARGO_PKG_VERSION"));
        println!("Grace period: {}s", config.supervisor.grace_period_secs);
        println!("Cancel on failure: {}", config.supervisor.cancel_on_failure);
        println!("Exit code policy: {:?}", config.supervisor.exit_code);
        for spec in &config.commands {
            println!("Command: {spec}");
        }
        println!("Dry run mode: config validated, not running.");
        return;
    }

    let supervisor = Supervisor::new(&config.supervisor);
    let code = match supervisor.run(&config.commands).await {
        Ok(reports) => supervisor.exit_code(&reports),
        // Already logged where it happened.
        Err(e) => e.exit_code(),
    };
    std::process::exit(code);
}
