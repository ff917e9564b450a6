use crate::escalation::DEFAULT_GRACE_PERIOD;
use crate::process::CommandSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from tether.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TetherConfig {
    pub supervisor: SupervisorConfig,
    pub commands: Vec<CommandSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub grace_period_secs: u64,
    pub cancel_on_failure: bool,
    pub exit_code: ExitCodePolicy,
}

/// How the supervisor derives its own exit code from its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExitCodePolicy {
    /// Exit with the first failing child's code (128 + signal when killed).
    #[default]
    Propagate,
    /// Always exit 0 once every child has been started.
    AlwaysZero,
    /// Exit 1 if any child failed.
    AnyFailure,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            cancel_on_failure: true,
            exit_code: ExitCodePolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

/// Errors that can occur while resolving configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Neither the command line nor the config file named a command.
    NoCommands,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config file {}: {}", path.display(), source)
            }
            ConfigError::NoCommands => write!(f, "no command to run"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::NoCommands => None,
        }
    }
}

impl TetherConfig {
    /// Load config from `path`.
    ///
    /// A missing file yields the defaults unless `required` is set, which is
    /// the case when the path was given explicitly.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Fail unless there is at least one command to supervise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.commands.is_empty() {
            return Err(ConfigError::NoCommands);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = TetherConfig::default();
        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(10));
        assert!(config.supervisor.cancel_on_failure);
        assert_eq!(config.supervisor.exit_code, ExitCodePolicy::Propagate);
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config: TetherConfig = toml::from_str(
            r#"
            [supervisor]
            grace_period_secs = 3
            cancel_on_failure = false
            exit_code = "any-failure"

            [[commands]]
            command = "sleep"
            args = ["30"]

            [[commands]]
            command = "true"
            "#,
        )
        .unwrap();

        assert_eq!(config.supervisor.grace_period(), Duration::from_secs(3));
        assert!(!config.supervisor.cancel_on_failure);
        assert_eq!(config.supervisor.exit_code, ExitCodePolicy::AnyFailure);
        assert_eq!(
            config.commands,
            vec![
                CommandSpec::new("sleep", ["30"]),
                CommandSpec::new("true", Vec::<String>::new()),
            ]
        );
    }

    #[test]
    fn test_partial_supervisor_section_keeps_defaults() {
        let config: TetherConfig = toml::from_str("[supervisor]\nexit_code = \"always-zero\"\n").unwrap();
        assert_eq!(config.supervisor.exit_code, ExitCodePolicy::AlwaysZero);
        assert_eq!(config.supervisor.grace_period_secs, 10);
        assert!(config.supervisor.cancel_on_failure);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[[commands]]\ncommand = \"echo\"\nargs = [\"hi\"]\n").unwrap();

        let config = TetherConfig::load(&path, true).unwrap();
        assert_eq!(config.commands, vec![CommandSpec::new("echo", ["hi"])]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_optional_file() {
        let dir = tempdir().unwrap();
        let config = TetherConfig::load(&dir.path().join("tether.toml"), false).unwrap();
        assert!(config.commands.is_empty());
    }

    #[test]
    fn test_load_missing_required_file() {
        let dir = tempdir().unwrap();
        let err = TetherConfig::load(&dir.path().join("missing.toml"), true).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, "[supervisor]\ngrace_period_secs = \"soon\"\n").unwrap();

        let err = TetherConfig::load(&path, false).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn test_validate_requires_a_command() {
        let err = TetherConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::NoCommands));
    }
}
