//! Command-line interface for Harvest's self-upgrade and rollback commands.
//!
//! # Available Commands
//!
//! - `upgrade` - Check for and install a newer release, backing up data first
//! - `rollback` - Inspect or restore the previous binary and data snapshot
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: errors only
//! - `--config` / `-c`: alternative `harvest.toml`
//! - `--no-progress`: hide progress bars (also `HARVEST_NO_PROGRESS`)
//!
//! Configuration is loaded once per invocation and turned into an
//! [`UpgradeContext`] that is handed to the selected command.

pub mod rollback;
pub mod upgrade;

use crate::config::GlobalConfig;
use crate::upgrade::UpgradeContext;
use crate::utils::progress::NO_PROGRESS_ENV;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Runtime settings derived from the global flags.
///
/// Kept separate from [`Cli`] so tests can execute commands with an injected
/// configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliConfig {
    /// Log filter directive. `None` defers to `RUST_LOG`, then `warn`.
    pub log_level: Option<String>,

    /// Hide progress bars.
    pub no_progress: bool,

    /// Explicit config file; `None` uses [`GlobalConfig::default_path`].
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export settings that deeper layers read from the environment.
    ///
    /// Must be called before any other thread is started.
    pub fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: the CLI runs on a single-threaded runtime and calls this
            // before any task is spawned.
            unsafe { std::env::set_var(NO_PROGRESS_ENV, "1") };
        }
    }

    /// Install the global tracing subscriber. Later calls are no-ops.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Harvest command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "harvest",
    about = "Harvest - personal time tracking",
    version,
    long_about = "Harvest tracks your time locally. The upgrade and rollback commands keep the \
                  installed binary current while protecting your data with verified backups."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to an alternative harvest.toml
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable progress bars
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upgrade Harvest to the latest release
    Upgrade(upgrade::UpgradeArgs),

    /// Inspect or perform a rollback to the previous version
    Rollback(rollback::RollbackArgs),
}

impl Cli {
    /// Set up logging from the global flags and run the command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        config.init_logging();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Run the selected command with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.apply_to_env();

        let global = GlobalConfig::load_with_optional(config.config_path.clone()).await?;
        let ctx = UpgradeContext::from_config(&global, env!("CARGO_PKG_VERSION"))?;
        tracing::debug!("Data directory: {}", ctx.paths.data_dir.display());

        match self.command {
            Commands::Upgrade(cmd) => cmd.execute(&ctx).await,
            Commands::Rollback(cmd) => cmd.execute(&ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_build_config_levels() {
        let cli = Cli::try_parse_from(["harvest", "--verbose", "upgrade"]).unwrap();
        assert_eq!(cli.build_config().log_level.as_deref(), Some("debug"));

        let cli = Cli::try_parse_from(["harvest", "rollback", "-q"]).unwrap();
        assert_eq!(cli.build_config().log_level.as_deref(), Some("error"));

        let cli = Cli::try_parse_from(["harvest", "upgrade", "--check"]).unwrap();
        assert_eq!(cli.build_config(), CliConfig::new());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "harvest",
            "rollback",
            "--no-progress",
            "--config",
            "/tmp/harvest.toml",
        ])
        .unwrap();
        let config = cli.build_config();
        assert!(config.no_progress);
        assert_eq!(config.config_path, Some(PathBuf::from("/tmp/harvest.toml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["harvest", "-v", "-q", "upgrade"]).is_err());
    }
}
