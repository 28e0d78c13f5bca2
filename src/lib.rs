//! Harvest - personal time tracking
//!
//! This crate holds Harvest's self-upgrade machinery: checking for new
//! releases, snapshotting the user's data before anything changes, installing
//! a verified release artifact over the native binary, and rolling back to
//! the previous binary and data when an install fails.
//!
//! # Modules
//!
//! - [`cli`] - `harvest upgrade` and `harvest rollback`
//! - [`config`] - the global `harvest.toml`
//! - [`core`] - error types and user-facing error rendering
//! - [`upgrade`] - backup store, release source, download/install stages,
//!   rollback manager and the orchestrator tying them together
//! - [`utils`] - filesystem, archive-path and progress helpers
//!
//! # Example
//!
//! ```rust,no_run
//! use harvest_cli::config::GlobalConfig;
//! use harvest_cli::upgrade::{GitHubReleaseSource, UpgradeContext, UpgradeOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = GlobalConfig::load().await?;
//! let ctx = UpgradeContext::from_config(&config, env!("CARGO_PKG_VERSION"))?;
//! let source = GitHubReleaseSource::new(&ctx)?;
//!
//! let info = UpgradeOrchestrator::new(&ctx, &source).get_upgrade_info().await?;
//! println!("{}", info.format_version_info());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
