//! Paths and settings shared by every upgrade component.
//!
//! An [`UpgradeContext`] is built once at process start from the loaded
//! [`GlobalConfig`] and handed by reference to each component constructor.
//! Nothing in the upgrade pipeline reads configuration or the environment on
//! its own.

use crate::config::GlobalConfig;
use crate::upgrade::config::UpgradeConfig;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Name of the rollback activity log inside the backup root.
pub const ACTIVITY_LOG_FILE: &str = "rollback.log";

/// Filesystem layout used by the upgrade subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePaths {
    /// Directory holding the live tracked data files.
    pub data_dir: PathBuf,
    /// Root of all snapshots, the latest pointer, the binary slot and the log.
    pub backup_root: PathBuf,
    /// Staging directory for downloaded artifacts.
    pub download_dir: PathBuf,
    /// Parent of the scratch extraction directories.
    pub work_dir: PathBuf,
    /// Installed location of the native binary.
    pub install_path: PathBuf,
}

impl UpgradePaths {
    /// Derive the layout from a data directory and an install path.
    pub fn new(data_dir: PathBuf, install_path: PathBuf) -> Self {
        Self {
            backup_root: data_dir.join("backup"),
            download_dir: data_dir.join("downloads"),
            work_dir: data_dir.join("install"),
            data_dir,
            install_path,
        }
    }

    /// Layout rooted entirely under `root`, used by tests and sandboxes.
    pub fn under(root: &Path, binary_name: &str) -> Self {
        Self::new(root.join("data"), root.join("bin").join(binary_name))
    }

    /// Path of the rollback activity log.
    pub fn activity_log(&self) -> PathBuf {
        self.backup_root.join(ACTIVITY_LOG_FILE)
    }

    /// Single-slot binary backup path, `<backup_root>/<binary>.bak`.
    pub fn binary_backup(&self, binary_name: &str) -> PathBuf {
        self.backup_root.join(format!("{binary_name}.bak"))
    }
}

/// Everything an upgrade component needs to know about its environment.
#[derive(Debug, Clone)]
pub struct UpgradeContext {
    /// Filesystem layout.
    pub paths: UpgradePaths,
    /// `[upgrade]` settings.
    pub config: UpgradeConfig,
    /// Version of the running binary.
    pub current_version: String,
}

impl UpgradeContext {
    /// Build the context from a loaded configuration.
    pub fn from_config(config: &GlobalConfig, current_version: impl Into<String>) -> Result<Self> {
        let paths = UpgradePaths::new(config.resolved_data_dir()?, config.resolved_install_path()?);
        Ok(Self {
            paths,
            config: config.upgrade.clone(),
            current_version: current_version.into(),
        })
    }

    /// Context with default settings rooted under `root`.
    pub fn sandboxed(root: &Path, current_version: impl Into<String>) -> Self {
        let config = UpgradeConfig::default();
        Self {
            paths: UpgradePaths::under(root, &config.binary_name),
            config,
            current_version: current_version.into(),
        }
    }

    /// Binary backup slot for the configured binary name.
    pub fn binary_backup_path(&self) -> PathBuf {
        self.paths.binary_backup(&self.config.binary_name)
    }
}
