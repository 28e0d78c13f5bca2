//! Global configuration file handling.
//!
//! The file lives at `~/.harvest/harvest.toml` (or `%LOCALAPPDATA%\harvest\harvest.toml`
//! on Windows). `HARVEST_CONFIG_PATH` overrides the location, which keeps tests
//! isolated from the real home directory.

use crate::upgrade::config::UpgradeConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Contents of `harvest.toml`.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct GlobalConfig {
    /// Directory holding the tracked data files and the backup tree.
    ///
    /// Defaults to `~/.harvest`. A leading `~` is expanded.
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Where the native binary is installed.
    ///
    /// Defaults to `~/.local/bin/<binary_name>`. A leading `~` is expanded.
    #[serde(default)]
    pub install_path: Option<String>,

    /// Self-upgrade settings.
    #[serde(default)]
    pub upgrade: UpgradeConfig,
}

impl GlobalConfig {
    /// Load from the default location, falling back to defaults when absent.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_with_optional(Some(path)).await
    }

    /// Load from `path` when given, otherwise the default location.
    ///
    /// A path that does not exist yields [`GlobalConfig::default`].
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load and parse a specific file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    /// Location of the config file, honoring `HARVEST_CONFIG_PATH`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("HARVEST_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        Ok(Self::default_home()?.join("harvest.toml"))
    }

    /// `~/.harvest`, or the local data directory on Windows.
    pub fn default_home() -> Result<PathBuf> {
        let home = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("harvest")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".harvest")
        };
        Ok(home)
    }

    /// Resolved data directory.
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => expand_path(dir),
            None => Self::default_home(),
        }
    }

    /// Resolved install path of the native binary.
    pub fn resolved_install_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.install_path {
            return expand_path(path);
        }

        let mut file_name = self.upgrade.binary_name.clone();
        if cfg!(windows) {
            file_name.push_str(".exe");
        }

        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?;
        Ok(home.join(".local").join("bin").join(file_name))
    }
}

fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Failed to expand path '{raw}'"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upgrade::config::ChecksumPolicy;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_global_config_default() {
        let config = GlobalConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.upgrade.keep_backups, 5);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("harvest.toml");
        std::fs::write(
            &config_path,
            "data_dir = '/var/lib/harvest'\n\n[upgrade]\nchecksum_policy = 'skip'\n",
        )
        .unwrap();

        let loaded = GlobalConfig::load_from(&config_path).await.unwrap();
        assert_eq!(loaded.data_dir.as_deref(), Some("/var/lib/harvest"));
        assert!(loaded.install_path.is_none());
        assert_eq!(loaded.upgrade.checksum_policy, ChecksumPolicy::Skip);
        assert_eq!(loaded.upgrade.keep_backups, 5);
    }

    #[tokio::test]
    async fn test_missing_file_yields_default() {
        let temp = TempDir::new().unwrap();
        let config =
            GlobalConfig::load_with_optional(Some(temp.path().join("absent.toml"))).await.unwrap();
        assert_eq!(config, GlobalConfig::default());
    }

    #[tokio::test]
    async fn test_invalid_toml_is_error() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("harvest.toml");
        std::fs::write(&config_path, "data_dir = [unclosed").unwrap();

        let err = GlobalConfig::load_from(&config_path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse global config"));
    }

    #[test]
    fn test_resolved_paths_use_explicit_values() {
        let config = GlobalConfig {
            data_dir: Some("/data/harvest".to_string()),
            install_path: Some("/opt/bin/harvest".to_string()),
            upgrade: UpgradeConfig::default(),
        };
        assert_eq!(config.resolved_data_dir().unwrap(), PathBuf::from("/data/harvest"));
        assert_eq!(config.resolved_install_path().unwrap(), PathBuf::from("/opt/bin/harvest"));
    }

    #[test]
    fn test_default_install_path_uses_binary_name() {
        let config = GlobalConfig::default();
        let path = config.resolved_install_path().unwrap();
        assert!(path.ends_with(if cfg!(windows) { "bin/harvest.exe" } else { "bin/harvest" }));
    }
}
