//! Mapping from the running OS/architecture to release artifact names.

use crate::core::UpgradeError;
use anyhow::Result;
use std::fmt;

/// OS/architecture pair in release naming (`linux`/`amd64`, `darwin`/`arm64`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    /// Platform of the running process.
    pub fn current() -> Result<Self> {
        Self::from_runtime(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Map Rust's `std::env::consts` values to release naming.
    pub fn from_runtime(os: &str, arch: &str) -> Result<Self> {
        let mapped_os = match os {
            "linux" => Some("linux"),
            "macos" => Some("darwin"),
            "windows" => Some("windows"),
            _ => None,
        };
        let mapped_arch = match arch {
            "x86_64" => Some("amd64"),
            "aarch64" => Some("arm64"),
            "x86" => Some("386"),
            _ => None,
        };

        match (mapped_os, mapped_arch) {
            (Some(os), Some(arch)) => Ok(Self {
                os: os.to_string(),
                arch: arch.to_string(),
            }),
            _ => Err(UpgradeError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            }
            .into()),
        }
    }

    /// `<tool>-<version>-<os>-<arch>.tar.gz`, with any leading `v` stripped from `version`.
    pub fn artifact_name(&self, tool: &str, version: &str) -> String {
        let version = crate::upgrade::version_check::normalize_version(version);
        format!("{tool}-{version}-{}-{}.tar.gz", self.os, self.arch)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}
