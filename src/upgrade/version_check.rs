//! Version comparison and installation detection.
//!
//! Update availability is decided by plain string inequality after stripping
//! a leading `v`: any difference counts as an update, including a release
//! that is older than the running binary. Such downgrades are flagged on
//! [`UpgradeInfo::is_downgrade`] (using semver when both sides parse) so the
//! CLI can warn, but they are not filtered out.

use std::ffi::OsStr;
use std::path::Path;
use tracing::debug;

/// Per-invocation comparison of the running and latest versions. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeInfo {
    /// Running version, normalized.
    pub current_version: String,
    /// Latest published version, normalized.
    pub latest_version: String,
    /// Tag of the latest release as published (e.g. `v1.0.1`).
    pub latest_tag: String,
    /// Whether the versions differ.
    pub has_update: bool,
    /// Whether the "update" is semantically older than the running version.
    pub is_downgrade: bool,
    /// Whether the binary on `PATH` is a regular executable file.
    pub is_native_install: bool,
}

impl UpgradeInfo {
    /// Compare `current` against the release tagged `latest_tag`.
    pub fn compare(current: &str, latest_tag: &str, is_native_install: bool) -> Self {
        Self {
            current_version: normalize_version(current).to_string(),
            latest_version: normalize_version(latest_tag).to_string(),
            latest_tag: latest_tag.to_string(),
            has_update: has_update(current, latest_tag),
            is_downgrade: is_downgrade(current, latest_tag),
            is_native_install,
        }
    }

    /// Two-line human summary.
    pub fn format_version_info(&self) -> String {
        if self.has_update {
            format!(
                "Current version: {}\nLatest version:  {} (update available)",
                display_version(&self.current_version),
                self.latest_version
            )
        } else {
            format!("Current version: {} (up to date)", display_version(&self.current_version))
        }
    }
}

fn display_version(version: &str) -> &str {
    if version.is_empty() { "unknown" } else { version }
}

/// Strip surrounding whitespace and one leading `v` or `V`.
pub fn normalize_version(version: &str) -> &str {
    let trimmed = version.trim();
    trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed)
}

/// Whether `latest` should be offered over `current`.
///
/// An empty or `unknown` current version always has an update.
pub fn has_update(current: &str, latest: &str) -> bool {
    let current = normalize_version(current);
    if current.is_empty() || current.eq_ignore_ascii_case("unknown") {
        return true;
    }
    current != normalize_version(latest)
}

/// Whether `latest` is a lower semantic version than `current`.
///
/// False when either side is not valid semver.
pub fn is_downgrade(current: &str, latest: &str) -> bool {
    match (
        semver::Version::parse(normalize_version(current)),
        semver::Version::parse(normalize_version(latest)),
    ) {
        (Ok(current), Ok(latest)) => latest < current,
        _ => false,
    }
}

/// Whether `binary_name` resolves on `PATH` to a regular executable file.
pub fn detect_native_install(binary_name: &str) -> bool {
    let Some(search_path) = std::env::var_os("PATH") else {
        debug!("PATH is not set, {} is not a native install", binary_name);
        return false;
    };
    match std::env::current_dir() {
        Ok(cwd) => detect_native_install_in(binary_name, &search_path, &cwd),
        Err(e) => {
            debug!("Cannot resolve the working directory: {}", e);
            false
        }
    }
}

/// [`detect_native_install`] against an explicit search path.
pub fn detect_native_install_in(binary_name: &str, search_path: &OsStr, cwd: &Path) -> bool {
    match which::which_in(binary_name, Some(search_path), cwd) {
        Ok(path) => is_regular_executable(&path),
        Err(e) => {
            debug!("{} not found on PATH: {}", binary_name, e);
            false
        }
    }
}

fn is_regular_executable(path: &Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
