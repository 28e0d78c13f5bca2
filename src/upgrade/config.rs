use serde::{Deserialize, Serialize};

/// How strictly a downloaded artifact is checked against a published SHA-256 digest.
///
/// A digest that is published and does not match is always fatal; the policy
/// only decides what happens when the release source publishes no digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecksumPolicy {
    /// A digest must be published; a missing one rejects the download.
    #[default]
    Required,
    /// Verify when published, warn and continue otherwise.
    WarnOnMissing,
    /// Never look up or verify a digest.
    Skip,
}

/// Settings for the `[upgrade]` table of `harvest.toml`.
///
/// Every field has a serde default, so a partial table (or none at all) is
/// valid.
///
/// # TOML Example
/// ```toml
/// [upgrade]
/// repo_owner = "harvest-cli"
/// repo_name = "harvest"
/// binary_name = "harvest"
/// tracked_files = ["config.json", "tasks.json"]
/// keep_backups = 5
/// min_artifact_size = 1048576
/// checksum_policy = "required"
/// smoke_test = false
/// request_timeout_secs = 30
/// manual_install = false
/// download_max_age_hours = 24
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Owner of the repository publishing releases.
    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    /// Repository publishing releases.
    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// File name of the executable, both inside release archives and on disk.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    /// Data files (relative to the data directory) mirrored into every snapshot.
    #[serde(default = "default_tracked_files")]
    pub tracked_files: Vec<String>,

    /// Number of snapshots kept after pruning.
    ///
    /// Read through [`UpgradeConfig::retained_backups`]: the snapshot taken by
    /// the running upgrade is always kept, so `0` behaves like `1`.
    #[serde(default = "default_keep_backups")]
    pub keep_backups: usize,

    /// Smallest plausible release artifact, in bytes.
    #[serde(default = "default_min_artifact_size")]
    pub min_artifact_size: u64,

    /// Checksum handling for downloaded artifacts.
    #[serde(default)]
    pub checksum_policy: ChecksumPolicy,

    /// Run `<binary> --version` after install and rollback.
    ///
    /// Off by default: verification then checks existence and the executable
    /// bit only.
    #[serde(default)]
    pub smoke_test: bool,

    /// Overall timeout for each request to the release source, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Stop after download and print manual install instructions instead of
    /// replacing the binary.
    #[serde(default)]
    pub manual_install: bool,

    /// Staged downloads older than this are removed before a new download.
    #[serde(default = "default_download_max_age_hours")]
    pub download_max_age_hours: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            binary_name: default_binary_name(),
            tracked_files: default_tracked_files(),
            keep_backups: default_keep_backups(),
            min_artifact_size: default_min_artifact_size(),
            checksum_policy: ChecksumPolicy::default(),
            smoke_test: false,
            request_timeout_secs: default_request_timeout_secs(),
            manual_install: false,
            download_max_age_hours: default_download_max_age_hours(),
        }
    }
}

impl UpgradeConfig {
    /// Snapshots to keep when pruning, never fewer than one.
    pub fn retained_backups(&self) -> usize {
        self.keep_backups.max(1)
    }
}

fn default_repo_owner() -> String {
    "harvest-cli".to_string()
}

fn default_repo_name() -> String {
    "harvest".to_string()
}

fn default_binary_name() -> String {
    "harvest".to_string()
}

fn default_tracked_files() -> Vec<String> {
    vec!["config.json".to_string(), "tasks.json".to_string()]
}

const fn default_keep_backups() -> usize {
    5
}

const fn default_min_artifact_size() -> u64 {
    1024 * 1024
}

const fn default_request_timeout_secs() -> u64 {
    30
}

const fn default_download_max_age_hours() -> u64 {
    24
}
