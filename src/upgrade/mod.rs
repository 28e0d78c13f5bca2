//! Self-upgrade with data backup and rollback.
//!
//! An upgrade never touches the installed binary until the user's data has
//! been snapshotted and the snapshot verified, and it never installs an
//! artifact that has not passed size, naming and checksum checks.
//!
//! # Pipeline
//!
//! ```text
//! 1. Version check        latest release vs. running version
//! 2. Confirmation         nothing is written before the user agrees
//! 3. Backup               snapshot tracked data files, verify, prune old snapshots
//! 4. Download             stage the platform artifact, verify size/name/checksum
//! 5. Install              extract, back up + replace binary, restore data, verify
//! 6. Rollback on failure  restore binary slot and latest snapshot
//! ```
//!
//! # On-disk layout
//!
//! Everything lives under the data directory (`~/.harvest/data` by default):
//!
//! ```text
//! data/
//! ├── config.json, tasks.json      tracked data files
//! ├── backup/
//! │   ├── backup_2025-01-15_10-30-00/
//! │   │   ├── config.json
//! │   │   ├── tasks.json
//! │   │   └── backup.json          snapshot metadata
//! │   ├── latest -> backup_...     (latest.txt where symlinks are unavailable)
//! │   ├── harvest.bak              single binary backup slot
//! │   └── rollback.log             activity log
//! ├── downloads/                   staged artifacts
//! └── install/                     scratch extraction directories
//! ```
//!
//! # Components
//!
//! - [`backup::BackupStore`]: snapshots of tracked data files
//! - [`release::ReleaseSource`]: where releases come from; [`release::GitHubReleaseSource`] in production
//! - [`download::DownloadStage`]: fetches and verifies the platform artifact
//! - [`install::InstallStage`]: unpacks and installs a verified artifact
//! - [`rollback::RollbackManager`]: restores the previous binary and data
//! - [`orchestrator::UpgradeOrchestrator`]: sequences all of the above
//!
//! Every component is built from an [`UpgradeContext`] that is created once
//! from the loaded configuration.

pub mod activity_log;
pub mod backup;
pub mod config;
pub mod context;
pub mod download;
pub mod install;
pub mod orchestrator;
pub mod platform;
pub mod release;
pub mod rollback;
pub mod verification;
pub mod version_check;

pub use backup::BackupStore;
pub use config::{ChecksumPolicy, UpgradeConfig};
pub use context::{UpgradeContext, UpgradePaths};
pub use download::{DownloadStage, StagedArtifact};
pub use install::InstallStage;
pub use orchestrator::{UpgradeOrchestrator, UpgradeOutcome};
pub use release::{GitHubReleaseSource, Release, ReleaseAsset, ReleaseSource};
pub use rollback::{RollbackInfo, RollbackManager, RollbackState};
pub use version_check::UpgradeInfo;
