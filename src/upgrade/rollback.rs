//! Restoring the previous binary and data after a failed upgrade.
//!
//! A rollback attempt is a small state machine:
//!
//! ```text
//! NotStarted → BinaryRestoring → DataRestoring → Verifying → Completed
//!                    │                 │              │
//!                    └─────────────────┴──────────────┴──→ Failed
//! ```
//!
//! Every transition and every failure is appended to the activity log,
//! whether or not the attempt succeeds, so a failed upgrade can be
//! reconstructed after the process has exited.

use crate::core::UpgradeError;
use crate::upgrade::activity_log::ActivityLog;
use crate::upgrade::backup::{BackupStore, parse_snapshot_name, read_metadata};
use crate::upgrade::context::UpgradeContext;
use crate::upgrade::install::verify_binary;
use crate::utils::fs::{get_directory_size, replace_executable};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

/// Where a rollback attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    NotStarted,
    BinaryRestoring,
    DataRestoring,
    Verifying,
    Completed,
    Failed,
}

impl RollbackState {
    /// Whether the attempt has ended.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    const fn activity(self) -> &'static str {
        match self {
            Self::NotStarted => "starting",
            Self::BinaryRestoring => "restoring the binary",
            Self::DataRestoring => "restoring data",
            Self::Verifying => "verifying the rollback",
            Self::Completed | Self::Failed => "finishing",
        }
    }
}

impl fmt::Display for RollbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::BinaryRestoring => "binary-restoring",
            Self::DataRestoring => "data-restoring",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One rollback attempt and the states it passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackAttempt {
    state: RollbackState,
    history: Vec<RollbackState>,
}

impl Default for RollbackAttempt {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackAttempt {
    pub fn new() -> Self {
        Self {
            state: RollbackState::NotStarted,
            history: vec![RollbackState::NotStarted],
        }
    }

    pub fn state(&self) -> RollbackState {
        self.state
    }

    /// Every state entered, in order, starting with `NotStarted`.
    pub fn history(&self) -> &[RollbackState] {
        &self.history
    }

    fn advance(&mut self, next: RollbackState) -> RollbackState {
        let previous = self.state;
        self.state = next;
        self.history.push(next);
        previous
    }
}

/// Details about the binary backup slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryBackupInfo {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Local>>,
}

/// Details about the latest data snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBackupInfo {
    pub path: PathBuf,
    pub created: Option<DateTime<Local>>,
    pub size: u64,
}

/// What a rollback would restore right now. Missing parts are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackInfo {
    pub available: bool,
    pub binary_backup: Option<BinaryBackupInfo>,
    pub data_backup: Option<DataBackupInfo>,
    pub snapshot_count: usize,
}

impl RollbackInfo {
    /// Human-readable reasons a rollback is unavailable.
    pub fn missing_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.binary_backup.is_none() {
            reasons.push("no binary backup (created when an upgrade installs a new binary)".to_string());
        }
        if self.data_backup.is_none() {
            reasons.push("no data snapshot (created at the start of every upgrade)".to_string());
        }
        reasons
    }
}

/// Restores the previous binary and data snapshot.
pub struct RollbackManager {
    store: BackupStore,
    data_dir: PathBuf,
    install_path: PathBuf,
    binary_backup: PathBuf,
    tracked_files: Vec<String>,
    smoke_test: bool,
    log: ActivityLog,
}

impl RollbackManager {
    pub fn new(ctx: &UpgradeContext) -> Self {
        Self {
            store: BackupStore::new(ctx),
            data_dir: ctx.paths.data_dir.clone(),
            install_path: ctx.paths.install_path.clone(),
            binary_backup: ctx.binary_backup_path(),
            tracked_files: ctx.config.tracked_files.clone(),
            smoke_test: ctx.config.smoke_test,
            log: ActivityLog::new(ctx.paths.activity_log()),
        }
    }

    pub fn binary_backup_path(&self) -> &Path {
        &self.binary_backup
    }

    /// True iff the binary backup slot is filled and a data snapshot exists.
    pub async fn is_rollback_available(&self) -> bool {
        let has_binary = fs::metadata(&self.binary_backup).await.map(|m| m.is_file()).unwrap_or(false);
        has_binary && self.store.get_latest_backup_path().await.is_ok()
    }

    /// The verification failure of the installed binary, if it is broken.
    pub async fn detect_installation_failure(&self) -> Option<UpgradeError> {
        match verify_binary(&self.install_path, self.smoke_test).await {
            Ok(()) => None,
            Err(e) => {
                let failure = e.downcast_ref::<UpgradeError>().cloned().unwrap_or_else(|| {
                    UpgradeError::VerificationFailed {
                        path: self.install_path.display().to_string(),
                        reason: format!("{e:#}"),
                    }
                });
                warn!("Installation check failed: {}", failure);
                self.log.record(&format!("Installation failure detected: {failure}")).await;
                Some(failure)
            }
        }
    }

    /// Run a full rollback and return the finished attempt.
    pub async fn perform_rollback(&self) -> Result<RollbackAttempt> {
        let mut attempt = RollbackAttempt::new();
        self.run(&mut attempt).await?;
        Ok(attempt)
    }

    /// Drive `attempt` to `Completed`, or to `Failed` on the first error.
    pub async fn run(&self, attempt: &mut RollbackAttempt) -> Result<()> {
        info!("Starting rollback");

        self.enter(attempt, RollbackState::BinaryRestoring).await;
        if let Err(e) = self.restore_binary().await {
            return self.fail(attempt, e).await;
        }

        self.enter(attempt, RollbackState::DataRestoring).await;
        if let Err(e) = self.restore_data().await {
            return self.fail(attempt, e).await;
        }

        self.enter(attempt, RollbackState::Verifying).await;
        if let Err(e) = self.verify_rollback().await {
            return self.fail(attempt, e).await;
        }

        self.enter(attempt, RollbackState::Completed).await;
        info!("Rollback completed");
        Ok(())
    }

    async fn enter(&self, attempt: &mut RollbackAttempt, next: RollbackState) {
        let previous = attempt.advance(next);
        self.log.record(&format!("Rollback state: {previous} -> {next}")).await;
    }

    async fn fail(&self, attempt: &mut RollbackAttempt, error: anyhow::Error) -> Result<()> {
        let during = attempt.state();
        warn!("Rollback failed while {}: {:#}", during.activity(), error);
        self.log.record(&format!("Rollback failed while {}: {error}", during.activity())).await;
        self.enter(attempt, RollbackState::Failed).await;
        Err(error).with_context(|| format!("Rollback failed while {}", during.activity()))
    }

    /// Copy the binary backup over the installed binary.
    pub async fn restore_binary(&self) -> Result<()> {
        if !fs::try_exists(&self.binary_backup).await.unwrap_or(false) {
            return Err(UpgradeError::NoBinaryBackup.into());
        }

        replace_executable(&self.binary_backup, &self.install_path).await?;
        self.log
            .record(&format!("Binary restored from {}", self.binary_backup.display()))
            .await;
        Ok(())
    }

    /// Restore tracked data files from the latest snapshot.
    pub async fn restore_data(&self) -> Result<()> {
        match self.store.restore_backup().await {
            Ok(_) => Ok(()),
            Err(e) if e.downcast_ref::<UpgradeError>() == Some(&UpgradeError::MissingBackup) => {
                Err(UpgradeError::NoDataBackup.into())
            }
            Err(e) => Err(e),
        }
    }

    /// Check the restored binary and that every tracked data file is present.
    pub async fn verify_rollback(&self) -> Result<()> {
        verify_binary(&self.install_path, self.smoke_test).await?;

        for name in &self.tracked_files {
            let path = self.data_dir.join(name);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return Err(UpgradeError::VerificationFailed {
                    path: path.display().to_string(),
                    reason: "data file missing after rollback".to_string(),
                }
                .into());
            }
        }

        self.log.record("Rollback verified").await;
        Ok(())
    }

    /// Describe what a rollback would restore. Never fails.
    pub async fn get_rollback_info(&self) -> RollbackInfo {
        let binary_backup = match fs::metadata(&self.binary_backup).await {
            Ok(metadata) if metadata.is_file() => Some(BinaryBackupInfo {
                path: self.binary_backup.clone(),
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Local>::from),
            }),
            _ => None,
        };

        let data_backup = match self.store.get_latest_backup_path().await {
            Ok(path) => {
                let created = match read_metadata(&path).await {
                    Ok(metadata) => Some(metadata.timestamp),
                    Err(_) => path
                        .file_name()
                        .and_then(|n| parse_snapshot_name(&n.to_string_lossy()))
                        .and_then(|naive| Local.from_local_datetime(&naive).single()),
                };
                let size = get_directory_size(&path).await.unwrap_or(0);
                Some(DataBackupInfo {
                    path,
                    created,
                    size,
                })
            }
            Err(_) => None,
        };

        let snapshot_count = self.store.list_backups().await.map(|s| s.len()).unwrap_or(0);

        RollbackInfo {
            available: binary_backup.is_some() && data_backup.is_some(),
            binary_backup,
            data_backup,
            snapshot_count,
        }
    }

    /// Contents of the activity log.
    pub async fn read_log(&self) -> Result<String> {
        self.log.read().await
    }

    /// Delete the activity log.
    pub async fn clear_log(&self) -> Result<()> {
        self.log.clear().await?;
        info!("Cleared {}", self.log.path().display());
        Ok(())
    }
}
