//! Installing a verified artifact over the native binary.
//!
//! [`InstallStage::install`] runs extract → replace binary → restore data →
//! verify, stopping at the first failure, and always removes the scratch
//! extraction directory afterwards. Before the installed binary is
//! overwritten, the current one is copied to the single binary backup slot so
//! a failed or interrupted install can be rolled back.

use crate::core::UpgradeError;
use crate::upgrade::activity_log::ActivityLog;
use crate::upgrade::backup::BackupStore;
use crate::upgrade::context::UpgradeContext;
use crate::utils::fs::{copy_file, ensure_dir, is_executable, remove_dir_all, replace_executable};
use crate::utils::path_validation::{ensure_within_directory, resolve_archive_entry};
use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Time allowed for `<binary> --version` during verification.
pub const SMOKE_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Steps of [`InstallStage::install`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Extract,
    ReplaceBinary,
    RestoreData,
    Verify,
}

impl InstallStep {
    const fn activity(self) -> &'static str {
        match self {
            Self::Extract => "extracting the archive",
            Self::ReplaceBinary => "replacing the binary",
            Self::RestoreData => "restoring data",
            Self::Verify => "verifying the installation",
        }
    }

    /// Whether the live binary had already been overwritten when this step ran.
    ///
    /// A `ReplaceBinary` failure never leaves a new binary behind: the swap
    /// is an atomic rename of an already-executable copy and is the last
    /// fallible action of that step.
    pub const fn binary_replaced(self) -> bool {
        matches!(self, Self::RestoreData | Self::Verify)
    }
}

/// Context attached to every install error. Recover it with
/// `err.downcast_ref::<InstallFailed>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallFailed {
    pub step: InstallStep,
}

impl fmt::Display for InstallFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Install failed while {}", self.step.activity())
    }
}

/// Install stage of the upgrade pipeline.
pub struct InstallStage {
    work_dir: PathBuf,
    install_path: PathBuf,
    binary_backup: PathBuf,
    binary_name: String,
    smoke_test: bool,
    store: BackupStore,
    log: ActivityLog,
}

impl InstallStage {
    pub fn new(ctx: &UpgradeContext) -> Self {
        Self {
            work_dir: ctx.paths.work_dir.clone(),
            install_path: ctx.paths.install_path.clone(),
            binary_backup: ctx.binary_backup_path(),
            binary_name: ctx.config.binary_name.clone(),
            smoke_test: ctx.config.smoke_test,
            store: BackupStore::new(ctx),
            log: ActivityLog::new(ctx.paths.activity_log()),
        }
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// Single-slot copy of the previously installed binary.
    pub fn binary_backup_path(&self) -> &Path {
        &self.binary_backup
    }

    /// File name the executable has inside archives and on disk.
    pub fn binary_file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.exe", self.binary_name)
        } else {
            self.binary_name.clone()
        }
    }

    /// Install `archive` as version `version`.
    ///
    /// Returns the installed binary path. The first failing step aborts the
    /// sequence and its error is returned unchanged apart from stage context.
    pub async fn install(&self, archive: &Path, version: &str) -> Result<PathBuf> {
        info!("Installing version {} from {}", version, archive.display());
        self.log.append(&format!("Install of version {version} started")).await?;

        let scratch = match self.extract(archive).await {
            Ok(dir) => dir,
            Err(e) => {
                self.log.record(&format!("Install failed during extract: {e}")).await;
                return Err(e).context(InstallFailed {
                    step: InstallStep::Extract,
                });
            }
        };

        let result = self.install_from(&scratch).await;
        self.cleanup(&scratch).await;

        match result {
            Ok(path) => {
                self.log.append(&format!("Install of version {version} completed")).await?;
                Ok(path)
            }
            Err((step, e)) => {
                self.log.record(&format!("Install failed during {}: {e}", step.activity())).await;
                Err(e).context(InstallFailed {
                    step,
                })
            }
        }
    }

    async fn install_from(&self, scratch: &Path) -> std::result::Result<PathBuf, (InstallStep, anyhow::Error)> {
        let installed =
            self.replace_binary(scratch).await.map_err(|e| (InstallStep::ReplaceBinary, e))?;
        self.restore_data().await.map_err(|e| (InstallStep::RestoreData, e))?;
        self.verify_installation().await.map_err(|e| (InstallStep::Verify, e))?;
        Ok(installed)
    }

    /// Unpack a `.tar.gz` into a fresh scratch directory under the work dir.
    ///
    /// Every entry is checked before anything is written for it: an entry that
    /// would land outside the scratch directory fails with
    /// [`UpgradeError::PathTraversal`]. Only regular files and directories are
    /// materialized. On failure the scratch directory is removed.
    pub async fn extract(&self, archive: &Path) -> Result<PathBuf> {
        let scratch = self.work_dir.join(format!("extract-{}", uuid::Uuid::new_v4()));
        ensure_dir(&scratch).await?;

        let archive_path = archive.to_path_buf();
        let dest = scratch.clone();
        let outcome = tokio::task::spawn_blocking(move || unpack_archive(&archive_path, &dest))
            .await
            .context("Extraction task panicked");

        match outcome {
            Ok(Ok(count)) => {
                debug!("Extracted {} entries into {}", count, scratch.display());
                self.log.append(&format!("Extracted archive to {}", scratch.display())).await?;
                Ok(scratch)
            }
            Ok(Err(e)) | Err(e) => {
                self.cleanup(&scratch).await;
                Err(e)
            }
        }
    }

    /// Locate the new binary under `extracted_dir` and install it.
    ///
    /// The current binary, if any, is first copied into the backup slot,
    /// replacing whatever was there. With no current binary the slot is
    /// emptied, so a later rollback cannot restore an unrelated old binary.
    pub async fn replace_binary(&self, extracted_dir: &Path) -> Result<PathBuf> {
        let new_binary = self.find_binary(extracted_dir).await?;
        debug!("Found new binary at {}", new_binary.display());

        if fs::try_exists(&self.install_path).await.unwrap_or(false) {
            copy_file(&self.install_path, &self.binary_backup).await?;
            info!("Saved current binary to {}", self.binary_backup.display());
            self.log
                .append(&format!("Binary backup saved: {}", self.binary_backup.display()))
                .await?;
        } else {
            debug!("No binary at {}, nothing to back up", self.install_path.display());
            self.discard_stale_backup().await?;
        }

        replace_executable(&new_binary, &self.install_path).await?;

        self.log
            .record(&format!("Installed new binary at {}", self.install_path.display()))
            .await;
        Ok(self.install_path.clone())
    }

    async fn discard_stale_backup(&self) -> Result<()> {
        match fs::remove_file(&self.binary_backup).await {
            Ok(()) => {
                info!("Removed stale binary backup {}", self.binary_backup.display());
                self.log
                    .append(&format!("Stale binary backup removed: {}", self.binary_backup.display()))
                    .await
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpgradeError::io("remove stale binary backup", &self.binary_backup, &e).into()),
        }
    }

    async fn find_binary(&self, extracted_dir: &Path) -> Result<PathBuf> {
        let file_name = self.binary_file_name();

        let top_level = extracted_dir.join(&file_name);
        if fs::metadata(&top_level).await.map(|m| m.is_file()).unwrap_or(false) {
            return Ok(top_level);
        }

        let root = extracted_dir.to_path_buf();
        let wanted = file_name.clone();
        let nested = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(std::result::Result::ok)
                .find(|entry| entry.file_type().is_file() && entry.file_name() == wanted.as_str())
                .map(walkdir::DirEntry::into_path)
        })
        .await
        .context("Binary search task panicked")?;

        nested.ok_or_else(|| {
            UpgradeError::BinaryNotFound {
                name: file_name,
            }
            .into()
        })
    }

    /// Restore data from the latest snapshot. No snapshot is not an error.
    pub async fn restore_data(&self) -> Result<()> {
        match self.store.restore_backup().await {
            Ok(files) => {
                debug!("Restored {} data file(s)", files.len());
                Ok(())
            }
            Err(e) if e.downcast_ref::<UpgradeError>() == Some(&UpgradeError::MissingBackup) => {
                info!("No data backup found, skipping data restore");
                self.log.append("No data backup to restore, skipped").await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Check the installed binary exists, is executable and (if enabled) runs.
    pub async fn verify_installation(&self) -> Result<()> {
        verify_binary(&self.install_path, self.smoke_test).await?;
        self.log.append("Installation verified").await?;
        Ok(())
    }

    /// Remove a scratch directory, and the work dir once it is empty.
    pub async fn cleanup(&self, scratch: &Path) {
        if let Err(e) = remove_dir_all(scratch).await {
            warn!("Failed to clean up {}: {:#}", scratch.display(), e);
        }

        if let Ok(mut entries) = fs::read_dir(&self.work_dir).await {
            if let Ok(None) = entries.next_entry().await {
                let _ = fs::remove_dir(&self.work_dir).await;
            }
        }
    }
}

/// Check that `path` is an executable regular file.
///
/// With `smoke_test`, also run `<path> --version` and require success within
/// [`SMOKE_TEST_TIMEOUT`].
pub async fn verify_binary(path: &Path, smoke_test: bool) -> Result<()> {
    let failed = |reason: &str| -> anyhow::Error {
        UpgradeError::VerificationFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    if !fs::try_exists(path).await.unwrap_or(false) {
        return Err(failed("binary does not exist"));
    }
    if !is_executable(path).await {
        return Err(failed("binary is not executable"));
    }
    if !smoke_test {
        return Ok(());
    }

    let mut command = tokio::process::Command::new(path);
    command.arg("--version").kill_on_drop(true);
    let output = match tokio::time::timeout(SMOKE_TEST_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(failed(&format!("could not run binary: {e}"))),
        Err(_) => return Err(failed("--version timed out")),
    };

    if !output.status.success() {
        return Err(failed(&format!("--version exited with {}", output.status)));
    }

    debug!(
        "Smoke test passed: {}",
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}

fn unpack_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let corrupt = |e: std::io::Error| -> anyhow::Error {
        UpgradeError::ArchiveCorrupt {
            reason: e.to_string(),
        }
        .into()
    };

    let file = std::fs::File::open(archive).map_err(|e| UpgradeError::io("open archive", archive, &e))?;
    let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));

    let mut count = 0;
    for entry in tarball.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let entry_path = entry.path().map_err(corrupt)?.into_owned();
        let target = resolve_archive_entry(dest, &entry_path)?;
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| UpgradeError::io("create directory", &target, &e))?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| UpgradeError::io("create directory", parent, &e))?;
            }
            // Catches parents that resolve elsewhere through a pre-existing link.
            if !ensure_within_directory(&target, dest) {
                return Err(UpgradeError::PathTraversal {
                    entry: entry_path.display().to_string(),
                }
                .into());
            }
            entry.unpack(&target).map_err(corrupt)?;
        } else {
            debug!("Skipping non-regular entry {}", entry_path.display());
            continue;
        }
        count += 1;
    }

    Ok(count)
}
