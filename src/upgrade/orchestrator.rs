//! End-to-end upgrade sequencing.
//!
//! ```text
//! check ─┬─ up to date ──────────────────────────────────→ UpToDate
//!        └─ update ─ confirm ─┬─ declined ────────────────→ Cancelled
//!                             └─ backup → verify backup → prune
//!                                → download + verify artifact
//!                                ─┬─ manual install ─────→ ManualInstallRequired
//!                                 └─ install ─┬─ ok ──────→ Upgraded
//!                                             └─ failed ──→ rollback, error
//! ```
//!
//! Nothing is written before the user confirms. A failure to snapshot or
//! verify data aborts the upgrade before any download. Stale downloads and
//! old snapshots are cleaned up on a best-effort basis.

use crate::upgrade::activity_log::ActivityLog;
use crate::upgrade::backup::BackupStore;
use crate::upgrade::context::UpgradeContext;
use crate::upgrade::download::{DownloadStage, StagedArtifact};
use crate::upgrade::install::{InstallFailed, InstallStage};
use crate::upgrade::platform::Platform;
use crate::upgrade::release::{Release, ReleaseSource};
use crate::upgrade::rollback::RollbackManager;
use crate::upgrade::version_check::{UpgradeInfo, detect_native_install};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

/// How an upgrade run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The running version already matches the latest release.
    UpToDate { version: String },
    /// The user declined the confirmation prompt. Nothing was changed.
    Cancelled,
    /// Data was backed up and the artifact staged; installing it is left to the user.
    ManualInstallRequired {
        artifact: StagedArtifact,
        install_path: PathBuf,
    },
    /// The new binary is installed and verified.
    Upgraded {
        from: String,
        to: String,
        binary: PathBuf,
        rollback_available: bool,
    },
}

/// Drives the backup → download → install pipeline against a release source.
pub struct UpgradeOrchestrator<'a, S: ReleaseSource> {
    ctx: &'a UpgradeContext,
    source: &'a S,
    platform: Option<Platform>,
    log: ActivityLog,
}

impl<'a, S: ReleaseSource> UpgradeOrchestrator<'a, S> {
    pub fn new(ctx: &'a UpgradeContext, source: &'a S) -> Self {
        Self {
            ctx,
            source,
            platform: None,
            log: ActivityLog::new(ctx.paths.activity_log()),
        }
    }

    /// Resolve artifacts for `platform` instead of the running host.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Compare the running version with the latest release. Read-only.
    pub async fn get_upgrade_info(&self) -> Result<UpgradeInfo> {
        let (info, _) = self.check().await?;
        Ok(info)
    }

    async fn check(&self) -> Result<(UpgradeInfo, Release)> {
        let release = self
            .source
            .latest_release()
            .await
            .context("Failed to check for updates")?;
        let native = detect_native_install(&self.ctx.config.binary_name);
        let info = UpgradeInfo::compare(&self.source.current_version(), &release.tag, native);
        debug!(
            "Current {}, latest {} (update: {}, native: {})",
            info.current_version, info.latest_version, info.has_update, info.is_native_install
        );
        Ok((info, release))
    }

    /// Run the whole upgrade.
    ///
    /// `confirm` is called once, with the version comparison, only when an
    /// update is available. Returning `false` ends the run with
    /// [`UpgradeOutcome::Cancelled`] before anything touches the disk.
    pub async fn perform_upgrade<F>(&self, confirm: F) -> Result<UpgradeOutcome>
    where
        F: FnOnce(&UpgradeInfo) -> bool,
    {
        let (info, release) = self.check().await?;

        if !info.has_update {
            info!("Already on the latest version ({})", info.current_version);
            return Ok(UpgradeOutcome::UpToDate {
                version: info.current_version,
            });
        }
        if info.is_downgrade {
            warn!(
                "Latest release {} is older than the running version {}",
                info.latest_version, info.current_version
            );
        }

        if !confirm(&info) {
            info!("Upgrade cancelled by user");
            return Ok(UpgradeOutcome::Cancelled);
        }

        self.log
            .record(&format!(
                "Upgrade from {} to {} started",
                info.current_version, info.latest_version
            ))
            .await;

        self.backup_data().await?;

        let mut downloader = DownloadStage::new(self.ctx, self.source);
        if let Some(platform) = &self.platform {
            downloader = downloader.with_platform(platform.clone());
        }
        let artifact = downloader.fetch_verified(&release).await?;

        if self.ctx.config.manual_install {
            self.log
                .record(&format!("Manual install required: {}", artifact.path.display()))
                .await;
            return Ok(UpgradeOutcome::ManualInstallRequired {
                artifact,
                install_path: self.ctx.paths.install_path.clone(),
            });
        }

        let installer = InstallStage::new(self.ctx);
        match installer.install(&artifact.path, &artifact.version).await {
            Ok(binary) => {
                if let Err(e) = fs::remove_file(&artifact.path).await {
                    debug!("Could not remove {}: {}", artifact.path.display(), e);
                }
                let rollback_available = RollbackManager::new(self.ctx).is_rollback_available().await;
                self.log
                    .record(&format!("Upgrade to {} completed", info.latest_version))
                    .await;
                Ok(UpgradeOutcome::Upgraded {
                    from: info.current_version,
                    to: info.latest_version,
                    binary,
                    rollback_available,
                })
            }
            Err(e) => Err(self.recover(e).await),
        }
    }

    /// Snapshot, verify, then prune. Only pruning failures are tolerated.
    async fn backup_data(&self) -> Result<PathBuf> {
        let store = BackupStore::new(self.ctx);
        store
            .create_backup()
            .await
            .context("Could not back up data, upgrade aborted")?;
        let snapshot = store
            .verify_backup()
            .await
            .context("Backup verification failed, upgrade aborted")?;

        let keep = self.ctx.config.retained_backups();
        if keep != self.ctx.config.keep_backups {
            warn!(
                "keep_backups = {} would delete this upgrade's snapshot, keeping {}",
                self.ctx.config.keep_backups, keep
            );
        }
        match store.prune_old_backups(keep).await {
            Ok(pruned) if !pruned.is_empty() => debug!("Pruned {} snapshot(s)", pruned.len()),
            Ok(_) => {}
            Err(e) => warn!("Failed to prune old backups: {:#}", e),
        }

        Ok(snapshot)
    }

    /// Roll back after a failed install if the live binary was touched.
    async fn recover(&self, error: anyhow::Error) -> anyhow::Error {
        let binary_replaced = error
            .downcast_ref::<InstallFailed>()
            .is_some_and(|failure| failure.step.binary_replaced());
        if !binary_replaced {
            return error.context("Upgrade failed, the installed version was not changed");
        }

        let manager = RollbackManager::new(self.ctx);
        if !manager.is_rollback_available().await {
            self.log.record("Upgrade failed and no rollback is available").await;
            return error.context("Upgrade failed and no rollback is available");
        }

        warn!("Install failed, rolling back: {:#}", error);
        match manager.perform_rollback().await {
            Ok(_) => error.context("Upgrade failed, the previous version was restored"),
            Err(rollback_error) => error.context(format!(
                "Upgrade failed and rollback also failed: {rollback_error:#}"
            )),
        }
    }
}
