//! Fetching and vetting release artifacts.
//!
//! A download is staged under `<data_dir>/downloads/` and must pass
//! [`DownloadStage::verify_download`] (presence, plausible size, naming
//! convention) and the configured [`ChecksumPolicy`] before anything is
//! installed from it. A staged file that fails any check is deleted.

use crate::core::UpgradeError;
use crate::upgrade::activity_log::ActivityLog;
use crate::upgrade::config::ChecksumPolicy;
use crate::upgrade::context::UpgradeContext;
use crate::upgrade::platform::Platform;
use crate::upgrade::release::{Release, ReleaseAsset, ReleaseSource};
use crate::upgrade::verification::ChecksumVerifier;
use crate::upgrade::version_check::normalize_version;
use crate::utils::fs::ensure_dir;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// A downloaded artifact waiting to be installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    /// Location in the download directory.
    pub path: PathBuf,
    /// Normalized version the artifact was fetched for.
    pub version: String,
    /// Bytes written.
    pub size: u64,
}

/// Download stage of the upgrade pipeline.
pub struct DownloadStage<'a, S: ReleaseSource> {
    source: &'a S,
    download_dir: PathBuf,
    binary_name: String,
    min_size: u64,
    checksum_policy: ChecksumPolicy,
    max_age: Duration,
    platform: Option<Platform>,
    log: ActivityLog,
}

impl<'a, S: ReleaseSource> DownloadStage<'a, S> {
    pub fn new(ctx: &UpgradeContext, source: &'a S) -> Self {
        Self {
            source,
            download_dir: ctx.paths.download_dir.clone(),
            binary_name: ctx.config.binary_name.clone(),
            min_size: ctx.config.min_artifact_size,
            checksum_policy: ctx.config.checksum_policy,
            max_age: Duration::from_secs(ctx.config.download_max_age_hours * 3600),
            platform: None,
            log: ActivityLog::new(ctx.paths.activity_log()),
        }
    }

    /// Fetch artifacts for `platform` instead of the running one.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    fn platform(&self) -> Result<Platform> {
        match &self.platform {
            Some(p) => Ok(p.clone()),
            None => Platform::current(),
        }
    }

    /// Expected artifact file name for `version` on the target platform.
    pub fn artifact_name(&self, version: &str) -> Result<String> {
        Ok(self.platform()?.artifact_name(&self.binary_name, version))
    }

    /// Download the artifact for `version` from the release tagged `v<version>`.
    pub async fn download(&self, version: &str) -> Result<StagedArtifact> {
        let tag = format!("v{}", normalize_version(version));
        let release = self.source.release(&tag).await?;
        self.download_release(&release).await.map(|(staged, _)| staged)
    }

    /// Download this platform's artifact from an already-fetched release.
    ///
    /// Returns the staged artifact and the asset it came from.
    pub async fn download_release(&self, release: &Release) -> Result<(StagedArtifact, ReleaseAsset)> {
        let version = normalize_version(&release.tag).to_string();
        let name = self.artifact_name(&version)?;
        let asset = release.asset(&name).cloned().ok_or_else(|| UpgradeError::AssetNotFound {
            name: name.clone(),
            tag: release.tag.clone(),
        })?;

        if let Err(e) = self.clean_downloads().await {
            warn!("Could not clean old downloads: {e:#}");
        }

        ensure_dir(&self.download_dir).await?;
        let path = self.download_dir.join(&name);
        info!("Downloading {} to {}", asset.url, path.display());

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| UpgradeError::io("create staging file", &path, &e))?;
        let written = match self.source.fetch_asset(&asset, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                discard(&path).await;
                self.log.record(&format!("Download of {name} failed: {e}")).await;
                return Err(e);
            }
        };
        drop(file);

        if written == 0 {
            discard(&path).await;
            self.log.record(&format!("Download of {name} was empty")).await;
            return Err(UpgradeError::EmptyArtifact.into());
        }

        self.log.append(&format!("Downloaded {name} ({written} bytes)")).await?;
        Ok((
            StagedArtifact {
                path,
                version,
                size: written,
            },
            asset,
        ))
    }

    /// Download, verify shape and size, then verify the checksum per policy.
    pub async fn fetch_verified(&self, release: &Release) -> Result<StagedArtifact> {
        let (staged, asset) = self.download_release(release).await?;
        self.verify_download(&staged.path, &staged.version).await?;
        self.verify_checksum(&staged, release, &asset).await?;
        Ok(staged)
    }

    /// Reject a staged file that is absent, implausibly small, or misnamed.
    ///
    /// A rejected file is deleted.
    pub async fn verify_download(&self, path: &Path, version: &str) -> Result<()> {
        let metadata = match fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => {
                return Err(UpgradeError::MissingArtifact {
                    path: path.display().to_string(),
                }
                .into());
            }
        };

        let result = self.check_artifact(path, metadata.len(), version);
        if let Err(e) = &result {
            warn!("Rejecting staged artifact {}: {}", path.display(), e);
            discard(path).await;
            self.log.record(&format!("Download verification failed: {e}")).await;
        }
        result
    }

    fn check_artifact(&self, path: &Path, size: u64, version: &str) -> Result<()> {
        if size < self.min_size {
            return Err(UpgradeError::ArtifactTooSmall {
                path: path.display().to_string(),
                size,
                minimum: self.min_size,
            }
            .into());
        }

        let version = normalize_version(version);
        let pattern = format!(
            r"^{}-{}-[A-Za-z0-9_]+-[A-Za-z0-9_]+\.tar\.gz$",
            regex::escape(&self.binary_name),
            regex::escape(version)
        );
        let shape = Regex::new(&pattern).context("Failed to build artifact name pattern")?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if !shape.is_match(&name) {
            return Err(UpgradeError::InvalidArtifactShape {
                name,
                expected: format!("{}-{}-<os>-<arch>.tar.gz", self.binary_name, version),
            }
            .into());
        }

        Ok(())
    }

    /// Check the staged artifact against the release's published digest.
    ///
    /// A mismatch is always fatal. A missing digest is fatal under
    /// [`ChecksumPolicy::Required`] and a warning under
    /// [`ChecksumPolicy::WarnOnMissing`]. The file is deleted on failure.
    pub async fn verify_checksum(
        &self,
        staged: &StagedArtifact,
        release: &Release,
        asset: &ReleaseAsset,
    ) -> Result<()> {
        if self.checksum_policy == ChecksumPolicy::Skip {
            debug!("Checksum verification skipped by configuration");
            return Ok(());
        }

        let result = match self.source.expected_checksum(release, asset).await {
            Ok(Some(expected)) => ChecksumVerifier::verify_checksum(&staged.path, &expected).await,
            Ok(None) if self.checksum_policy == ChecksumPolicy::WarnOnMissing => {
                warn!("No checksum published for {}; continuing unverified", asset.name);
                return Ok(());
            }
            Ok(None) => Err(UpgradeError::ChecksumUnavailable {
                name: asset.name.clone(),
            }
            .into()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.log.append(&format!("Checksum verified for {}", asset.name)).await?;
                Ok(())
            }
            Err(e) => {
                discard(&staged.path).await;
                self.log.record(&format!("Checksum verification failed: {e}")).await;
                Err(e)
            }
        }
    }

    /// Remove staged files older than the configured maximum age.
    ///
    /// Returns the removed paths.
    pub async fn clean_downloads(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let mut dir = match fs::read_dir(&self.download_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => {
                return Err(UpgradeError::io("list downloads", &self.download_dir, &e).into());
            }
        };

        let now = SystemTime::now();
        while let Some(entry) = dir.next_entry().await? {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age > self.max_age {
                let path = entry.path();
                fs::remove_file(&path)
                    .await
                    .map_err(|e| UpgradeError::io("remove old download", &path, &e))?;
                debug!("Removed stale download {}", path.display());
                removed.push(path);
            }
        }

        Ok(removed)
    }
}

/// Delete a staged artifact, ignoring a file that is already gone.
async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Deleted staged artifact {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete staged artifact {}: {}", path.display(), e),
    }
}
