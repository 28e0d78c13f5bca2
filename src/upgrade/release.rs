//! Release source abstraction and its GitHub implementation.
//!
//! The upgrade pipeline only needs four things from wherever releases are
//! published: the latest release, a release by tag, the bytes of an asset,
//! and (optionally) the published digest of an asset. [`ReleaseSource`]
//! captures exactly that, so the orchestrator and the download stage can be
//! driven by an in-memory fake in tests.

use crate::core::UpgradeError;
use crate::upgrade::context::UpgradeContext;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::progress::ProgressBar;
use anyhow::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Names of aggregate checksum files looked up when no `<asset>.sha256` exists.
pub const CHECKSUM_FILES: &[&str] = &["checksums.txt", "SHA256SUMS"];

/// A published release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Asset with exactly this file name.
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|a| a.name == name)
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub url: String,
}

/// Where releases come from.
pub trait ReleaseSource {
    /// Version of the running binary.
    fn current_version(&self) -> String;

    /// The most recent published release.
    fn latest_release(&self) -> impl Future<Output = Result<Release>> + Send;

    /// The release with tag `tag`.
    fn release(&self, tag: &str) -> impl Future<Output = Result<Release>> + Send;

    /// Stream `asset` into `dest`, returning the number of bytes written.
    fn fetch_asset(
        &self,
        asset: &ReleaseAsset,
        dest: &mut tokio::fs::File,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Published SHA-256 digest of `asset`, if the release carries one.
    fn expected_checksum(
        &self,
        release: &Release,
        asset: &ReleaseAsset,
    ) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Releases published on GitHub.
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    api_base: String,
    repo_owner: String,
    repo_name: String,
    current_version: String,
}

impl GitHubReleaseSource {
    /// Source for the repository named in the context's `[upgrade]` settings.
    pub fn new(ctx: &UpgradeContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(ctx.config.request_timeout_secs))
            .user_agent(format!("harvest-cli/{}", ctx.current_version))
            .build()
            .map_err(|e| UpgradeError::NetworkFailure {
                operation: "create HTTP client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_base: "https://api.github.com".to_string(),
            repo_owner: ctx.config.repo_owner.clone(),
            repo_name: ctx.config.repo_name.clone(),
            current_version: ctx.current_version.clone(),
        })
    }

    /// Point at a different API host (GitHub Enterprise, mirrors).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn releases_url(&self, suffix: &str) -> String {
        format!("{}/repos/{}/{}/releases/{suffix}", self.api_base, self.repo_owner, self.repo_name)
    }

    async fn get(&self, url: &str, operation: &str) -> Result<reqwest::Response> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| network_failure(operation, &e))?;

        if !response.status().is_success() {
            return Err(UpgradeError::NetworkFailure {
                operation: operation.to_string(),
                reason: format!("HTTP {}", response.status()),
            }
            .into());
        }

        Ok(response)
    }

    async fn fetch_release(&self, url: String, operation: &str) -> Result<Release> {
        let response = self.get(&url, operation).await?;
        response.json::<Release>().await.map_err(|e| network_failure(operation, &e).into())
    }

    async fn fetch_text(&self, url: &str, operation: &str) -> Result<String> {
        let response = self.get(url, operation).await?;
        response.text().await.map_err(|e| network_failure(operation, &e).into())
    }
}

impl ReleaseSource for GitHubReleaseSource {
    fn current_version(&self) -> String {
        self.current_version.clone()
    }

    async fn latest_release(&self) -> Result<Release> {
        self.fetch_release(self.releases_url("latest"), "fetch latest release").await
    }

    async fn release(&self, tag: &str) -> Result<Release> {
        self.fetch_release(self.releases_url(&format!("tags/{tag}")), "fetch release").await
    }

    async fn fetch_asset(&self, asset: &ReleaseAsset, dest: &mut tokio::fs::File) -> Result<u64> {
        let operation = format!("download {}", asset.name);
        let mut response = self.get(&asset.url, &operation).await?;

        let progress = ProgressBar::download(response.content_length());
        progress.set_prefix("Downloading");

        let mut written = 0u64;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    progress.finish_and_clear();
                    return Err(network_failure(&operation, &e).into());
                }
            };
            dest.write_all(&chunk).await.map_err(|e| UpgradeError::IoFailure {
                operation: "write download".to_string(),
                path: asset.name.clone(),
                reason: e.to_string(),
            })?;
            written += chunk.len() as u64;
            progress.inc(chunk.len() as u64);
        }
        dest.flush().await?;
        progress.finish_and_clear();

        Ok(written)
    }

    async fn expected_checksum(
        &self,
        release: &Release,
        asset: &ReleaseAsset,
    ) -> Result<Option<String>> {
        let candidates = std::iter::once(format!("{}.sha256", asset.name))
            .chain(CHECKSUM_FILES.iter().map(|s| (*s).to_string()));

        for candidate in candidates {
            let Some(checksum_asset) = release.asset(&candidate) else {
                continue;
            };
            let content = self.fetch_text(&checksum_asset.url, "fetch checksums").await?;
            match ChecksumVerifier::parse_checksum_file(&content, &asset.name) {
                Some(digest) => return Ok(Some(digest)),
                None => warn!("{} does not list {}", candidate, asset.name),
            }
        }

        Ok(None)
    }
}

fn network_failure(operation: &str, err: &reqwest::Error) -> UpgradeError {
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    UpgradeError::NetworkFailure {
        operation: operation.to_string(),
        reason,
    }
}
