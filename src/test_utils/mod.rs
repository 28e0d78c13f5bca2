//! Test utilities for harvest-cli
//!
//! Helpers shared by unit tests and the integration suite:
//!
//! - [`StaticReleaseSource`], an in-memory [`ReleaseSource`] with scripted releases
//! - [`ArchiveBuilder`] for writing `.tar.gz` release artifacts, including hostile ones
//! - [`fake_binary`] for executables that answer `--version`
//! - [`sandbox_context`] for an [`UpgradeContext`] rooted in a temporary directory
//!
//! Enabled for `cfg(test)` and by the `test-utils` feature.

use crate::core::UpgradeError;
use crate::upgrade::context::UpgradeContext;
use crate::upgrade::platform::Platform;
use crate::upgrade::release::{Release, ReleaseAsset, ReleaseSource};
use crate::upgrade::verification::ChecksumVerifier;
use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Once;
use tokio::io::AsyncWriteExt;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`. With neither, logging stays off.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(true)
            .try_init();
    });
}

/// An [`UpgradeContext`] rooted at `root`, with the data directory created.
pub fn sandbox_context(root: &Path, current_version: &str) -> UpgradeContext {
    let ctx = UpgradeContext::sandboxed(root, current_version);
    std::fs::create_dir_all(&ctx.paths.data_dir).expect("create sandbox data dir");
    ctx
}

/// The platform used by tests that need a stable artifact name.
pub fn linux_amd64() -> Platform {
    Platform::from_runtime("linux", "x86_64").expect("linux/x86_64 is supported")
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// In-memory release source.
///
/// Releases are served in insertion order; the last one added is "latest".
/// Asset bytes live under synthetic `memory://` URLs.
#[derive(Debug, Clone, Default)]
pub struct StaticReleaseSource {
    current_version: String,
    releases: Vec<Release>,
    payloads: HashMap<String, Vec<u8>>,
    checksum_overrides: HashMap<String, String>,
    fail_downloads: bool,
}

impl StaticReleaseSource {
    pub fn new(current_version: &str) -> Self {
        Self {
            current_version: current_version.to_string(),
            ..Self::default()
        }
    }

    /// Publish a release with the given `(name, bytes)` assets.
    ///
    /// With `publish_checksums`, every asset gets a companion `<name>.sha256`.
    #[must_use]
    pub fn with_release(mut self, tag: &str, files: Vec<(String, Vec<u8>)>, publish_checksums: bool) -> Self {
        let mut assets = Vec::new();
        for (name, bytes) in files {
            if publish_checksums {
                let sidecar = format!("{name}.sha256");
                let line = format!("{}  {}\n", sha256_hex(&bytes), name);
                assets.push(self.add_payload(tag, &sidecar, line.into_bytes()));
            }
            assets.push(self.add_payload(tag, &name, bytes));
        }

        self.releases.push(Release {
            tag: tag.to_string(),
            assets,
        });
        self
    }

    /// Make every asset download fail with a transport error.
    #[must_use]
    pub fn failing_downloads(mut self) -> Self {
        self.fail_downloads = true;
        self
    }

    /// Report `digest` as the published checksum of `name`.
    #[must_use]
    pub fn with_checksum_override(mut self, name: &str, digest: &str) -> Self {
        self.checksum_overrides.insert(name.to_string(), digest.to_string());
        self
    }

    fn add_payload(&mut self, tag: &str, name: &str, bytes: Vec<u8>) -> ReleaseAsset {
        let url = format!("memory://{tag}/{name}");
        self.payloads.insert(url.clone(), bytes);
        ReleaseAsset {
            name: name.to_string(),
            url,
        }
    }
}

fn not_found(operation: &str) -> anyhow::Error {
    UpgradeError::NetworkFailure {
        operation: operation.to_string(),
        reason: "HTTP 404 Not Found".to_string(),
    }
    .into()
}

impl ReleaseSource for StaticReleaseSource {
    fn current_version(&self) -> String {
        self.current_version.clone()
    }

    async fn latest_release(&self) -> Result<Release> {
        self.releases.last().cloned().ok_or_else(|| not_found("fetch latest release"))
    }

    async fn release(&self, tag: &str) -> Result<Release> {
        self.releases
            .iter()
            .find(|r| r.tag == tag)
            .cloned()
            .ok_or_else(|| not_found("fetch release"))
    }

    async fn fetch_asset(&self, asset: &ReleaseAsset, dest: &mut tokio::fs::File) -> Result<u64> {
        let operation = format!("download {}", asset.name);
        if self.fail_downloads {
            return Err(UpgradeError::NetworkFailure {
                operation,
                reason: "connection reset by peer".to_string(),
            }
            .into());
        }

        let bytes = self.payloads.get(&asset.url).ok_or_else(|| not_found(&operation))?;
        dest.write_all(bytes).await?;
        dest.flush().await?;
        Ok(bytes.len() as u64)
    }

    async fn expected_checksum(&self, release: &Release, asset: &ReleaseAsset) -> Result<Option<String>> {
        if let Some(digest) = self.checksum_overrides.get(&asset.name) {
            return Ok(Some(digest.clone()));
        }

        let Some(sidecar) = release.asset(&format!("{}.sha256", asset.name)) else {
            return Ok(None);
        };
        let content = self
            .payloads
            .get(&sidecar.url)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        Ok(ChecksumVerifier::parse_checksum_file(&content, &asset.name))
    }
}

enum EntryKind {
    Regular,
    Raw,
    Symlink(String),
    HardLink(String),
}

struct ArchiveEntry {
    path: String,
    data: Vec<u8>,
    mode: u32,
    kind: EntryKind,
}

/// Builds gzip-compressed tar archives.
#[derive(Default)]
pub struct ArchiveBuilder {
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regular file with mode 0644.
    #[must_use]
    pub fn file(self, path: &str, data: &[u8]) -> Self {
        self.push(path, data, 0o644, EntryKind::Regular)
    }

    /// Regular file with mode 0755.
    #[must_use]
    pub fn executable(self, path: &str, data: &[u8]) -> Self {
        self.push(path, data, 0o755, EntryKind::Regular)
    }

    /// Entry whose name is written into the header verbatim, bypassing the
    /// path checks `tar::Builder` applies. Used for `../` traversal entries.
    #[must_use]
    pub fn raw_entry(self, path: &str, data: &[u8]) -> Self {
        self.push(path, data, 0o644, EntryKind::Raw)
    }

    /// Symbolic link at `path` pointing to `target`.
    #[must_use]
    pub fn symlink(self, path: &str, target: &str) -> Self {
        self.push(path, &[], 0o777, EntryKind::Symlink(target.to_string()))
    }

    /// Hard link at `path` to `target`.
    #[must_use]
    pub fn hard_link(self, path: &str, target: &str) -> Self {
        self.push(path, &[], 0o644, EntryKind::HardLink(target.to_string()))
    }

    fn push(mut self, path: &str, data: &[u8], mode: u32, kind: EntryKind) -> Self {
        self.entries.push(ArchiveEntry {
            path: path.to_string(),
            data: data.to_vec(),
            mode,
            kind,
        });
        self
    }

    /// Write the archive to `dest`. Panics on I/O errors.
    pub fn write_to(&self, dest: &Path) {
        let file = std::fs::File::create(dest).expect("create archive");
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

        for entry in &self.entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(entry.data.len() as u64);
            header.set_mode(entry.mode);
            header.set_mtime(0);
            header.set_entry_type(tar::EntryType::Regular);

            match &entry.kind {
                EntryKind::Regular => builder
                    .append_data(&mut header, &entry.path, entry.data.as_slice())
                    .expect("append entry"),
                EntryKind::Raw => {
                    let gnu = header.as_gnu_mut().expect("gnu header");
                    let name = entry.path.as_bytes();
                    gnu.name[..name.len()].copy_from_slice(name);
                    header.set_cksum();
                    builder.append(&header, entry.data.as_slice()).expect("append raw entry");
                }
                EntryKind::Symlink(target) => {
                    header.set_entry_type(tar::EntryType::Symlink);
                    builder
                        .append_link(&mut header, &entry.path, target)
                        .expect("append symlink");
                }
                EntryKind::HardLink(target) => {
                    header.set_entry_type(tar::EntryType::Link);
                    builder
                        .append_link(&mut header, &entry.path, target)
                        .expect("append hard link");
                }
            }
        }

        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip");
    }
}

/// Write a shell script at `path` that runs `body`, mode 0755.
pub fn fake_binary(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create binary parent");
    }
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write fake binary");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake binary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_source_publishes_checksums() {
        let source = StaticReleaseSource::new("1.0.0").with_release(
            "v1.0.1",
            vec![("a.tar.gz".to_string(), b"payload".to_vec())],
            true,
        );

        let release = source.latest_release().await.unwrap();
        assert_eq!(release.assets.len(), 2);
        let asset = release.asset("a.tar.gz").unwrap().clone();
        let digest = source.expected_checksum(&release, &asset).await.unwrap();
        assert_eq!(digest, Some(sha256_hex(b"payload")));

        assert!(source.release("v9.9.9").await.is_err());
    }

    #[test]
    fn test_archive_builder_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.tar.gz");
        ArchiveBuilder::new()
            .file("docs/readme.txt", b"hi")
            .raw_entry("../escape", b"x")
            .write_to(&path);

        let file = std::fs::File::open(&path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["docs/readme.txt", "../escape"]);
    }
}
