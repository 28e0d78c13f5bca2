use crate::core::UpgradeError;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// SHA-256 verification of downloaded artifacts.
///
/// Digests are lowercase hex. Expected values may carry a `sha256:` prefix
/// and any letter case.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Hex SHA-256 of a file, read in 64 KiB chunks.
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let mut file = File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Compare a file's digest with `expected`.
    ///
    /// Fails with [`UpgradeError::ChecksumMismatch`] when they differ.
    pub async fn verify_checksum(file_path: &Path, expected_checksum: &str) -> Result<()> {
        info!("Verifying checksum for: {}", file_path.display());

        let actual = Self::compute_sha256(file_path).await?;
        let expected = normalize_digest(expected_checksum);

        if actual != expected {
            return Err(UpgradeError::ChecksumMismatch {
                path: file_path.display().to_string(),
                expected,
                actual,
            }
            .into());
        }

        info!("Checksum verification successful");
        Ok(())
    }

    /// Find the digest for `file_name` in a checksums file.
    ///
    /// Accepts the `sha256sum` layout, one `<hex>  <name>` pair per line with
    /// an optional `*` binary marker before the name. A single-line file
    /// holding just a digest (the `<asset>.sha256` convention) matches any
    /// name.
    pub fn parse_checksum_file(content: &str, file_name: &str) -> Option<String> {
        let lines: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        for line in &lines {
            let mut parts = line.split_whitespace();
            let (Some(digest), name) = (parts.next(), parts.next()) else {
                continue;
            };

            match name {
                Some(name) if name.trim_start_matches('*') == file_name => {
                    return Some(normalize_digest(digest));
                }
                None if lines.len() == 1 && is_hex_digest(digest) => {
                    return Some(normalize_digest(digest));
                }
                _ => {}
            }
        }

        None
    }
}

fn normalize_digest(digest: &str) -> String {
    let digest = digest.trim();
    digest.strip_prefix("sha256:").unwrap_or(digest).to_lowercase()
}

fn is_hex_digest(value: &str) -> bool {
    let value = normalize_digest(value);
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
