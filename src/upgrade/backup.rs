//! Timestamped snapshots of the user's data files.
//!
//! Each snapshot is a full, self-contained copy of every tracked data file
//! plus a `backup.json` metadata record:
//!
//! ```text
//! <backup_root>/
//! ├── backup_2025-03-14_09-26-53/
//! │   ├── config.json
//! │   ├── tasks.json
//! │   └── backup.json
//! ├── latest -> backup_2025-03-14_09-26-53   (or latest.txt holding the path)
//! ├── harvest.bak
//! └── rollback.log
//! ```
//!
//! Snapshots are never modified after creation. The latest pointer is
//! written last, so it never refers to an incomplete snapshot, and is
//! recomputed from directory names when it is missing or broken.

use crate::core::UpgradeError;
use crate::upgrade::activity_log::ActivityLog;
use crate::upgrade::context::UpgradeContext;
use crate::utils::fs::{copy_file, ensure_dir, remove_dir_all};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Directory name prefix of every snapshot.
pub const SNAPSHOT_PREFIX: &str = "backup_";
/// `chrono` format of the timestamp embedded in snapshot names.
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
/// Metadata record inside each snapshot.
pub const METADATA_FILE: &str = "backup.json";
/// Symbolic link pointing at the latest snapshot.
pub const LATEST_LINK: &str = "latest";
/// Plain-text fallback for [`LATEST_LINK`].
pub const LATEST_TEXT: &str = "latest.txt";
/// Schema version written to `backup.json`.
pub const METADATA_SCHEMA_VERSION: &str = "1.0";

/// Written in place of a tracked file that does not exist yet.
const PLACEHOLDER: &[u8] = b"{}";

/// Contents of `backup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Creation time.
    pub timestamp: DateTime<Local>,
    /// Absolute snapshot directory at creation time.
    pub backup_path: String,
    /// Tracked files copied (or placeholdered) into the snapshot.
    pub files: Vec<String>,
    /// Metadata schema version.
    pub version: String,
    /// Tool and version that wrote the snapshot.
    pub created_by: String,
}

/// A snapshot found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    /// Directory name, e.g. `backup_2025-03-14_09-26-53`.
    pub name: String,
    /// Full path of the snapshot directory.
    pub path: PathBuf,
    /// Timestamp parsed from the name.
    pub timestamp: NaiveDateTime,
}

/// Directory name for a snapshot taken at `timestamp`.
pub fn snapshot_name(timestamp: &NaiveDateTime) -> String {
    format!("{SNAPSHOT_PREFIX}{}", timestamp.format(SNAPSHOT_TIME_FORMAT))
}

/// Timestamp embedded in a snapshot directory name, if it parses.
pub fn parse_snapshot_name(name: &str) -> Option<NaiveDateTime> {
    let stamp = name.strip_prefix(SNAPSHOT_PREFIX)?;
    NaiveDateTime::parse_from_str(stamp, SNAPSHOT_TIME_FORMAT).ok()
}

/// Creates, resolves, verifies, restores and prunes data snapshots.
#[derive(Debug, Clone)]
pub struct BackupStore {
    data_dir: PathBuf,
    backup_root: PathBuf,
    tracked_files: Vec<String>,
    created_by: String,
    log: ActivityLog,
}

impl BackupStore {
    pub fn new(ctx: &UpgradeContext) -> Self {
        Self {
            data_dir: ctx.paths.data_dir.clone(),
            backup_root: ctx.paths.backup_root.clone(),
            tracked_files: ctx.config.tracked_files.clone(),
            created_by: format!("harvest-cli {}", ctx.current_version),
            log: ActivityLog::new(ctx.paths.activity_log()),
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    pub fn tracked_files(&self) -> &[String] {
        &self.tracked_files
    }

    /// Create a new snapshot of every tracked data file.
    ///
    /// Absent data files are replaced by an empty JSON object. If a snapshot
    /// with the current second's name already exists, the timestamp is
    /// advanced one second at a time until the name is free. A failure while
    /// populating the snapshot removes the partial directory and leaves the
    /// latest pointer untouched.
    pub async fn create_backup(&self) -> Result<PathBuf> {
        ensure_dir(&self.backup_root).await?;

        let snapshot = self.reserve_snapshot_dir().await?;
        debug!("Populating snapshot {}", snapshot.display());

        if let Err(e) = self.populate_snapshot(&snapshot).await {
            warn!("Snapshot {} incomplete, removing it", snapshot.display());
            if let Err(cleanup) = remove_dir_all(&snapshot).await {
                warn!("Failed to remove incomplete snapshot: {cleanup:#}");
            }
            self.log.record(&format!("Backup failed: {e}")).await;
            return Err(e);
        }

        self.update_latest_pointer(&snapshot).await?;

        info!("Created backup at {}", snapshot.display());
        self.log.append(&format!("Backup created: {}", snapshot.display())).await?;
        Ok(snapshot)
    }

    async fn reserve_snapshot_dir(&self) -> Result<PathBuf> {
        let now = Local::now().naive_local();
        let mut stamp = now.with_nanosecond(0).unwrap_or(now);

        loop {
            let candidate = self.backup_root.join(snapshot_name(&stamp));
            match fs::create_dir(&candidate).await {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    stamp += TimeDelta::seconds(1);
                }
                Err(e) => return Err(UpgradeError::io("create snapshot", &candidate, &e).into()),
            }
        }
    }

    async fn populate_snapshot(&self, snapshot: &Path) -> Result<()> {
        let mut files = Vec::with_capacity(self.tracked_files.len());

        for name in &self.tracked_files {
            let source = self.data_dir.join(name);
            let target = snapshot.join(name);

            if fs::try_exists(&source).await.unwrap_or(false) {
                copy_file(&source, &target).await?;
                debug!("Backed up {}", name);
            } else {
                if let Some(parent) = target.parent() {
                    ensure_dir(parent).await?;
                }
                fs::write(&target, PLACEHOLDER)
                    .await
                    .map_err(|e| UpgradeError::io("write placeholder", &target, &e))?;
                debug!("{} absent, wrote placeholder", name);
            }
            files.push(name.clone());
        }

        let metadata = SnapshotMetadata {
            timestamp: Local::now(),
            backup_path: snapshot.display().to_string(),
            files,
            version: METADATA_SCHEMA_VERSION.to_string(),
            created_by: self.created_by.clone(),
        };
        let json = serde_json::to_vec_pretty(&metadata).context("Failed to serialize backup metadata")?;
        let metadata_path = snapshot.join(METADATA_FILE);
        fs::write(&metadata_path, json)
            .await
            .map_err(|e| UpgradeError::io("write metadata", &metadata_path, &e))?;

        Ok(())
    }

    async fn update_latest_pointer(&self, snapshot: &Path) -> Result<()> {
        let link = self.backup_root.join(LATEST_LINK);
        let text = self.backup_root.join(LATEST_TEXT);

        if fs::symlink_metadata(&link).await.is_ok() {
            fs::remove_file(&link)
                .await
                .map_err(|e| UpgradeError::io("remove latest pointer", &link, &e))?;
        }
        if fs::try_exists(&text).await.unwrap_or(false) {
            fs::remove_file(&text)
                .await
                .map_err(|e| UpgradeError::io("remove latest pointer", &text, &e))?;
        }

        #[cfg(unix)]
        {
            match fs::symlink(snapshot, &link).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Symlink unsupported ({}), falling back to {}", e, LATEST_TEXT),
            }
        }

        fs::write(&text, snapshot.display().to_string())
            .await
            .map_err(|e| UpgradeError::io("write latest pointer", &text, &e).into())
    }

    /// Resolve the latest snapshot directory.
    ///
    /// Tries the `latest` link, then `latest.txt`, then the snapshot with the
    /// greatest timestamp parsed from its directory name.
    pub async fn get_latest_backup_path(&self) -> Result<PathBuf> {
        if !fs::try_exists(&self.backup_root).await.unwrap_or(false) {
            return Err(UpgradeError::MissingBackup.into());
        }

        if let Ok(target) = fs::read_link(self.backup_root.join(LATEST_LINK)).await {
            let target = self.backup_root.join(target);
            if is_dir(&target).await {
                return Ok(target);
            }
            debug!("latest link is broken: {}", target.display());
        }

        if let Ok(content) = fs::read_to_string(self.backup_root.join(LATEST_TEXT)).await {
            let target = self.backup_root.join(content.trim());
            if !content.trim().is_empty() && is_dir(&target).await {
                return Ok(target);
            }
            debug!("{} is stale: {}", LATEST_TEXT, target.display());
        }

        self.list_backups()
            .await?
            .pop()
            .map(|entry| entry.path)
            .ok_or_else(|| UpgradeError::MissingBackup.into())
    }

    /// Check the latest snapshot holds every tracked file and a readable `backup.json`.
    pub async fn verify_backup(&self) -> Result<PathBuf> {
        let snapshot = self.get_latest_backup_path().await?;

        for name in &self.tracked_files {
            if !fs::try_exists(snapshot.join(name)).await.unwrap_or(false) {
                return Err(UpgradeError::CorruptBackup {
                    path: snapshot.display().to_string(),
                    reason: format!("missing data file {name}"),
                }
                .into());
            }
        }

        let metadata_path = snapshot.join(METADATA_FILE);
        if !fs::try_exists(&metadata_path).await.unwrap_or(false) {
            return Err(UpgradeError::CorruptBackup {
                path: snapshot.display().to_string(),
                reason: format!("missing {METADATA_FILE}"),
            }
            .into());
        }

        read_metadata(&snapshot).await.map_err(|e| UpgradeError::CorruptBackup {
            path: snapshot.display().to_string(),
            reason: format!("unreadable {METADATA_FILE}: {e}"),
        })?;

        debug!("Verified backup {}", snapshot.display());
        Ok(snapshot)
    }

    /// Copy each tracked file present in the latest snapshot back into the data directory.
    ///
    /// Tracked files missing from the snapshot are left alone. Returns the
    /// names that were restored.
    pub async fn restore_backup(&self) -> Result<Vec<String>> {
        let snapshot = self.get_latest_backup_path().await?;
        ensure_dir(&self.data_dir).await?;

        let mut restored = Vec::new();
        for name in &self.tracked_files {
            let source = snapshot.join(name);
            if !fs::try_exists(&source).await.unwrap_or(false) {
                debug!("{} not in snapshot, leaving live copy untouched", name);
                continue;
            }
            copy_file(&source, &self.data_dir.join(name)).await?;
            restored.push(name.clone());
        }

        info!("Restored {} file(s) from {}", restored.len(), snapshot.display());
        self.log
            .append(&format!("Data restored from backup: {}", snapshot.display()))
            .await?;
        Ok(restored)
    }

    /// Every parseable snapshot, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<SnapshotEntry>> {
        let mut entries = Vec::new();

        let mut dir = match fs::read_dir(&self.backup_root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(e) => {
                return Err(UpgradeError::io("list backups", &self.backup_root, &e).into());
            }
        };

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| UpgradeError::io("list backups", &self.backup_root, &e))?
        {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(timestamp) = parse_snapshot_name(&name) {
                entries.push(SnapshotEntry {
                    name,
                    path: entry.path(),
                    timestamp,
                });
            }
        }

        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    /// Delete the oldest snapshots until at most `keep` remain.
    ///
    /// Returns the removed snapshot directories, oldest first.
    pub async fn prune_old_backups(&self, keep: usize) -> Result<Vec<PathBuf>> {
        let entries = self.list_backups().await?;
        if entries.len() <= keep {
            return Ok(Vec::new());
        }

        let excess = entries.len() - keep;
        let mut removed = Vec::with_capacity(excess);
        for entry in entries.into_iter().take(excess) {
            fs::remove_dir_all(&entry.path)
                .await
                .map_err(|e| UpgradeError::io("remove old backup", &entry.path, &e))?;
            debug!("Pruned {}", entry.name);
            removed.push(entry.path);
        }

        info!("Pruned {} old backup(s), kept {}", removed.len(), keep);
        self.log
            .append(&format!("Pruned {} old backup(s), keeping {}", removed.len(), keep))
            .await?;
        Ok(removed)
    }
}

/// Parse `backup.json` from a snapshot directory.
pub async fn read_metadata(snapshot: &Path) -> Result<SnapshotMetadata> {
    let path = snapshot.join(METADATA_FILE);
    let content = fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
