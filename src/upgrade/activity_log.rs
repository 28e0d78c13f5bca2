//! Append-only rollback activity log.
//!
//! Every backup, install and rollback step writes one line of the form
//! `[YYYY-MM-DD HH:MM:SS] <message>` to `<backup_root>/rollback.log`. The file
//! is only ever appended to; [`ActivityLog::clear`] is the single explicit,
//! user-triggered exception.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Timestamp format of log lines.
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Handle to the activity log file.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    /// Log at `path`. The file is created on first append.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
        }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub async fn append(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let line = format!("[{}] {}\n", Local::now().format(LOG_TIME_FORMAT), message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open activity log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write activity log {}", self.path.display()))?;
        file.flush().await?;

        debug!(target: "activity", "{}", message);
        Ok(())
    }

    /// Append, downgrading a write failure to a tracing warning.
    ///
    /// Used on failure paths where the original error must reach the caller
    /// even if the log cannot be written.
    pub async fn record(&self, message: &str) {
        if let Err(e) = self.append(message).await {
            tracing::warn!("Could not write activity log: {e:#}");
        }
    }

    /// Full log contents, or an empty string when nothing was logged yet.
    pub async fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read activity log {}", self.path.display())),
        }
    }

    /// Log lines with their timestamps stripped.
    pub async fn messages(&self) -> Result<Vec<String>> {
        let content = self.read().await?;
        Ok(content
            .lines()
            .filter_map(|line| line.split_once("] ").map(|(_, msg)| msg.to_string()))
            .collect())
    }

    /// Remove the log. Missing is fine.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove activity log {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_formats_lines() {
        let temp = TempDir::new().unwrap();
        let log = ActivityLog::new(temp.path().join("backup").join("rollback.log"));

        log.append("first").await.unwrap();
        log.append("second").await.unwrap();

        let content = log.read().await.unwrap();
        let line = Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] (first|second)$").unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| line.is_match(l)));
        assert_eq!(log.messages().await.unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_read_missing_log_is_empty() {
        let temp = TempDir::new().unwrap();
        let log = ActivityLog::new(temp.path().join("rollback.log"));
        assert_eq!(log.read().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let log = ActivityLog::new(temp.path().join("rollback.log"));
        log.append("entry").await.unwrap();
        log.clear().await.unwrap();
        assert!(!log.path().exists());
        log.clear().await.unwrap();
    }
}
