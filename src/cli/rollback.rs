//! `harvest rollback`: inspect or restore the previous version.

use crate::cli::upgrade::prompt_confirmation;
use crate::upgrade::backup::BackupStore;
use crate::upgrade::UpgradeContext;
use crate::upgrade::rollback::{RollbackInfo, RollbackManager};
use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;

/// Lines of the activity log shown with the rollback status.
const RECENT_LOG_LINES: usize = 5;

/// Arguments for `harvest rollback`.
///
/// Without flags, reports whether a rollback is possible and what it would
/// restore. Nothing is changed unless `--perform` is given.
#[derive(Args, Debug, Default)]
pub struct RollbackArgs {
    /// Restore the previous binary and the latest data snapshot
    #[arg(long, conflicts_with_all = ["log", "clear_log", "list"])]
    pub perform: bool,

    /// Do not ask for confirmation before rolling back
    #[arg(short, long, requires = "perform")]
    pub yes: bool,

    /// Print the rollback activity log
    #[arg(long, conflicts_with = "clear_log")]
    pub log: bool,

    /// Delete the rollback activity log
    #[arg(long)]
    pub clear_log: bool,

    /// List data snapshots, oldest first
    #[arg(long)]
    pub list: bool,
}

impl RollbackArgs {
    pub async fn execute(self, ctx: &UpgradeContext) -> Result<()> {
        let manager = RollbackManager::new(ctx);

        if self.clear_log {
            manager.clear_log().await?;
            println!("{}", "Rollback log cleared".green());
            return Ok(());
        }

        if self.log {
            let log = manager.read_log().await?;
            if log.is_empty() {
                println!("Rollback log is empty");
            } else {
                print!("{log}");
            }
            return Ok(());
        }

        if self.list {
            return list_snapshots(ctx).await;
        }

        let info = manager.get_rollback_info().await;

        if self.perform {
            if !info.available {
                print_unavailable(&info);
                bail!("No rollback available");
            }
            print_info(&info);
            if !self.yes && !prompt_confirmation("Restore the previous binary and data?") {
                println!("Rollback cancelled");
                return Ok(());
            }

            println!("{}", "Rolling back to previous version...".yellow());
            manager.perform_rollback().await?;
            println!("{}", "Successfully rolled back to previous version".green());
            return Ok(());
        }

        if info.available {
            print_info(&info);
        } else {
            print_unavailable(&info);
        }

        let log = manager.read_log().await.unwrap_or_default();
        let lines: Vec<&str> = log.lines().collect();
        if !lines.is_empty() {
            println!();
            println!("{}", "Recent activity:".bold());
            for line in &lines[lines.len().saturating_sub(RECENT_LOG_LINES)..] {
                println!("  {line}");
            }
        }

        Ok(())
    }
}

fn print_info(info: &RollbackInfo) {
    println!("{}", "Rollback available".green().bold());
    if let Some(binary) = &info.binary_backup {
        let modified = binary
            .modified
            .map(|t| format!(", saved {}", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        println!("  Binary backup: {} ({} bytes{modified})", binary.path.display(), binary.size);
    }
    if let Some(data) = &info.data_backup {
        let created = data
            .created
            .map(|t| format!(", created {}", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        println!("  Data backup:   {} ({} bytes{created})", data.path.display(), data.size);
    }
    println!("  Snapshots:     {}", info.snapshot_count);
}

fn print_unavailable(info: &RollbackInfo) {
    println!("{}", "No rollback available".yellow());
    for reason in info.missing_reasons() {
        println!("  - {reason}");
    }
}

async fn list_snapshots(ctx: &UpgradeContext) -> Result<()> {
    let store = BackupStore::new(ctx);
    let snapshots = match store.list_backups().await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            tracing::debug!("Could not list backups: {:#}", e);
            Vec::new()
        }
    };

    if snapshots.is_empty() {
        println!("No backups found in {}", store.backup_root().display());
        return Ok(());
    }

    println!("{}", format!("Backups in {}:", store.backup_root().display()).bold());
    for snapshot in snapshots {
        println!("  {}  ({})", snapshot.name, snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}
