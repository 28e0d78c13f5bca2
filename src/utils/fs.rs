//! File system helpers used by the backup, install and rollback stages.
//!
//! All helpers are async and go through `tokio::fs`, except [`dir_size`],
//! which walks the tree synchronously and is wrapped by [`get_directory_size`].

use crate::core::UpgradeError;
use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// Create `path` and all parents, mapping failures to [`UpgradeError::IoFailure`].
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| UpgradeError::io("create directory", path, &e).into())
}

/// Copy a file, creating the destination's parent directory.
///
/// Permissions travel with the content because `tokio::fs::copy` copies them.
/// Returns the number of bytes copied.
pub async fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent).await?;
    }

    fs::copy(src, dst).await.map_err(|e| {
        UpgradeError::io(format!("copy to {}", dst.display()), src, &e).into()
    })
}

/// Replace `dst` with an executable copy of `src` through a sibling temp file
/// and a rename.
///
/// A reader of `dst` sees either the old or the new file, never a partial one.
/// The temp file is made executable before the rename, so once `dst` has
/// changed nothing else can fail.
pub async fn replace_executable(src: &Path, dst: &Path) -> Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Install path has no parent: {}", dst.display()))?;
    ensure_dir(parent).await?;

    let file_name = dst.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    copy_file(src, &temp_path).await?;
    if let Err(e) = set_executable(&temp_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, dst).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(UpgradeError::io("replace", dst, &e).into());
    }

    Ok(())
}

/// Set mode `0o755` on Unix. No-op elsewhere.
pub async fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut perms = fs::metadata(path)
            .await
            .map_err(|e| UpgradeError::io("read permissions", path, &e))?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms)
            .await
            .map_err(|e| UpgradeError::io("set permissions", path, &e))?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

/// Whether `path` is a regular file the current platform would execute.
///
/// On Unix any of the three execute bits counts. Elsewhere a regular file is
/// enough.
pub async fn is_executable(path: &Path) -> bool {
    match fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && has_exec_bit(&metadata),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn has_exec_bit(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Remove a directory tree; a missing directory is fine.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove directory {}", path.display())),
    }
}

/// Total size of regular files under `path`, in bytes.
pub fn dir_size(path: &Path) -> Result<u64> {
    let mut size = 0;

    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
        if entry.file_type().is_file() {
            size += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }

    Ok(size)
}

/// Async wrapper around [`dir_size`].
pub async fn get_directory_size(path: &Path) -> Result<u64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || dir_size(&path))
        .await
        .context("Directory size task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_file_creates_parent() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("a.txt");
        std::fs::write(&src, "hello").unwrap();
        let dst = temp.path().join("x").join("y").join("a.txt");

        let copied = copy_file(&src, &dst).await.unwrap();
        assert_eq!(copied, 5);
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_copy_missing_source_is_io_failure() {
        let temp = TempDir::new().unwrap();
        let err = copy_file(&temp.path().join("missing"), &temp.path().join("dst"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::IoFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_replace_executable_overwrites() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("new");
        let dst = temp.path().join("bin").join("tool");
        std::fs::write(&src, "v2").unwrap();
        std::fs::create_dir_all(dst.parent().unwrap()).unwrap();
        std::fs::write(&dst, "v1").unwrap();

        replace_executable(&src, &dst).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "v2");
        // The source had no execute bit; the installed copy does.
        assert!(is_executable(&dst).await);

        let leftovers: Vec<_> = std::fs::read_dir(dst.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_swap_leaves_destination_alone() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("new");
        std::fs::write(&src, "v2").unwrap();
        // A non-empty directory cannot be renamed over.
        let dst = temp.path().join("tool");
        std::fs::create_dir(&dst).unwrap();
        std::fs::write(dst.join("keep"), "v1").unwrap();

        let err = replace_executable(&src, &dst).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::IoFailure { .. })
        ));
        assert_eq!(std::fs::read_to_string(dst.join("keep")).unwrap(), "v1");

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_set_executable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tool");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(!is_executable(&path).await);

        set_executable(&path).await.unwrap();
        assert!(is_executable(&path).await);
    }

    #[tokio::test]
    async fn test_is_executable_rejects_dirs_and_missing() {
        let temp = TempDir::new().unwrap();
        assert!(!is_executable(temp.path()).await);
        assert!(!is_executable(&temp.path().join("missing")).await);
    }

    #[tokio::test]
    async fn test_directory_size() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a"), vec![0u8; 10]).unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("sub").join("b"), vec![0u8; 5]).unwrap();

        assert_eq!(get_directory_size(temp.path()).await.unwrap(), 15);
    }
}
