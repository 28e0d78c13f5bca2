//! Path validation for untrusted archive entries.

use crate::core::UpgradeError;
use anyhow::Result;
use std::path::{Component, Path, PathBuf};

/// Validate an archive entry path and return its destination under `root`.
///
/// Rejects any entry that is absolute, carries a Windows prefix, or contains a
/// `..` component, so the returned path is always lexically inside `root`.
/// `.` components are dropped.
pub fn resolve_archive_entry(root: &Path, entry: &Path) -> Result<PathBuf> {
    let mut relative = PathBuf::new();

    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UpgradeError::PathTraversal {
                    entry: entry.display().to_string(),
                }
                .into());
            }
        }
    }

    Ok(root.join(relative))
}

/// Whether `path` stays inside `boundary` after resolving both.
///
/// Paths that do not exist yet are compared lexically through their closest
/// existing ancestor.
pub fn ensure_within_directory(path: &Path, boundary: &Path) -> bool {
    let boundary = match boundary.canonicalize() {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name.to_owned());
                existing = parent.to_path_buf();
            }
            _ => return false,
        }
    }

    let mut resolved = match existing.canonicalize() {
        Ok(p) => p,
        Err(_) => return false,
    };
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }

    resolved.starts_with(&boundary)
}
