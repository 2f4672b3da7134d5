//! Relative path handling shared by the manifest, archive, and deploy layers.
//!
//! Manifest paths are app-relative, use `/` separators on every platform,
//! and must pass [`check_relative`] before they are trusted. The same gate
//! is applied to archive entries on the way in and to deploy actions on the
//! way out, so a hand-edited state file cannot steer a removal outside the
//! app directory.

use crate::error::{Result, SideloadError};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Validate a manifest-relative path. Rejects absolute paths, parent
/// traversal, and empty paths.
pub fn check_relative(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(SideloadError::UnsafePath {
            entry: path.to_string(),
            reason: "empty path",
        });
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(SideloadError::UnsafePath {
            entry: path.to_string(),
            reason: "absolute path",
        });
    }
    for part in path.split('/') {
        if part == ".." {
            return Err(SideloadError::UnsafePath {
                entry: path.to_string(),
                reason: "parent traversal segment",
            });
        }
    }
    Ok(())
}

/// Convert a manifest-relative path to a native [`PathBuf`].
pub fn to_native(path: &str) -> PathBuf {
    path.split('/').collect()
}

/// Convert a native relative path to manifest form. Returns `None` for
/// paths containing non-UTF-8 or non-normal components.
pub fn to_manifest(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Parent of a manifest-relative path, or `None` at the top level.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(dir, _)| dir)
}

/// All directories implied by a set of file paths, including intermediate
/// levels. The result is sorted, which places every parent before its
/// children (a parent is a strict prefix of its child).
pub fn implied_dirs<'a, I>(paths: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut dirs = BTreeSet::new();
    for path in paths {
        let mut current = parent(path);
        while let Some(dir) = current {
            if !dirs.insert(dir.to_string()) {
                break;
            }
            current = parent(dir);
        }
    }
    dirs
}
