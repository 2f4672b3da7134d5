//! Manifest construction from directory trees and archive entries.

use crate::archive::ArchiveEntry;
use crate::error::{Result, SideloadError};
use crate::manifest::{hasher, FileRecord, Manifest};
use crate::paths;
use std::path::Path;
use walkdir::WalkDir;

/// Predicate deciding whether an app-relative path is excluded from the
/// manifest. Used to keep the tool's own state file out of the manifest it
/// describes; hashing it would make every state write change the manifest.
pub type ExcludeFn<'a> = &'a dyn Fn(&str) -> bool;

/// Build a manifest by scanning an app directory.
///
/// Only files are recorded; directories are implied by the paths they
/// contain. An unreadable file aborts the build.
pub fn from_directory(root: &Path, exclude: Option<ExcludeFn<'_>>) -> Result<Manifest> {
    let name = app_name_from_dir(root)?;
    let mut records = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            match e.into_io_error() {
                Some(io) => SideloadError::io(path, io),
                None => SideloadError::usage(format!("walk error under {}", root.display())),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields paths under its root");
        let Some(rel) = paths::to_manifest(rel) else {
            return Err(SideloadError::usage(format!(
                "non-portable file name under {}: {:?}",
                root.display(),
                rel
            )));
        };
        if exclude.map(|f| f(&rel)).unwrap_or(false) {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| match e.into_io_error() {
                Some(io) => SideloadError::io(entry.path(), io),
                None => SideloadError::usage(format!("metadata error on {}", entry.path().display())),
            })?;
        records.push(FileRecord {
            path: rel,
            size: meta.len(),
            mode: file_mode(&meta),
            hash: hasher::hash_file(entry.path())?,
        });
    }
    Ok(Manifest::from_records(
        name,
        Some(root.display().to_string()),
        records,
    ))
}

/// Build a manifest from already-validated, app-relative archive entries.
pub fn from_entries(name: &str, source: Option<String>, entries: &[ArchiveEntry]) -> Manifest {
    let records = entries.iter().map(|entry| FileRecord {
        path: entry.path.clone(),
        size: entry.payload.len() as u64,
        mode: entry.mode,
        hash: hasher::hash_bytes(&entry.payload),
    });
    Manifest::from_records(name, source, records)
}

fn app_name_from_dir(root: &Path) -> Result<String> {
    if !root.is_dir() {
        return Err(SideloadError::usage(format!(
            "app directory {} does not exist",
            root.display()
        )));
    }
    root.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            SideloadError::usage(format!(
                "cannot derive an app name from {}",
                root.display()
            ))
        })
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_meta: &std::fs::Metadata) -> u32 {
    crate::manifest::DEFAULT_FILE_MODE
}
