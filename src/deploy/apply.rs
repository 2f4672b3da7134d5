//! Deploy Sequence application.
//!
//! Executes a [`DeploySequence`](super::DeploySequence) against a target app
//! directory. The goal state, not the transition, is authoritative: removing
//! an already-absent file succeeds, and a directory that gained out-of-band
//! content is skipped rather than destroyed. Any unexpected I/O error aborts
//! the remaining sequence; callers must not persist the new manifest unless
//! the whole sequence completed.

use crate::deploy::{DeployAction, DeploySequence};
use crate::error::{Result, SideloadError};
use crate::manifest::Manifest;
use crate::paths;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Supplies file content on demand, typically from the source archive.
pub trait PayloadResolver {
    fn payload(&self, path: &str) -> Result<Vec<u8>>;
}

/// Counts of what an apply run actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub dirs_created: usize,
    pub files_written: usize,
    pub files_removed: usize,
    pub dirs_removed: usize,
    /// RemoveDirectory actions skipped because the directory still had
    /// content not owned by the manifest.
    pub dirs_skipped: usize,
}

/// Execute `sequence` in order against `target_dir`.
///
/// File modes come from the new manifest's records. Every action path is
/// re-validated against the safety gate; a manifest loaded from a tampered
/// state file cannot direct actions outside the target directory.
pub fn apply(
    sequence: &DeploySequence,
    target_dir: &Path,
    resolver: &dyn PayloadResolver,
    new_manifest: &Manifest,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();
    for action in sequence.iter() {
        paths::check_relative(action.path())?;
        let native = target_dir.join(paths::to_native(action.path()));
        match action {
            DeployAction::EnsureDirectory(path) => {
                fs::create_dir_all(&native).map_err(|e| apply_error(action, e))?;
                debug!(dir = %path, "ensured directory");
                report.dirs_created += 1;
            }
            DeployAction::ExtractFile(path) => {
                let record = new_manifest.files.get(path).ok_or_else(|| {
                    apply_error(
                        action,
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            "path has no record in the new manifest",
                        ),
                    )
                })?;
                let payload = resolver.payload(path)?;
                extract_file(&native, &payload, record.mode).map_err(|e| apply_error(action, e))?;
                debug!(file = %path, bytes = payload.len(), "extracted file");
                report.files_written += 1;
            }
            DeployAction::RemoveFile(path) => match fs::remove_file(&native) {
                Ok(()) => {
                    debug!(file = %path, "removed file");
                    report.files_removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path, "file already absent");
                }
                Err(e) => return Err(apply_error(action, e)),
            },
            DeployAction::RemoveDirectory(path) => {
                match remove_dir_if_empty(&native) {
                    Ok(RemoveDirOutcome::Removed) => {
                        debug!(dir = %path, "removed empty directory");
                        report.dirs_removed += 1;
                    }
                    Ok(RemoveDirOutcome::AlreadyAbsent) => {}
                    Ok(RemoveDirOutcome::NotEmpty) => {
                        warn!(dir = %path, "directory not empty, leaving in place");
                        report.dirs_skipped += 1;
                    }
                    Err(e) => return Err(apply_error(action, e)),
                }
            }
        }
    }
    Ok(report)
}

/// Write payload to a temp file in the final file's directory, then rename
/// into place and restore mode bits. A crash mid-write leaves only the temp
/// file behind, never a truncated file at the final path.
fn extract_file(dest: &Path, payload: &[u8], mode: u32) -> io::Result<()> {
    use std::io::Write;

    let parent = dest
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    // The planner skips EnsureDirectory for paths the old manifest already
    // implied; recreate the parent if it vanished out-of-band.
    fs::create_dir_all(parent)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".sideload-extract")
        .tempfile_in(parent)?;
    temp.write_all(payload)?;
    let file = temp.persist(dest).map_err(|e| e.error)?;
    set_mode(&file, mode)?;
    Ok(())
}

enum RemoveDirOutcome {
    Removed,
    AlreadyAbsent,
    NotEmpty,
}

fn remove_dir_if_empty(dir: &Path) -> io::Result<RemoveDirOutcome> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(RemoveDirOutcome::AlreadyAbsent)
        }
        Err(e) => return Err(e),
    };
    if entries.next().is_some() {
        return Ok(RemoveDirOutcome::NotEmpty);
    }
    fs::remove_dir(dir)?;
    Ok(RemoveDirOutcome::Removed)
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn apply_error(action: &DeployAction, source: io::Error) -> SideloadError {
    SideloadError::Apply {
        action: action.kind(),
        path: action.path().to_string(),
        source,
    }
}
