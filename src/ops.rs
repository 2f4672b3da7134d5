//! Deployment operations.
//!
//! Ties the pieces together: archive → new manifest; state file → old
//! manifest (rebuilt from the filesystem when the record is unusable);
//! planner → applier → state persistence. The state file is only rewritten
//! after the whole sequence applied, so an interrupted run leaves a diff
//! the next run recomputes and finishes.

use crate::archive::AppArchive;
use crate::deploy::{self, apply};
use crate::error::{Result, SideloadError};
use crate::lock::DeployLock;
use crate::manifest::{builder, Manifest};
use crate::state::{self, DeploymentState, StateStatus, STATE_FILE_NAME};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Parameters for one side-load operation.
#[derive(Debug, Clone)]
pub struct SideloadRequest {
    /// Source archive on the local filesystem.
    pub src: PathBuf,
    /// Parent directory apps are installed under (e.g. `etc/apps`).
    pub dest: PathBuf,
    /// State file name relative to the app directory.
    pub state_file: Option<String>,
    /// Rebuild the old manifest by scanning the installed directory when
    /// the state file is missing or unusable.
    pub rebuild_manifest: bool,
    /// Plan only; never touch the target.
    pub dry_run: bool,
    /// Include per-file lists in the result.
    pub list_files: bool,
}

impl SideloadRequest {
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        SideloadRequest {
            src: src.into(),
            dest: dest.into(),
            state_file: None,
            rebuild_manifest: true,
            dry_run: false,
            list_files: false,
        }
    }
}

/// Outcome of a side-load, sufficient for an external idempotence check
/// without re-reading the filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct SideloadResult {
    pub changed: bool,
    pub app_name: String,
    /// Aggregate hash of the (now) installed manifest.
    pub hash: String,
    pub state_file: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
}

/// File-level difference between two manifests, counted per path.
#[derive(Debug, Clone, Default)]
struct DiffCounts {
    added: usize,
    updated: usize,
    removed: usize,
    unchanged: usize,
}

fn diff_counts(old: Option<&Manifest>, new: &Manifest) -> DiffCounts {
    let mut counts = DiffCounts::default();
    for (path, record) in &new.files {
        match old.and_then(|m| m.files.get(path)) {
            None => counts.added += 1,
            Some(previous) if previous == record => counts.unchanged += 1,
            Some(_) => counts.updated += 1,
        }
    }
    if let Some(old) = old {
        counts.removed = old
            .files
            .keys()
            .filter(|path| !new.files.contains_key(*path))
            .count();
    }
    counts
}

/// Install or upgrade an app from a source archive.
pub fn sideload(request: &SideloadRequest) -> Result<SideloadResult> {
    validate_source(&request.src)?;
    if !request.dest.is_dir() {
        return Err(SideloadError::usage(format!(
            "destination {} is not a directory",
            request.dest.display()
        )));
    }

    let archive = AppArchive::open(&request.src)?;
    let new_manifest = builder::from_entries(
        &archive.name,
        Some(request.src.display().to_string()),
        &archive.entries,
    );
    let app_name = archive.name.clone();
    let app_dir = request.dest.join(&app_name);
    let state_name = request.state_file.as_deref().unwrap_or(STATE_FILE_NAME);
    let state_path = app_dir.join(state_name);

    // Dry runs read state without the lock; they race only with themselves.
    let lock = if request.dry_run {
        None
    } else {
        Some(DeployLock::acquire(&request.dest, &app_name)?)
    };

    let old_manifest = load_old_manifest(
        &app_dir,
        &state_path,
        state_name,
        request.rebuild_manifest,
        !request.dry_run,
    )?;
    let counts = diff_counts(old_manifest.as_ref().map(|(m, _)| m), &new_manifest);

    if let Some((old, installed_at)) = &old_manifest {
        debug!(old = %old.hash, new = %new_manifest.hash, "comparing manifests");
        if old.hash == new_manifest.hash {
            info!(app = %app_name, hash = %new_manifest.hash, "content unchanged, nothing to deploy");
            return Ok(SideloadResult {
                changed: false,
                app_name,
                hash: new_manifest.hash,
                state_file: state_path.display().to_string(),
                added: 0,
                updated: 0,
                removed: 0,
                unchanged: counts.unchanged,
                installed_at: *installed_at,
                files: request
                    .list_files
                    .then(|| new_manifest.files.keys().cloned().collect()),
            });
        }
    }

    let sequence = deploy::plan(old_manifest.as_ref().map(|(m, _)| m), &new_manifest);
    if request.dry_run {
        return Ok(SideloadResult {
            changed: !sequence.is_empty(),
            app_name,
            hash: new_manifest.hash,
            state_file: state_path.display().to_string(),
            added: counts.added,
            updated: counts.updated,
            removed: counts.removed,
            unchanged: counts.unchanged,
            installed_at: old_manifest.as_ref().and_then(|(_, at)| *at),
            files: request
                .list_files
                .then(|| new_manifest.files.keys().cloned().collect()),
        });
    }

    fs::create_dir_all(&app_dir).map_err(|e| SideloadError::io(&app_dir, e))?;
    let payloads = archive.into_payloads();
    let report = apply::apply(&sequence, &app_dir, &payloads, &new_manifest)?;
    info!(
        app = %app_name,
        written = report.files_written,
        removed = report.files_removed,
        "applied deploy sequence"
    );

    let new_state = DeploymentState::new(
        new_manifest.clone(),
        Some(request.src.display().to_string()),
    );
    state::save(&state_path, &new_state)?;
    drop(lock);

    Ok(SideloadResult {
        changed: true,
        app_name,
        hash: new_manifest.hash,
        state_file: state_path.display().to_string(),
        added: counts.added,
        updated: counts.updated,
        removed: counts.removed,
        unchanged: counts.unchanged,
        installed_at: Some(new_state.installed_at),
        files: request
            .list_files
            .then(|| new_manifest.files.keys().cloned().collect()),
    })
}

/// Plan the deploy an archive would perform, without applying it.
pub fn plan_only(request: &SideloadRequest) -> Result<(Manifest, deploy::DeploySequence)> {
    validate_source(&request.src)?;
    let archive = AppArchive::open(&request.src)?;
    let new_manifest = builder::from_entries(
        &archive.name,
        Some(request.src.display().to_string()),
        &archive.entries,
    );
    let app_dir = request.dest.join(&archive.name);
    let state_name = request.state_file.as_deref().unwrap_or(STATE_FILE_NAME);
    let state_path = app_dir.join(state_name);
    let old = load_old_manifest(&app_dir, &state_path, state_name, request.rebuild_manifest, false)?;
    let sequence = deploy::plan(old.as_ref().map(|(m, _)| m), &new_manifest);
    Ok((new_manifest, sequence))
}

/// Determine the old manifest and install time, rebuilding from the
/// filesystem when the state record is unusable and rebuilding is allowed.
///
/// With `persist_rebuilt`, a rebuilt manifest immediately replaces the
/// unusable state file (keeping whatever provenance a legacy record held),
/// so a corrupted record is repaired even when the subsequent diff turns
/// out to be empty.
fn load_old_manifest(
    app_dir: &Path,
    state_path: &Path,
    state_name: &str,
    rebuild: bool,
    persist_rebuilt: bool,
) -> Result<Option<(Manifest, Option<i64>)>> {
    let status = state::load(state_path);
    match status {
        StateStatus::Present(state) => {
            if state.tool_version != crate::VERSION {
                warn!(
                    recorded = %state.tool_version,
                    running = crate::VERSION,
                    "state file was written by a different tool version"
                );
            }
            Ok(Some((state.manifest, Some(state.installed_at))))
        }
        StateStatus::OldVersion(_) | StateStatus::Corrupted(_) | StateStatus::Missing => {
            if matches!(status, StateStatus::Corrupted(_)) {
                warn!(
                    state_file = %state_path.display(),
                    status = status.label(),
                    "state file unusable, falling back to filesystem scan"
                );
            }
            if rebuild && app_dir.is_dir() {
                let exclude = |path: &str| path == state_name;
                let manifest = builder::from_directory(app_dir, Some(&exclude))?;
                debug!(
                    app_dir = %app_dir.display(),
                    files = manifest.file_count(),
                    "rebuilt manifest from installed filesystem"
                );
                if persist_rebuilt {
                    let mut rebuilt = DeploymentState::new(manifest.clone(), None);
                    rebuilt.rebuilt_from_filesystem = true;
                    if let StateStatus::OldVersion(raw) = &status {
                        rebuilt.src_path = raw
                            .get("src_path")
                            .and_then(serde_json::Value::as_str)
                            .map(str::to_string);
                        if let Some(at) =
                            raw.get("installed_at").and_then(serde_json::Value::as_f64)
                        {
                            rebuilt.installed_at = at as i64;
                        }
                    }
                    state::save(state_path, &rebuilt)?;
                }
                Ok(Some((manifest, None)))
            } else {
                Ok(None)
            }
        }
    }
}

/// Report on an installed app's manifest record, optionally rebuilding and
/// persisting it from the filesystem.
#[derive(Debug, Serialize)]
pub struct ManifestReport {
    pub app_dir: String,
    pub state_file: String,
    /// present, old-version, corrupted, missing, or rebuilt.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

/// Inspect (and optionally rebuild) the manifest record for an installed
/// app directory.
pub fn manifest_status(
    app_dir: &Path,
    state_file: Option<&str>,
    rebuild: bool,
) -> Result<ManifestReport> {
    if !app_dir.is_dir() {
        return Err(SideloadError::usage(format!(
            "app directory {} does not exist",
            app_dir.display()
        )));
    }
    let state_name = state_file.unwrap_or(STATE_FILE_NAME);
    let state_path = app_dir.join(state_name);
    let status = state::load(&state_path);

    match status {
        StateStatus::Present(state) => Ok(ManifestReport {
            app_dir: app_dir.display().to_string(),
            state_file: state_path.display().to_string(),
            status: "present".to_string(),
            manifest: Some(state.manifest),
        }),
        other => {
            if !rebuild {
                return Ok(ManifestReport {
                    app_dir: app_dir.display().to_string(),
                    state_file: state_path.display().to_string(),
                    status: other.label().to_string(),
                    manifest: None,
                });
            }
            if matches!(other, StateStatus::Corrupted(_)) {
                warn!(
                    state_file = %state_path.display(),
                    "replacing corrupted state file with a rebuilt manifest"
                );
            }
            let exclude = |path: &str| path == state_name;
            let manifest = builder::from_directory(app_dir, Some(&exclude))?;
            let mut new_state = DeploymentState::new(manifest.clone(), None);
            new_state.rebuilt_from_filesystem = true;
            // Keep provenance from a legacy record where it exists.
            if let StateStatus::OldVersion(raw) = &other {
                new_state.src_path = raw
                    .get("src_path")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string);
                if let Some(at) = raw.get("installed_at").and_then(serde_json::Value::as_f64) {
                    new_state.installed_at = at as i64;
                }
            }
            state::save(&state_path, &new_state)?;
            Ok(ManifestReport {
                app_dir: app_dir.display().to_string(),
                state_file: state_path.display().to_string(),
                status: "rebuilt".to_string(),
                manifest: Some(manifest),
            })
        }
    }
}

fn validate_source(src: &Path) -> Result<()> {
    let meta = fs::metadata(src).map_err(|_| {
        SideloadError::usage(format!("source {} does not exist", src.display()))
    })?;
    if !meta.is_file() {
        return Err(SideloadError::usage(format!(
            "source {} is not a file",
            src.display()
        )));
    }
    if meta.len() == 0 {
        return Err(SideloadError::usage(format!(
            "invalid archive {}: the file is 0 bytes",
            src.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{write_archive, ArchiveEntry};
    use tempfile::TempDir;

    fn make_archive(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(format!("{name}.tgz"));
        let entries: Vec<ArchiveEntry> = files
            .iter()
            .map(|(rel, content)| ArchiveEntry {
                path: rel.to_string(),
                mode: 0o644,
                payload: content.as_bytes().to_vec(),
            })
            .collect();
        let file = fs::File::create(&path).unwrap();
        write_archive(file, name, &entries).unwrap();
        path
    }

    #[test]
    fn fresh_install_then_noop_rerun() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("apps");
        fs::create_dir(&dest).unwrap();
        let archive = make_archive(
            tmp.path(),
            "ta_nix",
            &[("default/app.conf", "[launcher]\n"), ("README", "docs\n")],
        );

        let request = SideloadRequest::new(&archive, &dest);
        let first = sideload(&request).unwrap();
        assert!(first.changed);
        assert_eq!(first.added, 2);
        assert!(dest.join("ta_nix/default/app.conf").exists());

        let second = sideload(&request).unwrap();
        assert!(!second.changed);
        assert_eq!(second.hash, first.hash);
        assert_eq!(second.unchanged, 2);
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("apps");
        fs::create_dir(&dest).unwrap();
        let archive = make_archive(tmp.path(), "app", &[("default/app.conf", "x")]);

        let mut request = SideloadRequest::new(&archive, &dest);
        request.dry_run = true;
        let result = sideload(&request).unwrap();
        assert!(result.changed);
        assert_eq!(result.added, 1);
        assert!(!dest.join("app").exists());
    }

    #[test]
    fn corrupted_state_recovers_via_filesystem_scan() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("apps");
        fs::create_dir(&dest).unwrap();
        let archive = make_archive(tmp.path(), "app", &[("default/app.conf", "v1")]);

        let request = SideloadRequest::new(&archive, &dest);
        sideload(&request).unwrap();
        fs::write(dest.join("app/.sideload.json"), "garbage{").unwrap();

        // Content is unchanged, so the rebuilt manifest matches; the run
        // reports no change and the corrupted record is replaced with a
        // valid one.
        let rerun = sideload(&request).unwrap();
        assert!(!rerun.changed);
        assert!(matches!(
            state::load(&dest.join("app/.sideload.json")),
            StateStatus::Present(_)
        ));
    }

    #[test]
    fn upgrade_removes_files_dropped_from_source() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("apps");
        fs::create_dir(&dest).unwrap();

        let v1 = make_archive(
            tmp.path(),
            "app",
            &[("default/app.conf", "x"), ("lookups/old.csv", "a,b\n")],
        );
        sideload(&SideloadRequest::new(&v1, &dest)).unwrap();
        assert!(dest.join("app/lookups/old.csv").exists());

        let v2 = make_archive(tmp.path(), "app", &[("default/app.conf", "x")]);
        let result = sideload(&SideloadRequest::new(&v2, &dest)).unwrap();
        assert!(result.changed);
        assert_eq!(result.removed, 1);
        assert!(!dest.join("app/lookups/old.csv").exists());
        assert!(!dest.join("app/lookups").exists());
    }

    #[test]
    fn missing_destination_is_a_usage_error() {
        let tmp = TempDir::new().unwrap();
        let archive = make_archive(tmp.path(), "app", &[("a.conf", "x")]);
        let request = SideloadRequest::new(&archive, tmp.path().join("nope"));
        assert!(matches!(
            sideload(&request),
            Err(SideloadError::Usage(_))
        ));
    }

    #[test]
    fn manifest_status_reports_missing_without_rebuild() {
        let tmp = TempDir::new().unwrap();
        let app_dir = tmp.path().join("app");
        fs::create_dir(&app_dir).unwrap();
        let report = manifest_status(&app_dir, None, false).unwrap();
        assert_eq!(report.status, "missing");
        assert!(report.manifest.is_none());
    }
}
