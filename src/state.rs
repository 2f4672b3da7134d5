//! Deployment state persistence.
//!
//! A JSON side-car file next to the installed app records the last applied
//! manifest plus provenance (source path/hash, install time, tool version).
//! The filesystem is ground truth: a missing, legacy, or corrupted state
//! file degrades to "no known prior state" and the manifest is rebuilt by
//! scanning, never treated as fatal. Saves are atomic (temp file in the same
//! directory, then rename), so a crash mid-write cannot corrupt the
//! previous state.

use crate::error::{Result, SideloadError};
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// Default state file name, relative to the installed app directory.
pub const STATE_FILE_NAME: &str = ".sideload.json";

/// Current on-disk schema version.
///
/// Version 1 state files predate manifest support and carry only source
/// provenance; they load as [`StateStatus::OldVersion`].
pub const STATE_SCHEMA_VERSION: u32 = 2;

/// Everything recorded after a successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub schema_version: u32,
    /// Source archive path as given by the caller. Informational.
    pub src_path: Option<String>,
    /// Aggregate hash of the installed manifest.
    pub src_hash: String,
    /// Unix timestamp of the last successful apply.
    pub installed_at: i64,
    /// Version of the tool that wrote this state.
    pub tool_version: String,
    /// True when the manifest was reconstructed by scanning the installed
    /// directory rather than recorded at install time.
    #[serde(default)]
    pub rebuilt_from_filesystem: bool,
    pub manifest: Manifest,
}

impl DeploymentState {
    pub fn new(manifest: Manifest, src_path: Option<String>) -> Self {
        DeploymentState {
            schema_version: STATE_SCHEMA_VERSION,
            src_path,
            src_hash: manifest.hash.clone(),
            installed_at: chrono::Utc::now().timestamp(),
            tool_version: crate::VERSION.to_string(),
            rebuilt_from_filesystem: false,
            manifest,
        }
    }
}

/// Outcome of loading a state file. Exhaustive by construction; callers
/// match instead of probing for optional keys or catching exceptions.
#[derive(Debug)]
pub enum StateStatus {
    /// Parsed and current.
    Present(Box<DeploymentState>),
    /// A state file from before manifest support. The raw document is kept
    /// so provenance fields survive a rebuild.
    OldVersion(serde_json::Value),
    /// Unparsable content. The reason is kept for the warning log.
    Corrupted(String),
    /// No state file exists: fresh install path.
    Missing,
}

impl StateStatus {
    pub fn label(&self) -> &'static str {
        match self {
            StateStatus::Present(_) => "present",
            StateStatus::OldVersion(_) => "old-version",
            StateStatus::Corrupted(_) => "corrupted",
            StateStatus::Missing => "missing",
        }
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        match self {
            StateStatus::Present(state) => Some(&state.manifest),
            _ => None,
        }
    }
}

/// Load and classify a state file. Never fails: every degraded condition is
/// a status, and I/O problems other than absence read as corruption.
pub fn load(path: &Path) -> StateStatus {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return StateStatus::Missing,
        Err(e) => return StateStatus::Corrupted(format!("unreadable: {e}")),
    };
    let value: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(e) => return StateStatus::Corrupted(format!("invalid JSON: {e}")),
    };
    classify(value)
}

fn classify(value: serde_json::Value) -> StateStatus {
    if !value.is_object() {
        return StateStatus::Corrupted("state document is not an object".to_string());
    }
    if value.get("manifest").is_none() {
        // Pre-manifest format: provenance only.
        return StateStatus::OldVersion(value);
    }
    let version = value
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(1) as u32;
    if version > STATE_SCHEMA_VERSION {
        warn!(
            found = version,
            supported = STATE_SCHEMA_VERSION,
            "state file written by a newer tool; attempting to read anyway"
        );
    }
    let upgraded = match version {
        0 | 1 => upgrade_v1(value),
        _ => value,
    };
    match serde_json::from_value::<DeploymentState>(upgraded) {
        Ok(state) => StateStatus::Present(Box::new(state)),
        Err(e) => StateStatus::Corrupted(format!("schema mismatch: {e}")),
    }
}

/// v1 → v2: the manifest was already embedded but the document carried no
/// schema tag and named the tool version field differently.
fn upgrade_v1(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "schema_version".to_string(),
            serde_json::json!(STATE_SCHEMA_VERSION),
        );
        if !obj.contains_key("tool_version") {
            // Early releases named this field sideload_version.
            let legacy = obj
                .get("sideload_version")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            obj.insert("tool_version".to_string(), serde_json::json!(legacy));
        }
        if !obj.contains_key("src_hash") {
            let hash = obj
                .get("manifest")
                .and_then(|m| m.get("hash"))
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            obj.insert("src_hash".to_string(), hash);
        }
        if let Some(installed) = obj.get("installed_at").and_then(serde_json::Value::as_f64) {
            // Early releases wrote fractional timestamps.
            obj.insert(
                "installed_at".to_string(),
                serde_json::json!(installed as i64),
            );
        }
    }
    value
}

/// Atomically write the state file.
pub fn save(path: &Path, state: &DeploymentState) -> Result<()> {
    let parent = path.parent().ok_or_else(|| SideloadError::State {
        path: path.to_path_buf(),
        reason: "state path has no parent directory".to_string(),
    })?;
    let body = serde_json::to_vec_pretty(state).map_err(|e| SideloadError::State {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut temp = tempfile::Builder::new()
        .prefix(".sideload-state")
        .tempfile_in(parent)
        .map_err(|e| SideloadError::State {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    temp.write_all(&body).map_err(|e| SideloadError::State {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    temp.persist(path).map_err(|e| SideloadError::State {
        path: path.to_path_buf(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FileRecord, Manifest};
    use tempfile::TempDir;

    fn sample_manifest() -> Manifest {
        Manifest::from_records(
            "app",
            Some("app.tgz".to_string()),
            vec![FileRecord {
                path: "default/app.conf".to_string(),
                size: 4,
                mode: 0o644,
                hash: "abcd".to_string(),
            }],
        )
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        let state = DeploymentState::new(sample_manifest(), Some("app.tgz".to_string()));
        save(&path, &state).unwrap();

        match load(&path) {
            StateStatus::Present(loaded) => {
                assert_eq!(*loaded, state);
                assert_eq!(loaded.schema_version, STATE_SCHEMA_VERSION);
            }
            other => panic!("expected Present, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reads_as_missing() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            load(&tmp.path().join(STATE_FILE_NAME)),
            StateStatus::Missing
        ));
    }

    #[test]
    fn garbage_reads_as_corrupted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        fs::write(&path, "{ truncated").unwrap();
        assert!(matches!(load(&path), StateStatus::Corrupted(_)));
    }

    #[test]
    fn pre_manifest_document_reads_as_old_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        fs::write(
            &path,
            r#"{"src_path": "app.tgz", "src_hash": "ff", "installed_at": 1700000000.25}"#,
        )
        .unwrap();
        match load(&path) {
            StateStatus::OldVersion(raw) => {
                assert_eq!(raw["src_path"], "app.tgz");
            }
            other => panic!("expected OldVersion, got {other:?}"),
        }
    }

    #[test]
    fn untagged_document_with_manifest_upgrades_to_current() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        let manifest = sample_manifest();
        let doc = serde_json::json!({
            "src_path": "app.tgz",
            "installed_at": 1700000000.75,
            "sideload_version": "0.17.0",
            "manifest": manifest,
        });
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        match load(&path) {
            StateStatus::Present(state) => {
                assert_eq!(state.schema_version, STATE_SCHEMA_VERSION);
                assert_eq!(state.tool_version, "0.17.0");
                assert_eq!(state.src_hash, manifest.hash);
                assert_eq!(state.installed_at, 1700000000);
            }
            other => panic!("expected Present after upgrade, got {other:?}"),
        }
    }

    #[test]
    fn save_replaces_corrupted_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        fs::write(&path, "not json at all").unwrap();
        assert!(matches!(load(&path), StateStatus::Corrupted(_)));

        let state = DeploymentState::new(sample_manifest(), None);
        save(&path, &state).unwrap();
        assert!(matches!(load(&path), StateStatus::Present(_)));
    }

    #[test]
    fn save_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(STATE_FILE_NAME);
        save(&path, &DeploymentState::new(sample_manifest(), None)).unwrap();
        let stray: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".sideload-state"))
            .collect();
        assert!(stray.is_empty());
    }
}
