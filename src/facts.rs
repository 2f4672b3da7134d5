//! Installation facts.
//!
//! Read-only summaries for orchestrators: what an archive contains before
//! deployment, and what the side-car state says about an installed app.
//! Splunk configuration semantics are out of scope; facts stop at names,
//! counts, and provenance.

use crate::archive::AppArchive;
use crate::error::Result;
use crate::manifest::builder;
use crate::state::{self, StateStatus, STATE_FILE_NAME};
use serde::Serialize;
use std::path::Path;

/// What a source archive would deploy.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFacts {
    pub name: String,
    pub file_count: usize,
    /// Paths carrying target-side configuration (`local/`, `local.meta`).
    pub local_files: Vec<String>,
    /// Aggregate content hash; identical content in a repackaged container
    /// yields the same value.
    pub hash: String,
}

/// Compute facts for a source archive without touching any target.
pub fn archive_facts(archive_path: &Path) -> Result<ArchiveFacts> {
    let archive = AppArchive::open(archive_path)?;
    let manifest = builder::from_entries(
        &archive.name,
        Some(archive_path.display().to_string()),
        &archive.entries,
    );
    Ok(ArchiveFacts {
        name: archive.name,
        file_count: manifest.file_count(),
        local_files: manifest.local_files(),
        hash: manifest.hash,
    })
}

/// State of an installed app as recorded by its side-car file.
#[derive(Debug, Clone, Serialize)]
pub struct InstalledFacts {
    pub app_dir: String,
    /// present, old-version, corrupted, or missing.
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_count: Option<usize>,
}

/// Summarize the recorded deployment state of an installed app. A degraded
/// state file is reported, never an error.
pub fn installed_facts(app_dir: &Path, state_file: Option<&str>) -> InstalledFacts {
    let state_path = app_dir.join(state_file.unwrap_or(STATE_FILE_NAME));
    let status = state::load(&state_path);
    let mut facts = InstalledFacts {
        app_dir: app_dir.display().to_string(),
        state: status.label(),
        src_path: None,
        src_hash: None,
        installed_at: None,
        tool_version: None,
        file_count: None,
    };
    match status {
        StateStatus::Present(state) => {
            facts.src_path = state.src_path.clone();
            facts.src_hash = Some(state.src_hash.clone());
            facts.installed_at = Some(state.installed_at);
            facts.tool_version = Some(state.tool_version.clone());
            facts.file_count = Some(state.manifest.file_count());
        }
        StateStatus::OldVersion(raw) => {
            facts.src_path = raw
                .get("src_path")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            facts.src_hash = raw
                .get("src_hash")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string);
            facts.installed_at = raw
                .get("installed_at")
                .and_then(serde_json::Value::as_f64)
                .map(|t| t as i64);
        }
        StateStatus::Corrupted(_) | StateStatus::Missing => {}
    }
    facts
}
