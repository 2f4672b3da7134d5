//! Deploy Sequences
//!
//! Diffs two manifests into a minimal ordered list of filesystem actions
//! that transforms the installed app content from the old state to the new
//! state. Planning is pure; applying (see [`apply`]) is the only part that
//! touches the filesystem.

pub mod apply;

use crate::manifest::Manifest;
use crate::paths;
use serde::Serialize;
use std::collections::BTreeMap;

/// One discrete, independently retryable filesystem action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "path", rename_all = "snake_case")]
pub enum DeployAction {
    /// Create a directory (and any missing parents). Idempotent.
    EnsureDirectory(String),
    /// Write a file's new content from the source payload, atomically.
    ExtractFile(String),
    /// Delete a file; already absent counts as success.
    RemoveFile(String),
    /// Delete a directory only if it is empty; skipped otherwise.
    RemoveDirectory(String),
}

impl DeployAction {
    pub fn path(&self) -> &str {
        match self {
            DeployAction::EnsureDirectory(p)
            | DeployAction::ExtractFile(p)
            | DeployAction::RemoveFile(p)
            | DeployAction::RemoveDirectory(p) => p,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeployAction::EnsureDirectory(_) => "ensure_directory",
            DeployAction::ExtractFile(_) => "extract_file",
            DeployAction::RemoveFile(_) => "remove_file",
            DeployAction::RemoveDirectory(_) => "remove_directory",
        }
    }
}

/// Ordered action list. Applying it to a directory matching the old
/// manifest leaves the directory matching the new manifest; it is empty
/// exactly when the two manifests share an aggregate hash.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploySequence {
    pub actions: Vec<DeployAction>,
}

impl DeploySequence {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DeployAction> {
        self.actions.iter()
    }

    pub fn extract_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, DeployAction::ExtractFile(_)))
            .count()
    }

    pub fn remove_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, DeployAction::RemoveFile(_)))
            .count()
    }
}

/// Diff `old` against `new` into a deploy sequence.
///
/// Emission order: `EnsureDirectory` (shallowest first), `ExtractFile`,
/// `RemoveFile`, `RemoveDirectory` (deepest first). That satisfies the
/// subtree ordering contract: directories exist before files land in them,
/// and files are gone before their directories are removed. With `old` of
/// `None` (fresh install) the plan degenerates to "ensure every directory,
/// then extract every file".
pub fn plan(old: Option<&Manifest>, new: &Manifest) -> DeploySequence {
    let empty = BTreeMap::new();
    let old_files = old.map(|m| &m.files).unwrap_or(&empty);

    // BTreeMap iteration gives sorted paths throughout, so the output is
    // deterministic and parents sort before children.
    let extracts: Vec<&String> = new
        .files
        .iter()
        .filter(|(path, record)| old_files.get(*path) != Some(*record))
        .map(|(path, _)| path)
        .collect();
    let removals: Vec<&String> = old_files
        .keys()
        .filter(|path| !new.files.contains_key(*path))
        .collect();

    let old_dirs = paths::implied_dirs(old_files.keys().map(String::as_str));
    let new_dirs = paths::implied_dirs(new.files.keys().map(String::as_str));
    let ensure_dirs = paths::implied_dirs(extracts.iter().map(|p| p.as_str()));

    let mut actions = Vec::new();
    // Sorted order places parents first.
    for dir in &ensure_dirs {
        if !old_dirs.contains(dir) {
            actions.push(DeployAction::EnsureDirectory(dir.clone()));
        }
    }
    for path in extracts {
        actions.push(DeployAction::ExtractFile(path.clone()));
    }
    for path in removals {
        actions.push(DeployAction::RemoveFile(path.clone()));
    }
    // Reverse sorted order places children first.
    let remove_dirs: Vec<&String> = old_dirs.difference(&new_dirs).collect();
    for dir in remove_dirs.into_iter().rev() {
        actions.push(DeployAction::RemoveDirectory(dir.clone()));
    }
    DeploySequence { actions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::FileRecord;

    fn manifest(files: &[(&str, &str)]) -> Manifest {
        let records = files.iter().map(|(path, hash)| FileRecord {
            path: path.to_string(),
            size: hash.len() as u64,
            mode: 0o644,
            hash: hash.to_string(),
        });
        Manifest::from_records("app", None, records)
    }

    #[test]
    fn identical_manifests_plan_nothing() {
        let m = manifest(&[("a.conf", "h1"), ("default/b.conf", "h2")]);
        assert!(plan(Some(&m), &m).is_empty());
    }

    #[test]
    fn fresh_install_ensures_dirs_then_extracts_everything() {
        let new = manifest(&[("a.conf", "h1"), ("default/b.conf", "h2")]);
        let seq = plan(None, &new);
        assert_eq!(
            seq.actions,
            vec![
                DeployAction::EnsureDirectory("default".into()),
                DeployAction::ExtractFile("a.conf".into()),
                DeployAction::ExtractFile("default/b.conf".into()),
            ]
        );
    }

    #[test]
    fn content_change_extracts_only_the_changed_file() {
        let old = manifest(&[("a.conf", "h1"), ("default/b.conf", "h2")]);
        let new = manifest(&[("a.conf", "h1"), ("default/b.conf", "h3")]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![DeployAction::ExtractFile("default/b.conf".into())]
        );
    }

    #[test]
    fn mode_change_counts_as_a_change() {
        let old = manifest(&[("bin/run.sh", "h1")]);
        let mut new = old.clone();
        new.files.get_mut("bin/run.sh").unwrap().mode = 0o755;
        let seq = plan(Some(&old), &new);
        assert_eq!(seq.actions, vec![DeployAction::ExtractFile("bin/run.sh".into())]);
    }

    #[test]
    fn removal_drops_file_then_empty_parent() {
        let old = manifest(&[("default/app.conf", "h1"), ("lookups/old.csv", "h2")]);
        let new = manifest(&[("default/app.conf", "h1")]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![
                DeployAction::RemoveFile("lookups/old.csv".into()),
                DeployAction::RemoveDirectory("lookups".into()),
            ]
        );
    }

    #[test]
    fn shared_parent_survives_removal() {
        let old = manifest(&[("default/app.conf", "h1"), ("default/old.conf", "h2")]);
        let new = manifest(&[("default/app.conf", "h1")]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![DeployAction::RemoveFile("default/old.conf".into())]
        );
    }

    #[test]
    fn nested_removals_are_deepest_first() {
        let old = manifest(&[("a/b/c/deep.conf", "h1")]);
        let new = manifest(&[("top.conf", "h2")]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![
                DeployAction::ExtractFile("top.conf".into()),
                DeployAction::RemoveFile("a/b/c/deep.conf".into()),
                DeployAction::RemoveDirectory("a/b/c".into()),
                DeployAction::RemoveDirectory("a/b".into()),
                DeployAction::RemoveDirectory("a".into()),
            ]
        );
    }

    #[test]
    fn new_subtree_ensures_parents_before_children() {
        let old = manifest(&[("default/app.conf", "h1")]);
        let new = manifest(&[
            ("default/app.conf", "h1"),
            ("default/data/ui/nav/default.xml", "h2"),
        ]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![
                DeployAction::EnsureDirectory("default/data".into()),
                DeployAction::EnsureDirectory("default/data/ui".into()),
                DeployAction::EnsureDirectory("default/data/ui/nav".into()),
                DeployAction::ExtractFile("default/data/ui/nav/default.xml".into()),
            ]
        );
    }

    #[test]
    fn update_and_removal_compose() {
        let old = manifest(&[("a.conf", "h1"), ("b.conf", "h2")]);
        let new = manifest(&[("a.conf", "h9"), ("c/d.conf", "h3")]);
        let seq = plan(Some(&old), &new);
        assert_eq!(
            seq.actions,
            vec![
                DeployAction::EnsureDirectory("c".into()),
                DeployAction::ExtractFile("a.conf".into()),
                DeployAction::ExtractFile("c/d.conf".into()),
                DeployAction::RemoveFile("b.conf".into()),
            ]
        );
    }
}
