//! Application Manifests
//!
//! A manifest is a content-addressed description of every file in a Splunk
//! app: one record per file plus an aggregate hash. Two manifests with equal
//! aggregate hashes describe identical app content, independent of where the
//! files came from (directory scan, tar, tgz) and of filesystem metadata the
//! design does not track (mtimes, iteration order).

pub mod builder;
pub mod hasher;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Permission bits recorded on platforms without POSIX modes.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Identity of a single file within an app.
///
/// Two records are equal iff path, size, mode, and hash all match. Records
/// are never mutated in place; a changed file produces a new record that
/// replaces the old one by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// App-relative path with `/` separators, unique within a manifest.
    pub path: String,
    /// Byte length of the file content.
    pub size: u64,
    /// POSIX permission bits restored on extraction.
    pub mode: u32,
    /// Hex content digest of the file's bytes.
    pub hash: String,
}

/// Content-addressed description of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Application name (the top-level directory name).
    pub name: String,
    /// Originating archive or directory. Informational only; not hashed.
    #[serde(default)]
    pub source: Option<String>,
    /// Aggregate content hash over the sorted (path, hash, mode) triples.
    pub hash: String,
    /// Records keyed by app-relative path. Serialized as a sorted array.
    #[serde(
        serialize_with = "serialize_files",
        deserialize_with = "deserialize_files"
    )]
    pub files: BTreeMap<String, FileRecord>,
}

impl Manifest {
    /// Assemble a manifest from file records, computing the aggregate hash.
    pub fn from_records<I>(name: impl Into<String>, source: Option<String>, records: I) -> Self
    where
        I: IntoIterator<Item = FileRecord>,
    {
        let files: BTreeMap<String, FileRecord> = records
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();
        let hash = aggregate_hash(&files);
        Manifest {
            name: name.into(),
            source,
            hash,
            files,
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Paths under `local/` or ending in `local.meta`. These carry
    /// target-side configuration that upgrades are expected to preserve.
    pub fn local_files(&self) -> Vec<String> {
        self.files
            .keys()
            .filter(|p| p.starts_with("local/") || p.ends_with("local.meta"))
            .cloned()
            .collect()
    }
}

/// Aggregate hash over the canonical (path, hash, mode) triples.
///
/// The map is already sorted by path, so the digest is deterministic across
/// platforms and independent of the order files were discovered in. Mode is
/// included because a permission-bit change must redeploy the file; size is
/// excluded as it is already pinned down by the content hash.
pub fn aggregate_hash(files: &BTreeMap<String, FileRecord>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (path, record) in files {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
        hasher.update(record.hash.as_bytes());
        hasher.update(b"\0");
        hasher.update(format!("{:o}", record.mode).as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

fn serialize_files<S>(files: &BTreeMap<String, FileRecord>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(files.values())
}

fn deserialize_files<'de, D>(deserializer: D) -> Result<BTreeMap<String, FileRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = Vec::<FileRecord>::deserialize(deserializer)?;
    Ok(records
        .into_iter()
        .map(|record| (record.path.clone(), record))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, hash: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            size: 10,
            mode: 0o644,
            hash: hash.to_string(),
        }
    }

    #[test]
    fn aggregate_hash_independent_of_insertion_order() {
        let a = Manifest::from_records(
            "app",
            None,
            vec![record("a.conf", "h1"), record("default/b.conf", "h2")],
        );
        let b = Manifest::from_records(
            "app",
            None,
            vec![record("default/b.conf", "h2"), record("a.conf", "h1")],
        );
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn aggregate_hash_changes_on_content_change() {
        let a = Manifest::from_records("app", None, vec![record("a.conf", "h1")]);
        let b = Manifest::from_records("app", None, vec![record("a.conf", "h2")]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn aggregate_hash_changes_on_add_and_remove() {
        let one = Manifest::from_records("app", None, vec![record("a.conf", "h1")]);
        let two = Manifest::from_records(
            "app",
            None,
            vec![record("a.conf", "h1"), record("b.conf", "h2")],
        );
        assert_ne!(one.hash, two.hash);
    }

    #[test]
    fn aggregate_hash_tracks_mode_changes() {
        let mut rec = record("bin/run.sh", "h1");
        let a = Manifest::from_records("app", None, vec![rec.clone()]);
        rec.mode = 0o755;
        let b = Manifest::from_records("app", None, vec![rec]);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn aggregate_hash_ignores_size() {
        // Size participates in record equality but the content hash already
        // pins it down; it adds nothing to content identity.
        let mut rec = record("a.conf", "h1");
        let a = Manifest::from_records("app", None, vec![rec.clone()]);
        rec.size = 999;
        let b = Manifest::from_records("app", None, vec![rec]);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn record_equality_requires_all_fields() {
        let base = record("a.conf", "h1");
        let mut changed = base.clone();
        changed.mode = 0o755;
        assert_ne!(base, changed);
        let mut changed = base.clone();
        changed.size = 11;
        assert_ne!(base, changed);
        assert_eq!(base, base.clone());
    }

    #[test]
    fn files_serialize_as_sorted_array() {
        let manifest = Manifest::from_records(
            "app",
            None,
            vec![record("z.conf", "h2"), record("a.conf", "h1")],
        );
        let json = serde_json::to_value(&manifest).unwrap();
        let files = json["files"].as_array().unwrap();
        assert_eq!(files[0]["path"], "a.conf");
        assert_eq!(files[1]["path"], "z.conf");

        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn local_files_selected_by_path() {
        let manifest = Manifest::from_records(
            "app",
            None,
            vec![
                record("default/app.conf", "h1"),
                record("local/app.conf", "h2"),
                record("metadata/local.meta", "h3"),
            ],
        );
        let local = manifest.local_files();
        assert_eq!(local, vec!["local/app.conf", "metadata/local.meta"]);
    }
}
