//! App packaging.
//!
//! Builds a deployable `.tar.gz` app archive from a source directory. File
//! content flows through a render-handler registry: an ordered list of
//! handlers tried in registration order, first match wins, with a plain
//! copy handler as the terminal default. The registry is constructed per
//! operation and passed by reference, so no render state survives between
//! invocations.

use crate::archive::{self, ArchiveEntry};
use crate::error::{Result, SideloadError};
use crate::manifest::{builder, hasher, FileRecord, Manifest};
use crate::paths;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Transforms a source file into its packaged bytes.
pub trait RenderHandler {
    /// Whether this handler renders the given app-relative path.
    fn matches(&self, path: &str) -> bool;
    /// Produce the packaged content for a matched file.
    fn render(&self, source: &Path) -> Result<Vec<u8>>;
}

/// Verbatim copy. Matches everything; registered last.
pub struct CopyHandler;

impl RenderHandler for CopyHandler {
    fn matches(&self, _path: &str) -> bool {
        true
    }

    fn render(&self, source: &Path) -> Result<Vec<u8>> {
        std::fs::read(source).map_err(|e| SideloadError::io(source, e))
    }
}

/// Ordered render handlers for one packaging operation.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn RenderHandler>>,
}

impl HandlerRegistry {
    /// Registry with only the copy fallback.
    pub fn with_defaults() -> Self {
        HandlerRegistry {
            handlers: vec![Box::new(CopyHandler)],
        }
    }

    /// Register a handler ahead of those already present.
    pub fn register_front(&mut self, handler: Box<dyn RenderHandler>) {
        self.handlers.insert(0, handler);
    }

    /// Render a file through the first matching handler.
    pub fn render(&self, rel_path: &str, source: &Path) -> Result<Vec<u8>> {
        for handler in &self.handlers {
            if handler.matches(rel_path) {
                return handler.render(source);
            }
        }
        Err(SideloadError::usage(format!(
            "no render handler matched {rel_path:?}"
        )))
    }
}

/// Build a `.tar.gz` app archive from `source_dir`.
///
/// Returns the archive path and the manifest of its rendered content. The
/// app name is the source directory's name. `exclude` filters app-relative
/// paths out of the package (build artifacts, VCS litter).
pub fn build_archive(
    source_dir: &Path,
    output: &Path,
    registry: &HandlerRegistry,
    exclude: Option<builder::ExcludeFn<'_>>,
) -> Result<(PathBuf, Manifest)> {
    if !source_dir.is_dir() {
        return Err(SideloadError::usage(format!(
            "source directory {} does not exist",
            source_dir.display()
        )));
    }
    let app_name = source_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SideloadError::usage(format!(
                "cannot derive an app name from {}",
                source_dir.display()
            ))
        })?;

    let mut entries = Vec::new();
    for dir_entry in WalkDir::new(source_dir).sort_by_file_name() {
        let dir_entry = dir_entry.map_err(|e| {
            let path = e.path().unwrap_or(source_dir).to_path_buf();
            match e.into_io_error() {
                Some(io) => SideloadError::io(path, io),
                None => SideloadError::usage(format!("walk error under {}", source_dir.display())),
            }
        })?;
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let rel = dir_entry
            .path()
            .strip_prefix(source_dir)
            .expect("walkdir yields paths under its root");
        let Some(rel) = paths::to_manifest(rel) else {
            return Err(SideloadError::usage(format!(
                "non-portable file name under {}: {:?}",
                source_dir.display(),
                rel
            )));
        };
        if exclude.map(|f| f(&rel)).unwrap_or(false) {
            continue;
        }
        let payload = registry.render(&rel, dir_entry.path())?;
        let meta = dir_entry.metadata().map_err(|e| match e.into_io_error() {
            Some(io) => SideloadError::io(dir_entry.path(), io),
            None => SideloadError::usage(format!(
                "metadata error on {}",
                dir_entry.path().display()
            )),
        })?;
        entries.push(ArchiveEntry {
            path: rel,
            mode: source_mode(&meta),
            payload,
        });
    }
    if entries.is_empty() {
        return Err(SideloadError::usage(format!(
            "source directory {} contains no files",
            source_dir.display()
        )));
    }

    let file = File::create(output).map_err(|e| SideloadError::io(output, e))?;
    archive::write_archive(file, app_name, &entries).map_err(|e| SideloadError::io(output, e))?;

    let records: Vec<FileRecord> = entries
        .iter()
        .map(|entry| FileRecord {
            path: entry.path.clone(),
            size: entry.payload.len() as u64,
            mode: entry.mode,
            hash: hasher::hash_bytes(&entry.payload),
        })
        .collect();
    let manifest = Manifest::from_records(
        app_name,
        Some(source_dir.display().to_string()),
        records,
    );
    info!(
        app = app_name,
        files = manifest.file_count(),
        archive = %output.display(),
        "packaged app archive"
    );
    Ok((output.to_path_buf(), manifest))
}

#[cfg(unix)]
fn source_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn source_mode(_meta: &std::fs::Metadata) -> u32 {
    crate::manifest::DEFAULT_FILE_MODE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::AppArchive;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Uppercases `.upper` files; used to observe handler priority.
    struct UpperHandler;

    impl RenderHandler for UpperHandler {
        fn matches(&self, path: &str) -> bool {
            path.ends_with(".upper")
        }

        fn render(&self, source: &Path) -> Result<Vec<u8>> {
            let text = fs::read_to_string(source).map_err(|e| SideloadError::io(source, e))?;
            Ok(text.to_uppercase().into_bytes())
        }
    }

    #[test]
    fn packaged_archive_matches_its_manifest() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("ta_custom");
        write(&source, "default/app.conf", "[launcher]\nversion = 1.0\n");
        write(&source, "bin/collect.sh", "#!/bin/sh\n");

        let output = tmp.path().join("ta_custom.tgz");
        let registry = HandlerRegistry::with_defaults();
        let (path, manifest) = build_archive(&source, &output, &registry, None).unwrap();

        let opened = AppArchive::open(&path).unwrap();
        assert_eq!(opened.name, "ta_custom");
        let from_archive = builder::from_entries("ta_custom", None, &opened.entries);
        assert_eq!(from_archive.hash, manifest.hash);
    }

    #[test]
    fn first_matching_handler_wins() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("app");
        write(&source, "banner.upper", "loud");
        write(&source, "quiet.txt", "quiet");

        let mut registry = HandlerRegistry::with_defaults();
        registry.register_front(Box::new(UpperHandler));
        let output = tmp.path().join("app.tgz");
        build_archive(&source, &output, &registry, None).unwrap();

        let opened = AppArchive::open(&output).unwrap();
        let banner = opened
            .entries
            .iter()
            .find(|e| e.path == "banner.upper")
            .unwrap();
        assert_eq!(banner.payload, b"LOUD");
        let quiet = opened.entries.iter().find(|e| e.path == "quiet.txt").unwrap();
        assert_eq!(quiet.payload, b"quiet");
    }

    #[test]
    fn exclude_filters_paths_out_of_the_package() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("app");
        write(&source, "default/app.conf", "x");
        write(&source, "build/junk.o", "y");

        let registry = HandlerRegistry::with_defaults();
        let exclude = |path: &str| path.starts_with("build/");
        let output = tmp.path().join("app.tgz");
        let (_, manifest) = build_archive(&source, &output, &registry, Some(&exclude)).unwrap();
        assert_eq!(manifest.file_count(), 1);
        assert!(!manifest.files.contains_key("build/junk.o"));
    }

    #[test]
    fn repackaging_identical_content_keeps_the_hash() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("app");
        write(&source, "default/app.conf", "stable");

        let registry = HandlerRegistry::with_defaults();
        let (_, first) =
            build_archive(&source, &tmp.path().join("a.tgz"), &registry, None).unwrap();
        let (_, second) =
            build_archive(&source, &tmp.path().join("b.tgz"), &registry, None).unwrap();
        assert_eq!(first.hash, second.hash);
    }
}
