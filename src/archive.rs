//! Archive reading for app side-loading.
//!
//! Supports `.tar`, `.tar.gz`, `.tgz`, and `.spl` (a gzipped tar) archives
//! containing exactly one top-level application directory. Every entry path
//! passes the safety gate before it is trusted; an unsafe entry rejects the
//! whole archive before anything is written to the target.

use crate::deploy::apply::PayloadResolver;
use crate::error::{Result, SideloadError};
use crate::manifest::DEFAULT_FILE_MODE;
use crate::paths;
use flate2::read::GzDecoder;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// One regular-file entry, with its path made app-relative.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub mode: u32,
    pub payload: Vec<u8>,
}

/// A fully read and validated app archive.
#[derive(Debug)]
pub struct AppArchive {
    /// The single top-level application name.
    pub name: String,
    /// Entries with app-relative paths, in archive order.
    pub entries: Vec<ArchiveEntry>,
}

impl AppArchive {
    /// Read and validate an archive from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = read_entries(path)?;
        split_app(raw)
    }

    /// Consume the archive into a payload resolver for the deploy applier.
    pub fn into_payloads(self) -> ArchivePayloads {
        ArchivePayloads {
            payloads: self
                .entries
                .into_iter()
                .map(|entry| (entry.path, entry.payload))
                .collect(),
        }
    }
}

/// In-memory payload store backing [`PayloadResolver`]. Splunk apps are
/// small configuration trees; holding the decompressed payloads avoids a
/// second pass over the container.
#[derive(Debug)]
pub struct ArchivePayloads {
    payloads: HashMap<String, Vec<u8>>,
}

impl PayloadResolver for ArchivePayloads {
    fn payload(&self, path: &str) -> Result<Vec<u8>> {
        self.payloads.get(path).cloned().ok_or_else(|| {
            SideloadError::usage(format!("archive has no payload for {path:?}"))
        })
    }
}

/// Read every regular-file entry of a tar-family archive, applying the
/// path-safety gate to each entry.
pub fn read_entries(path: &Path) -> Result<Vec<ArchiveEntry>> {
    let kind = archive_kind(path)?;
    let file = File::open(path).map_err(|e| SideloadError::io(path, e))?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(file),
        ArchiveKind::TarGz => Box::new(GzDecoder::new(file)),
    };
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();
    let iter = archive.entries().map_err(|e| SideloadError::Archive {
        path: path.to_path_buf(),
        source: e,
    })?;
    for entry in iter {
        let mut entry = entry.map_err(|e| SideloadError::Archive {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry
            .path()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
            .ok_or_else(|| SideloadError::UnsafePath {
                entry: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
                reason: "non-UTF-8 entry path",
            })?;
        let entry_path = entry_path.trim_end_matches('/').to_string();
        paths::check_relative(&entry_path)?;
        let mode = entry.header().mode().unwrap_or(DEFAULT_FILE_MODE) & 0o7777;
        let mut payload = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut payload)
            .map_err(|e| SideloadError::Archive {
                path: path.to_path_buf(),
                source: e,
            })?;
        entries.push(ArchiveEntry {
            path: entry_path,
            mode,
            payload,
        });
    }
    if entries.is_empty() {
        return Err(SideloadError::usage(format!(
            "archive {} contains no files",
            path.display()
        )));
    }
    Ok(entries)
}

enum ArchiveKind {
    Tar,
    TarGz,
}

fn archive_kind(path: &Path) -> Result<ArchiveKind> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if name.ends_with(".tar") {
        Ok(ArchiveKind::Tar)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") || name.ends_with(".spl") {
        Ok(ArchiveKind::TarGz)
    } else if name.ends_with(".zip") {
        Err(SideloadError::usage(format!(
            "zip archives are not supported; repackage {} as .tar.gz or .spl",
            path.display()
        )))
    } else {
        Err(SideloadError::usage(format!(
            "unrecognized archive format: {}",
            path.display()
        )))
    }
}

/// Verify the archive holds exactly one top-level app and strip that prefix
/// from every entry path.
fn split_app(entries: Vec<ArchiveEntry>) -> Result<AppArchive> {
    let names: BTreeSet<String> = entries
        .iter()
        .map(|entry| match entry.path.split_once('/') {
            Some((top, _)) => top.to_string(),
            None => entry.path.clone(),
        })
        .collect();
    if names.len() != 1 {
        return Err(SideloadError::MultipleApps {
            names: names.into_iter().collect(),
        });
    }
    let name = names.into_iter().next().expect("one app name");
    let mut relative = Vec::with_capacity(entries.len());
    for entry in entries {
        let rel = match entry.path.split_once('/') {
            Some((_, rest)) if !rest.is_empty() => rest.to_string(),
            _ => {
                // A bare top-level entry is the app directory itself showing
                // up as a file, which no valid app archive produces.
                return Err(SideloadError::usage(format!(
                    "entry {:?} is not inside an app directory",
                    entry.path
                )));
            }
        };
        relative.push(ArchiveEntry {
            path: rel,
            mode: entry.mode,
            payload: entry.payload,
        });
    }
    Ok(AppArchive {
        name,
        entries: relative,
    })
}

/// Write a gzipped tar archive of pre-rendered entries. Entry mtimes are
/// zeroed so identical content produces identical containers.
pub fn write_archive<W: io::Write>(
    writer: W,
    app_name: &str,
    entries: &[ArchiveEntry],
) -> io::Result<()> {
    let encoder = flate2::write::GzEncoder::new(writer, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(entry.payload.len() as u64);
        header.set_mode(entry.mode);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(
            &mut header,
            format!("{}/{}", app_name, entry.path),
            entry.payload.as_slice(),
        )?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}
