//! Content hashing for manifest file records.
//!
//! Hashes are always computed over raw, decompressed file content. Hashing
//! a compressed container would pick up header timestamps and make
//! byte-identical content hash differently run to run.

use crate::error::{Result, SideloadError};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Hash a byte slice, returning the lowercase hex digest.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Stream a reader into a digest.
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut block = [0u8; READ_BLOCK_SIZE];
    loop {
        let n = reader.read(&mut block)?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Hash a file's content. An unreadable file is an error, never a skip.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| SideloadError::io(path, e))?;
    hash_reader(&mut file).map_err(|e| SideloadError::io(path, e))
}
