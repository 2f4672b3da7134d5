//! Error types for sideload operations.
//!
//! Failures carry enough context (path, action, underlying OS error) to
//! diagnose without re-running in a verbose mode. Recoverable conditions
//! (legacy or corrupted state files) are not errors at all; they surface as
//! [`crate::state::StateStatus`] variants instead.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SideloadError>;

#[derive(Debug, Error)]
pub enum SideloadError {
    /// Caller misuse: bad arguments, missing paths, unsupported formats.
    /// Not retryable.
    #[error("{0}")]
    Usage(String),

    /// An archive or directory contains more than one top-level
    /// application directory.
    #[error("expected exactly one top-level app, found {}: {}", names.len(), names.join(", "))]
    MultipleApps { names: Vec<String> },

    /// An entry path failed the safety gate. Raised before any byte is
    /// written to the target.
    #[error("unsafe entry path {entry:?}: {reason}")]
    UnsafePath { entry: String, reason: &'static str },

    /// I/O failure outside of sequence application.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed archive container.
    #[error("unable to read archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A deploy action failed mid-sequence. The remaining actions were
    /// aborted and the state file was left untouched, so the next attempt
    /// recomputes the same (or smaller) diff.
    #[error("deploy action {action} failed on {path:?}: {source}")]
    Apply {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// Another deployment currently holds the lock for this app.
    #[error("deployment lock {} is already held by another process", path.display())]
    LockHeld { path: PathBuf },

    /// The state file could not be persisted.
    #[error("failed to write state file {}: {reason}", path.display())]
    State { path: PathBuf, reason: String },
}

impl SideloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SideloadError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        SideloadError::Usage(msg.into())
    }
}
