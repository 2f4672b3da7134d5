//! Advisory deployment locking.
//!
//! One lock per (destination, app) pair, held across plan, apply, and state
//! persistence. Acquisition is fail-fast: a held lock means another
//! deployment of the same app is in progress, and the orchestrator retries
//! rather than queueing. The lock file lives beside the app directory, not
//! inside it, so manifest scans never see it.

use crate::error::{Result, SideloadError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock over one app deployment. Released on drop.
#[derive(Debug)]
pub struct DeployLock {
    file: File,
    path: PathBuf,
}

impl DeployLock {
    /// Lock file path for an app under `dest`.
    pub fn lock_path(dest: &Path, app_name: &str) -> PathBuf {
        dest.join(format!(".{app_name}.sideload.lock"))
    }

    /// Acquire the lock, failing immediately if it is already held.
    pub fn acquire(dest: &Path, app_name: &str) -> Result<Self> {
        let path = Self::lock_path(dest, app_name);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| SideloadError::io(&path, e))?;
        file.try_lock_exclusive()
            .map_err(|_| SideloadError::LockHeld { path: path.clone() })?;
        // Holder pid, for diagnosing a stuck deployment. Written only once
        // the lock is held, so a losing contender cannot clobber it.
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!(lock = %path.display(), "acquired deployment lock");
        Ok(DeployLock { file, path })
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = fs::remove_file(&self.path);
        debug!(lock = %self.path.display(), "released deployment lock");
    }
}
