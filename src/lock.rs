//! Advisory file locks for the file-backed cluster store.
//!
//! Cross-platform (fs2) advisory locks, one lock file per namespace directory:
//! - Exclusive: object creation and status updates (writers, incl. driver shims).
//! - Shared: status reads by the readiness waiter.
//!
//! Lock file path: <namespace_dir>/LOCK
//! Lock is released on Drop.

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "LOCK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct LockGuard {
    file: fs::File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Acquire a lock on `dir` in the requested mode. Blocks until acquired.
/// The directory is created if missing.
pub fn acquire_lock(dir: &Path, mode: LockMode) -> io::Result<LockGuard> {
    fs::create_dir_all(dir)?;
    let path = dir.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)?;
    match mode {
        LockMode::Shared => file.lock_shared()?,
        LockMode::Exclusive => file.lock_exclusive()?,
    }
    Ok(LockGuard { file, path, mode })
}

pub fn acquire_exclusive_lock(dir: &Path) -> io::Result<LockGuard> {
    acquire_lock(dir, LockMode::Exclusive)
}

pub fn acquire_shared_lock(dir: &Path) -> io::Result<LockGuard> {
    acquire_lock(dir, LockMode::Shared)
}
