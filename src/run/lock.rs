//! Per-run exclusive locks
//!
//! A run is locked by holding an exclusive advisory lock on
//! `<repo>/locks/<hash>.lock`. The lock is bound to the open file, so it is
//! released when the owner closes the file or exits. While held, the file
//! carries a JSON description of the owner.

use crate::container::lock_unpoisoned;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOCKS_DIR: &str = "locks";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long [`RunLock::acquire`] waits for a contended lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockWait {
    /// Fail immediately with `LockBusy` (default)
    #[default]
    NoWait,
    /// Poll until the lock frees up or the timeout elapses
    Timeout(Duration),
}

/// Owner record written into a held lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// Process id of the holder
    pub pid: u32,
    /// Locked run
    pub run_hash: String,
    /// When the lock was taken
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive lock on one run.
///
/// Dropping the lock releases it.
#[derive(Debug)]
pub struct RunLock {
    run_hash: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl RunLock {
    /// Lock file location for `run_hash` inside `repo_path`.
    #[must_use]
    pub fn lock_path(repo_path: &Path, run_hash: &str) -> PathBuf {
        repo_path.join(LOCKS_DIR).join(format!("{run_hash}.lock"))
    }

    /// Acquire the lock for `run_hash`.
    ///
    /// # Errors
    /// `LockBusy` if another holder keeps the lock past `wait`, `InvalidInput`
    /// for a malformed hash, `Io` if the lock file cannot be created.
    pub fn acquire(repo_path: &Path, run_hash: &str, wait: LockWait) -> Result<Self> {
        super::validate_run_hash(run_hash)?;
        let path = Self::lock_path(repo_path, run_hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let deadline = match wait {
            LockWait::NoWait => None,
            LockWait::Timeout(timeout) => Some(Instant::now() + timeout),
        };
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    match deadline {
                        Some(deadline) if Instant::now() < deadline => {
                            std::thread::sleep(POLL_INTERVAL);
                        }
                        _ => {
                            debug!(run_hash, "run lock busy");
                            return Err(Error::LockBusy {
                                run_hash: run_hash.to_string(),
                            });
                        }
                    }
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let owner = LockOwner {
            pid: std::process::id(),
            run_hash: run_hash.to_string(),
            acquired_at: Utc::now(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&serde_json::to_vec(&owner)?)?;
        file.flush()?;

        debug!(run_hash, path = %path.display(), "run lock acquired");
        Ok(Self {
            run_hash: run_hash.to_string(),
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Owner recorded in the lock file, if the run is currently locked.
    ///
    /// # Errors
    /// Returns error if the lock file exists but cannot be read.
    pub fn owner(repo_path: &Path, run_hash: &str) -> Result<Option<LockOwner>> {
        let path = Self::lock_path(repo_path, run_hash);
        let mut contents = String::new();
        match File::open(&path) {
            Ok(mut file) => file.read_to_string(&mut contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Get the locked run hash.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    /// Get the lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle still holds the lock.
    #[must_use]
    pub fn is_held(&self) -> bool {
        lock_unpoisoned(&self.file).is_some()
    }

    /// Release the lock. Releasing twice is a no-op.
    ///
    /// # Errors
    /// Returns error if the owner record cannot be cleared or the lock cannot
    /// be dropped.
    pub fn release(&self) -> Result<()> {
        let Some(file) = lock_unpoisoned(&self.file).take() else {
            return Ok(());
        };
        file.set_len(0)?;
        FileExt::unlock(&file)?;
        debug!(run_hash = %self.run_hash, "run lock released");
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(run_hash = %self.run_hash, error = %e, "failed to release run lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let lock = RunLock::acquire(dir.path(), "abc", LockWait::NoWait).unwrap();
        let err = RunLock::acquire(dir.path(), "abc", LockWait::NoWait).unwrap_err();
        assert!(matches!(err, Error::LockBusy { ref run_hash } if run_hash == "abc"));

        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        RunLock::acquire(dir.path(), "abc", LockWait::NoWait).unwrap();
    }

    #[test]
    fn test_distinct_runs_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let _a = RunLock::acquire(dir.path(), "a", LockWait::NoWait).unwrap();
        let _b = RunLock::acquire(dir.path(), "b", LockWait::NoWait).unwrap();
    }

    #[test]
    fn test_owner_record() {
        let dir = TempDir::new().unwrap();
        assert_eq!(RunLock::owner(dir.path(), "r1").unwrap(), None);

        let lock = RunLock::acquire(dir.path(), "r1", LockWait::NoWait).unwrap();
        let owner = RunLock::owner(dir.path(), "r1").unwrap().unwrap();
        assert_eq!(owner.pid, std::process::id());
        assert_eq!(owner.run_hash, "r1");
        assert!(lock.path().ends_with("locks/r1.lock"));

        drop(lock);
        assert_eq!(RunLock::owner(dir.path(), "r1").unwrap(), None);
    }

    #[test]
    fn test_timeout_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let lock = RunLock::acquire(dir.path(), "r", LockWait::NoWait).unwrap();
        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            drop(lock);
        });
        let second = RunLock::acquire(dir.path(), "r", LockWait::Timeout(Duration::from_secs(5)));
        releaser.join().unwrap();
        assert!(second.is_ok());
    }

    #[test]
    fn test_timeout_expires() {
        let dir = TempDir::new().unwrap();
        let _lock = RunLock::acquire(dir.path(), "r", LockWait::NoWait).unwrap();
        let start = Instant::now();
        let err = RunLock::acquire(dir.path(), "r", LockWait::Timeout(Duration::from_millis(120)))
            .unwrap_err();
        assert!(matches!(err, Error::LockBusy { .. }));
        assert!(start.elapsed() >= Duration::from_millis(120));
    }
}
