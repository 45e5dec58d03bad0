//! Run lifecycle coordination
//!
//! Everything a writer process needs around a run besides its data:
//! - [`lock`]: exclusive per-run lock files
//! - [`reporter`]: progress flag and scheduled heartbeat
//! - [`file_manager`]: file access used by the reporters
//! - [`backup`]: archive and restore a run's chunks

pub mod backup;
pub mod file_manager;
pub mod lock;
pub mod reporter;

pub use backup::{backup_path, backup_run, restore_run_backup};
pub use file_manager::{FileManager, LocalFileManager};
pub use lock::{LockOwner, LockWait, RunLock};
pub use reporter::{
    is_run_active, progress_age, progress_flag, RunStatusReporter, ScheduledStatusReporter,
};

use crate::{Error, Result};

/// Repository directories holding per-run chunks.
pub(crate) const CHUNK_PARTS: [&str; 2] = ["meta", "seqs"];

/// Reject hashes that could address anything but a single directory entry.
pub(crate) fn validate_run_hash(run_hash: &str) -> Result<()> {
    let valid = !run_hash.is_empty()
        && run_hash
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid run hash '{run_hash}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_run_hash() {
        validate_run_hash("0123abcdef").unwrap();
        validate_run_hash("run_1-a").unwrap();
        for bad in ["", "..", "a/b", "a.b", "a b"] {
            assert!(validate_run_hash(bad).is_err(), "{bad}");
        }
    }
}
