//! Single-run backup and restore
//!
//! A backup is a gzip-compressed tar of `meta/chunks/<hash>` and
//! `seqs/chunks/<hash>`, stored with repository-relative entry names at
//! `bcp/<hash>`.

use super::file_manager::{FileManager, LocalFileManager};
use super::reporter::progress_flag;
use super::{validate_run_hash, CHUNK_PARTS};
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_DIR: &str = "bcp";

/// Archive location for `run_hash`.
#[must_use]
pub fn backup_path(repo_path: &Path, run_hash: &str) -> PathBuf {
    repo_path.join(BACKUP_DIR).join(run_hash)
}

fn chunk_rel(part: &str, run_hash: &str) -> PathBuf {
    Path::new(part).join("chunks").join(run_hash)
}

fn backup_failed(run_hash: &str, reason: impl std::fmt::Display) -> Error {
    Error::BackupFailed {
        run_hash: run_hash.to_string(),
        reason: reason.to_string(),
    }
}

/// Archive the run's chunks into `bcp/<hash>`, replacing any older archive.
///
/// Returns the archive path.
///
/// # Errors
/// `BackupFailed` if either chunk directory is missing or the archive cannot
/// be written.
pub fn backup_run(repo_path: &Path, run_hash: &str) -> Result<PathBuf> {
    validate_run_hash(run_hash)?;
    for part in CHUNK_PARTS {
        let rel = chunk_rel(part, run_hash);
        if !repo_path.join(&rel).is_dir() {
            return Err(backup_failed(run_hash, format!("{} does not exist", rel.display())));
        }
    }

    let target = backup_path(repo_path, run_hash);
    let partial = target.with_extension("partial");
    let written = fs::create_dir_all(repo_path.join(BACKUP_DIR))
        .and_then(|()| write_archive(repo_path, run_hash, &partial))
        .and_then(|()| fs::rename(&partial, &target));
    if let Err(e) = written {
        discard_partial(run_hash, &partial);
        return Err(backup_failed(run_hash, e));
    }

    debug!(run_hash, archive = %target.display(), "run backed up");
    Ok(target)
}

/// Remove an unfinished archive. Returns whether none is left behind.
fn discard_partial(run_hash: &str, partial: &Path) -> bool {
    match fs::remove_file(partial) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(
                run_hash,
                partial = %partial.display(),
                error = %e,
                "failed to remove unfinished backup"
            );
            false
        }
    }
}

fn write_archive(repo_path: &Path, run_hash: &str, dest: &Path) -> io::Result<()> {
    let encoder = GzEncoder::new(File::create(dest)?, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    for part in CHUNK_PARTS {
        let rel = chunk_rel(part, run_hash);
        builder.append_dir_all(&rel, repo_path.join(&rel))?;
    }
    let file = builder.into_inner()?.finish()?;
    file.sync_all()
}

/// Replace the run's chunks with the contents of its backup.
///
/// Both chunk directories are removed before unpacking. On success the
/// run's progress flag is touched.
///
/// # Errors
/// `NoBackupFound` when no archive exists; `BackupFailed` when the archive is
/// unreadable or names a path outside the run's chunk directories (the chunk
/// directories are left removed in that case).
pub fn restore_run_backup(repo_path: &Path, run_hash: &str) -> Result<()> {
    validate_run_hash(run_hash)?;
    let source = backup_path(repo_path, run_hash);
    if !source.is_file() {
        return Err(Error::NoBackupFound(run_hash.to_string()));
    }

    remove_chunks(repo_path, run_hash)?;
    if let Err(e) = unpack_archive(repo_path, run_hash, &source) {
        warn!(run_hash, error = %e, "restore aborted");
        remove_chunks(repo_path, run_hash)?;
        return Err(e);
    }

    LocalFileManager::new(repo_path).touch(&progress_flag(run_hash))?;
    info!(run_hash, "run restored from backup");
    Ok(())
}

fn remove_chunks(repo_path: &Path, run_hash: &str) -> Result<()> {
    for part in CHUNK_PARTS {
        match fs::remove_dir_all(repo_path.join(chunk_rel(part, run_hash))) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
    }
    Ok(())
}

fn unpack_archive(repo_path: &Path, run_hash: &str, source: &Path) -> Result<()> {
    let allowed: Vec<PathBuf> = CHUNK_PARTS.iter().map(|p| chunk_rel(p, run_hash)).collect();
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(source)?));
    let entries = archive.entries().map_err(|e| backup_failed(run_hash, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| backup_failed(run_hash, e))?;
        let path = entry.path().map_err(|e| backup_failed(run_hash, e))?.into_owned();
        let plain = path.components().all(|c| matches!(c, Component::Normal(_)));
        if !plain || !allowed.iter().any(|a| path.starts_with(a)) {
            return Err(backup_failed(
                run_hash,
                format!("archive entry {} is outside the run's chunk directories", path.display()),
            ));
        }
        entry
            .unpack_in(repo_path)
            .map_err(|e| backup_failed(run_hash, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_run(repo: &Path, hash: &str) {
        for part in CHUNK_PARTS {
            let dir = repo.join(part).join("chunks").join(hash);
            fs::create_dir_all(dir.join("nested")).unwrap();
            fs::write(dir.join("data.log"), format!("{part}-{hash}")).unwrap();
            fs::write(dir.join("nested/blob"), vec![7u8; 4096]).unwrap();
        }
    }

    #[test]
    fn test_backup_restore_round_trip() {
        let repo = TempDir::new().unwrap();
        seed_run(repo.path(), "r1");
        let archive = backup_run(repo.path(), "r1").unwrap();
        assert_eq!(archive, repo.path().join("bcp/r1"));
        assert!(!repo.path().join("bcp/r1.partial").exists());

        fs::write(repo.path().join("meta/chunks/r1/data.log"), "clobbered").unwrap();
        fs::write(repo.path().join("seqs/chunks/r1/extra"), "extra").unwrap();

        restore_run_backup(repo.path(), "r1").unwrap();
        assert_eq!(
            fs::read_to_string(repo.path().join("meta/chunks/r1/data.log")).unwrap(),
            "meta-r1"
        );
        assert!(!repo.path().join("seqs/chunks/r1/extra").exists());
        assert_eq!(fs::read(repo.path().join("seqs/chunks/r1/nested/blob")).unwrap(), vec![7u8; 4096]);
        assert!(repo.path().join("meta/progress/r1").exists());
    }

    #[test]
    fn test_backup_requires_both_chunks() {
        let repo = TempDir::new().unwrap();
        seed_run(repo.path(), "r2");
        fs::remove_dir_all(repo.path().join("seqs/chunks/r2")).unwrap();
        assert!(matches!(
            backup_run(repo.path(), "r2").unwrap_err(),
            Error::BackupFailed { .. }
        ));
    }

    #[test]
    fn test_restore_without_backup() {
        let repo = TempDir::new().unwrap();
        seed_run(repo.path(), "r3");
        let err = restore_run_backup(repo.path(), "r3").unwrap_err();
        assert!(matches!(err, Error::NoBackupFound(ref h) if h == "r3"));
        assert!(repo.path().join("meta/chunks/r3/data.log").exists());
    }

    #[test]
    fn test_restore_rejects_foreign_entries() {
        let repo = TempDir::new().unwrap();
        seed_run(repo.path(), "r4");
        fs::create_dir_all(repo.path().join("bcp")).unwrap();

        let encoder = GzEncoder::new(
            File::create(repo.path().join("bcp/r4")).unwrap(),
            flate2::Compression::default(),
        );
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        header.set_size(3);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "meta/other/x", &b"bad"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = restore_run_backup(repo.path(), "r4").unwrap_err();
        assert!(matches!(err, Error::BackupFailed { .. }));
        assert!(!repo.path().join("meta/other/x").exists());
        assert!(!repo.path().join("meta/chunks/r4").exists());
    }

    #[test]
    fn test_failed_backup_leaves_no_partial_archive() {
        let repo = TempDir::new().unwrap();
        seed_run(repo.path(), "r5");
        let target = backup_path(repo.path(), "r5");
        fs::create_dir_all(target.join("occupied")).unwrap();

        assert!(matches!(
            backup_run(repo.path(), "r5"),
            Err(Error::BackupFailed { .. })
        ));
        assert!(!target.with_extension("partial").exists());
    }

    #[test]
    fn test_discard_partial_reports_leftovers() {
        let repo = TempDir::new().unwrap();
        let partial = repo.path().join("r6.partial");
        assert!(discard_partial("r6", &partial));

        fs::create_dir(&partial).unwrap();
        assert!(!discard_partial("r6", &partial));
        assert!(partial.exists());
    }

    #[test]
    fn test_rejects_path_like_hash() {
        let repo = TempDir::new().unwrap();
        assert!(matches!(backup_run(repo.path(), "../x"), Err(Error::InvalidInput(_))));
    }
}
