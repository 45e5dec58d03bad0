//! Flag-file access for status reporting

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Minimal file surface used by status reporters.
///
/// Names are relative to the manager's base directory and use `/` as the
/// separator.
pub trait FileManager: Send + Sync {
    /// Latest (greatest) file name matching a glob `pattern`.
    ///
    /// # Errors
    /// `InvalidInput` for a malformed pattern.
    fn poll(&self, pattern: &str) -> Result<Option<String>>;

    /// Whether `file_name` exists.
    ///
    /// # Errors
    /// Returns error if the file system cannot be queried.
    fn exists(&self, file_name: &str) -> Result<bool>;

    /// Create the file if needed and bump its modification time.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    fn touch(&self, file_name: &str) -> Result<()>;

    /// Replace the file's contents, creating parent directories.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    fn write(&self, file_name: &str, contents: &[u8]) -> Result<()>;

    /// Remove the file; a missing file is not an error.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be removed.
    fn delete(&self, file_name: &str) -> Result<()>;
}

/// [`FileManager`] over a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileManager {
    base: PathBuf,
}

impl LocalFileManager {
    /// Create a manager rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Get the root directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, file_name: &str) -> PathBuf {
        self.base.join(file_name)
    }
}

impl FileManager for LocalFileManager {
    fn poll(&self, pattern: &str) -> Result<Option<String>> {
        let base = self.base.to_str().ok_or_else(|| {
            Error::InvalidInput(format!("non UTF-8 path: {}", self.base.display()))
        })?;
        let full = format!("{}/{pattern}", glob::Pattern::escape(base.trim_end_matches('/')));
        let mut latest: Option<PathBuf> = None;
        for entry in glob::glob(&full)? {
            let Ok(path) = entry else { continue };
            if latest.as_ref().map_or(true, |l| path > *l) {
                latest = Some(path);
            }
        }
        Ok(latest.and_then(|p| {
            p.strip_prefix(&self.base)
                .ok()
                .map(|rel| rel.to_string_lossy().into_owned())
        }))
    }

    fn exists(&self, file_name: &str) -> Result<bool> {
        Ok(self.resolve(file_name).try_exists()?)
    }

    fn touch(&self, file_name: &str) -> Result<()> {
        let path = self.resolve(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.set_modified(std::time::SystemTime::now())?;
        Ok(())
    }

    fn write(&self, file_name: &str, contents: &[u8]) -> Result<()> {
        let path = self.resolve(file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;
        Ok(())
    }

    fn delete(&self, file_name: &str) -> Result<()> {
        match fs::remove_file(self.resolve(file_name)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_touch_exists_delete() {
        let dir = TempDir::new().unwrap();
        let fm = LocalFileManager::new(dir.path());
        assert!(!fm.exists("meta/progress/abc").unwrap());
        fm.touch("meta/progress/abc").unwrap();
        assert!(fm.exists("meta/progress/abc").unwrap());
        fm.touch("meta/progress/abc").unwrap();
        fm.delete("meta/progress/abc").unwrap();
        fm.delete("meta/progress/abc").unwrap();
        assert!(!fm.exists("meta/progress/abc").unwrap());
    }

    #[test]
    fn test_poll_returns_latest_name() {
        let dir = TempDir::new().unwrap();
        let fm = LocalFileManager::new(dir.path());
        assert_eq!(fm.poll("check-ins/*").unwrap(), None);
        for name in ["check-ins/0001", "check-ins/0003", "check-ins/0002"] {
            fm.touch(name).unwrap();
        }
        assert_eq!(fm.poll("check-ins/*").unwrap().as_deref(), Some("check-ins/0003"));
    }

    #[test]
    fn test_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let fm = LocalFileManager::new(dir.path());
        fm.write("a/b", b"one").unwrap();
        fm.write("a/b", b"two").unwrap();
        assert_eq!(fs::read(dir.path().join("a/b")).unwrap(), b"two");
    }

    #[test]
    fn test_bad_pattern() {
        let dir = TempDir::new().unwrap();
        let fm = LocalFileManager::new(dir.path());
        assert!(matches!(fm.poll("[").unwrap_err(), Error::InvalidInput(_)));
    }
}
