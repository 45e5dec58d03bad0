//! Error types for aimstore
//!
//! Every variant is recoverable at the boundary of a single operation and is
//! reported to the immediate caller.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// aimstore error types
#[derive(Error, Debug)]
pub enum Error {
    /// A write's value typename is incompatible with the recorded schema
    #[error("Type conflict at {path}: cannot store '{dtype}' where '{base_dtype}' is recorded")]
    TypeConflict {
        /// Rendered tree path of the conflicting node
        path: String,
        /// Typename of the rejected value
        dtype: String,
        /// Typename currently recorded for the path
        base_dtype: String,
    },

    /// Container could not be opened or is no longer usable
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Container metadata or records are unreadable
    #[error("Corrupt store: {0}\nThe container will not be retried automatically; inspect or restore it from backup.")]
    CorruptStore(String),

    /// Operation requires the other container mode
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Run lock is held by another owner
    #[error("Run lock busy: run '{run_hash}' is locked by another process")]
    LockBusy {
        /// Hash of the contended run
        run_hash: String,
    },

    /// Resource handle has no live mapping
    #[error("Unknown resource handle: {0}")]
    UnknownHandle(String),

    /// Run backup could not be created, or its archive is unusable
    #[error("Backup failed for run '{run_hash}': {reason}")]
    BackupFailed {
        /// Hash of the run being archived or restored
        run_hash: String,
        /// What went wrong
        reason: String,
    },

    /// Restore requested for a run without an archive
    #[error("No backup found for run '{0}'")]
    NoBackupFound(String),

    /// No repository at or above the given path
    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record or manifest (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<glob::PatternError> for Error {
    fn from(err: glob::PatternError) -> Self {
        Self::InvalidInput(format!("bad pattern: {err}"))
    }
}
