//! Repository: the `.aim` directory and factories for everything inside it
//!
//! Layout:
//!
//! ```text
//! <root>/.aim/
//!   meta/chunks/<hash>/     run metadata container
//!   meta/index/             index container
//!   meta/progress/<hash>    progress flag of live runs
//!   seqs/chunks/<hash>/     run sequence container
//!   locks/<hash>.lock       run locks
//!   bcp/<hash>              run backups
//! ```

mod config;
mod props;
mod shared;

pub use config::{RepoConfig, RepoConfigBuilder};
pub use props::RunProperties;

use self::shared::{SharedWriter, WriterLease};
use crate::container::{lock_unpoisoned, Container, ContainerOptions, DiskContainer, UnionContainer};
use crate::object::{AimObjectKey, AimObjectPath};
use crate::run::{
    self, validate_run_hash, LocalFileManager, RunLock, RunStatusReporter, ScheduledStatusReporter,
};
use crate::tree::TreeView;
use crate::{Error, Result};
use dashmap::DashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Name of the repository marker directory.
pub const AIM_REPO_NAME: &str = ".aim";

const INDEX_DIR: &str = "index";
const CHUNKS_DIR: &str = "chunks";
const INDEX_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const UUID_HEX_LEN: usize = 32;

/// Directories created by [`Repo::init`], relative to the `.aim` directory.
const LAYOUT: [&str; 6] = [
    "meta/chunks",
    "meta/progress",
    "seqs/chunks",
    "locks",
    "bcp",
    "meta/index",
];

/// An opened repository.
///
/// Writable containers are opened once per process and shared between all
/// tree views requesting them; read-only views always load a fresh snapshot.
/// A shared container is closed when the last view over it is closed or
/// dropped.
#[derive(Debug)]
pub struct Repo {
    path: PathBuf,
    config: RepoConfig,
    writers: DashMap<PathBuf, Arc<SharedWriter>>,
    /// Held for a single open attempt, never across a retry sleep
    opening: Mutex<()>,
}

impl Repo {
    /// Create the repository layout under `root` (if missing) and open it.
    ///
    /// # Errors
    /// Returns error if the directories cannot be created.
    pub fn init(root: impl AsRef<Path>, config: RepoConfig) -> Result<Self> {
        let root = clean_repo_path(&root.as_ref().to_string_lossy())
            .ok_or_else(|| Error::InvalidInput("empty repository path".to_string()))?;
        let path = root.join(AIM_REPO_NAME);
        for dir in LAYOUT {
            fs::create_dir_all(path.join(dir))?;
        }
        info!(path = %path.display(), "repository initialized");
        Ok(Self::open_dir(path, config))
    }

    /// Open the repository whose root (or `.aim` directory) is `path`.
    ///
    /// # Errors
    /// `RepoNotFound` if `path` holds no `.aim` directory.
    pub fn from_path(path: impl AsRef<Path>, config: RepoConfig) -> Result<Self> {
        let raw = path.as_ref().to_string_lossy().into_owned();
        let root = clean_repo_path(&raw)
            .ok_or_else(|| Error::InvalidInput("empty repository path".to_string()))?;
        let path = root.join(AIM_REPO_NAME);
        if !path.is_dir() {
            return Err(Error::RepoNotFound(raw));
        }
        Ok(Self::open_dir(path, config))
    }

    /// Open the nearest repository at or above `start`.
    ///
    /// # Errors
    /// `RepoNotFound` if no ancestor holds a `.aim` directory.
    pub fn discover(start: impl AsRef<Path>, config: RepoConfig) -> Result<Self> {
        let start = start.as_ref();
        let root = search_repo(start)
            .ok_or_else(|| Error::RepoNotFound(start.display().to_string()))?;
        Ok(Self::open_dir(root.join(AIM_REPO_NAME), config))
    }

    fn open_dir(path: PathBuf, config: RepoConfig) -> Self {
        debug!(path = %path.display(), "repository opened");
        Self {
            path,
            config,
            writers: DashMap::new(),
            opening: Mutex::new(()),
        }
    }

    /// Get the `.aim` directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the directory containing `.aim`.
    #[must_use]
    pub fn root_path(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }

    /// Get the repository configuration.
    #[must_use]
    pub const fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Generate a fresh run hash of the configured length.
    #[must_use]
    pub fn new_run_hash(&self) -> String {
        generate_run_hash(self.config.hash_length())
    }

    /// Hashes of all runs with a metadata chunk, sorted.
    ///
    /// # Errors
    /// Returns error if the chunk directory cannot be listed.
    pub fn list_runs(&self) -> Result<Vec<String>> {
        self.list_runs_in("meta/chunks")
    }

    /// Entry names of `lookup_dir` (relative to `.aim`), sorted.
    ///
    /// # Errors
    /// Returns error if the directory exists but cannot be listed.
    pub fn list_runs_in(&self, lookup_dir: &str) -> Result<Vec<String>> {
        let dir = self.path.join(lookup_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut runs = Vec::new();
        for entry in entries {
            runs.push(entry?.file_name().to_string_lossy().into_owned());
        }
        runs.sort();
        Ok(runs)
    }

    /// Resolve run hashes and `*` patterns against [`Repo::list_runs`].
    ///
    /// Literal hashes are returned as given. A bare `*` selects every run.
    ///
    /// # Errors
    /// `InvalidInput` for a malformed pattern.
    pub fn match_runs<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<String>> {
        self.match_runs_in(patterns, "meta/chunks")
    }

    /// [`Repo::match_runs`] against the entries of `lookup_dir`.
    ///
    /// # Errors
    /// `InvalidInput` for a malformed pattern.
    pub fn match_runs_in<S: AsRef<str>>(&self, patterns: &[S], lookup_dir: &str) -> Result<Vec<String>> {
        let mut all_runs: Option<Vec<String>> = None;
        let mut matched = std::collections::BTreeSet::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if !pattern.contains('*') {
                matched.insert(pattern.to_string());
                continue;
            }
            if all_runs.is_none() {
                all_runs = Some(self.list_runs_in(lookup_dir)?);
            }
            let runs = all_runs.as_deref().unwrap_or_default();
            if pattern == "*" {
                return Ok(runs.to_vec());
            }
            let glob = glob::Pattern::new(pattern)?;
            matched.extend(runs.iter().filter(|h| glob.matches(h)).cloned());
        }
        Ok(matched.into_iter().collect())
    }

    fn writable_container(&self, rel: &Path, wait: Option<Duration>) -> Result<Arc<WriterLease>> {
        if let Some(lease) = self.cached_lease(rel) {
            return Ok(lease);
        }
        let deadline = wait.map(|w| Instant::now() + w);
        loop {
            {
                let _opening = lock_unpoisoned(&self.opening);
                if let Some(lease) = self.cached_lease(rel) {
                    return Ok(lease);
                }
                match DiskContainer::open(self.path.join(rel), false, self.container_options()) {
                    Ok(container) => {
                        let writer = SharedWriter::new(container);
                        let lease = writer.lease().ok_or_else(|| {
                            Error::BackendUnavailable(format!("{} closed while opening", rel.display()))
                        })?;
                        self.writers.insert(rel.to_path_buf(), writer);
                        return Ok(Arc::new(lease));
                    }
                    Err(Error::BackendUnavailable(reason)) => match deadline {
                        Some(deadline) if Instant::now() < deadline => {
                            debug!(path = %rel.display(), %reason, "container busy, retrying");
                        }
                        _ => return Err(Error::BackendUnavailable(reason)),
                    },
                    Err(e) => return Err(e),
                }
            }
            std::thread::sleep(INDEX_RETRY_INTERVAL);
        }
    }

    fn cached_lease(&self, rel: &Path) -> Option<Arc<WriterLease>> {
        let writer = self.writers.get(rel).map(|w| Arc::clone(w.value()))?;
        writer.lease().map(Arc::new)
    }

    fn container_options(&self) -> ContainerOptions {
        self.config.container_options().clone()
    }

    /// Tree over the container `<name>/chunks/<sub>`, or over the union of
    /// `<name>/index` and every `<name>/chunks/*` when `from_union` is set.
    ///
    /// # Errors
    /// `InvalidInput` when `sub` is missing for a single-chunk tree,
    /// `InvalidMode` for a writable union, or any container open failure.
    pub fn request_tree(
        &self,
        name: &str,
        sub: Option<&str>,
        read_only: bool,
        from_union: bool,
    ) -> Result<TreeView> {
        validate_name(name)?;
        if from_union {
            if !read_only {
                return Err(Error::InvalidMode(format!(
                    "union tree '{name}' can only be opened read-only"
                )));
            }
            return Ok(TreeView::new(Arc::new(self.union_container(name)?)));
        }
        let sub = sub.ok_or_else(|| {
            Error::InvalidInput(format!("tree '{name}' needs a chunk name"))
        })?;
        validate_run_hash(sub)?;
        let rel = Path::new(name).join(CHUNKS_DIR).join(sub);
        let container: Arc<dyn Container> = if read_only {
            Arc::new(DiskContainer::open(self.path.join(&rel), true, self.container_options())?)
        } else {
            self.writable_container(&rel, None)?
        };
        Ok(TreeView::new(container))
    }

    fn union_container(&self, name: &str) -> Result<UnionContainer> {
        let base = self.path.join(name);
        let mut members: Vec<Arc<dyn Container>> = Vec::new();
        let index = base.join(INDEX_DIR);
        if DiskContainer::exists_at(&index) {
            members.push(Arc::new(DiskContainer::open(index, true, self.container_options())?));
        }
        let chunks = base.join(CHUNKS_DIR);
        if chunks.is_dir() {
            let mut dirs = Vec::new();
            for entry in fs::read_dir(&chunks)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() && DiskContainer::exists_at(&entry.path()) {
                    dirs.push(entry.path());
                }
            }
            dirs.sort();
            for dir in dirs {
                members.push(Arc::new(DiskContainer::open(dir, true, self.container_options())?));
            }
        }
        debug!(name, members = members.len(), "union container opened");
        Ok(UnionContainer::new(members))
    }

    /// Writable tree over `<name>/index`.
    ///
    /// While another process holds the index, opening is retried until
    /// `timeout` elapses (immediately failing without one).
    ///
    /// # Errors
    /// `BackendUnavailable` if the index stays locked.
    pub fn index_tree(&self, name: &str, timeout: Option<Duration>) -> Result<TreeView> {
        validate_name(name)?;
        let rel = Path::new(name).join(INDEX_DIR);
        Ok(TreeView::new(self.writable_container(&rel, timeout)?))
    }

    /// Properties of run `run_hash`, stored under `chunks/<hash>/props` of
    /// its metadata tree.
    ///
    /// # Errors
    /// See [`Repo::request_tree`].
    pub fn request_props(&self, run_hash: &str, read_only: bool) -> Result<RunProperties> {
        let tree = self.request_tree("meta", Some(run_hash), read_only, false)?;
        let mut props_path = run_meta_path(run_hash);
        props_path.push(AimObjectKey::from("props"));
        Ok(RunProperties::new(run_hash, tree.subtree(&props_path)))
    }

    /// Lock run `run_hash`, waiting as configured.
    ///
    /// # Errors
    /// `LockBusy` if another owner holds the lock.
    pub fn request_run_lock(&self, run_hash: &str) -> Result<RunLock> {
        RunLock::acquire(&self.path, run_hash, self.config.lock_wait())
    }

    /// One-shot progress reporter for `run_hash`.
    #[must_use]
    pub fn status_reporter(&self, run_hash: &str) -> RunStatusReporter {
        RunStatusReporter::new(run_hash, Arc::new(self.file_manager()))
    }

    /// Heartbeat for `run_hash` at the configured interval. Not started.
    #[must_use]
    pub fn run_heartbeat(&self, run_hash: &str) -> ScheduledStatusReporter {
        ScheduledStatusReporter::new(self.status_reporter(run_hash), self.config.heartbeat_interval())
    }

    /// File manager rooted at the `.aim` directory.
    #[must_use]
    pub fn file_manager(&self) -> LocalFileManager {
        LocalFileManager::new(&self.path)
    }

    /// See [`run::backup_run`].
    ///
    /// # Errors
    /// `BackupFailed` if the run's chunks are missing or cannot be archived.
    pub fn backup_run(&self, run_hash: &str) -> Result<PathBuf> {
        run::backup_run(&self.path, run_hash)
    }

    /// See [`run::restore_run_backup`]. Cached writers for the run are
    /// closed first.
    ///
    /// # Errors
    /// `NoBackupFound` or `BackupFailed`.
    pub fn restore_run_backup(&self, run_hash: &str) -> Result<()> {
        validate_run_hash(run_hash)?;
        let _opening = lock_unpoisoned(&self.opening);
        for part in run::CHUNK_PARTS {
            let rel = Path::new(part).join(CHUNKS_DIR).join(run_hash);
            if let Some((_, writer)) = self.writers.remove(&rel) {
                writer.force_close()?;
            }
        }
        run::restore_run_backup(&self.path, run_hash)
    }

    /// Close every writable container opened through this repository,
    /// including those still referenced by open views.
    ///
    /// # Errors
    /// Returns the first close failure; all containers are still closed.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        let keys: Vec<PathBuf> = self.writers.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, writer)) = self.writers.remove(&key) {
                if let Err(e) = writer.force_close() {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Tree path of run `run_hash` inside its metadata container.
#[must_use]
pub fn run_meta_path(run_hash: &str) -> AimObjectPath {
    vec![AimObjectKey::from(CHUNKS_DIR), AimObjectKey::from(run_hash)]
}

fn validate_name(name: &str) -> Result<()> {
    let plain = !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid tree name '{name}'")))
    }
}

/// Walk from `path` up to the filesystem root looking for a `.aim`
/// directory; returns the directory containing it.
#[must_use]
pub fn search_repo(path: &Path) -> Option<PathBuf> {
    let start = absolutize(path);
    start
        .ancestors()
        .find(|dir| dir.join(AIM_REPO_NAME).is_dir())
        .map(Path::to_path_buf)
}

/// Normalize a user-supplied repository location to an absolute root path.
///
/// Surrounding whitespace and trailing slashes are dropped, `~` expands to
/// the home directory and a trailing `.aim` component is removed. Returns
/// `None` for an empty input.
#[must_use]
pub fn clean_repo_path(repo_path: &str) -> Option<PathBuf> {
    let trimmed = repo_path.trim();
    if trimmed.is_empty() {
        return None;
    }
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Some(PathBuf::from("/"));
    }

    let mut path = match trimmed.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            home_dir().join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(trimmed),
    };
    if path.file_name().is_some_and(|n| n == AIM_REPO_NAME) {
        path.pop();
    }
    Some(absolutize(&path))
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(|| PathBuf::from("/"), PathBuf::from)
}

/// Lexically resolve `path` against the current directory.
fn absolutize(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Random run hash: the hex form of a v4 UUID truncated to `hash_length`
/// (at most 32) characters.
#[must_use]
pub fn generate_run_hash(hash_length: usize) -> String {
    let mut hash = uuid::Uuid::new_v4().simple().to_string();
    hash.truncate(hash_length.min(UUID_HEX_LEN));
    hash
}

/// Compact the container at `path` for reading.
///
/// # Errors
/// `BackendUnavailable` if a writer holds the container.
pub fn optimize_container(path: impl AsRef<Path>, options: ContainerOptions) -> Result<()> {
    let container = DiskContainer::open(path, true, options)?;
    container.optimize_for_read()?;
    container.close()
}
