//! Run liveness reporting
//!
//! A live run keeps `meta/progress/<hash>` fresh. [`RunStatusReporter`]
//! writes the flag once; [`ScheduledStatusReporter`] rewrites it on a tokio
//! interval until stopped. Monitors use [`progress_age`] to tell live runs
//! from abandoned ones.

use super::file_manager::FileManager;
use crate::container::lock_unpoisoned;
use crate::{Error, Result};
use chrono::{SecondsFormat, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Progress flag location relative to the repository root.
#[must_use]
pub fn progress_flag(run_hash: &str) -> String {
    format!("meta/progress/{run_hash}")
}

/// Writes and clears a run's progress flag.
pub struct RunStatusReporter {
    run_hash: String,
    file_manager: Arc<dyn FileManager>,
}

impl std::fmt::Debug for RunStatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStatusReporter")
            .field("run_hash", &self.run_hash)
            .finish_non_exhaustive()
    }
}

impl RunStatusReporter {
    /// Create a reporter writing through `file_manager`.
    #[must_use]
    pub fn new(run_hash: impl Into<String>, file_manager: Arc<dyn FileManager>) -> Self {
        Self {
            run_hash: run_hash.into(),
            file_manager,
        }
    }

    /// Get the run hash.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    /// Stamp the progress flag with the current time.
    ///
    /// # Errors
    /// Returns error if the flag cannot be written.
    pub fn report_progress(&self) -> Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.file_manager
            .write(&progress_flag(&self.run_hash), stamp.as_bytes())
    }

    /// Remove the progress flag. Safe to call when no flag exists.
    ///
    /// # Errors
    /// Returns error if the flag exists but cannot be removed.
    pub fn report_termination(&self) -> Result<()> {
        self.file_manager.delete(&progress_flag(&self.run_hash))
    }
}

#[derive(Debug, Default)]
struct TickState {
    stopped: bool,
}

/// Periodic heartbeat for a run.
///
/// Each tick and [`ScheduledStatusReporter::stop`] run under the same lock,
/// so once `stop` returns no further tick touches the flag.
pub struct ScheduledStatusReporter {
    reporter: Arc<RunStatusReporter>,
    interval: Duration,
    state: Arc<Mutex<TickState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ScheduledStatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledStatusReporter")
            .field("run_hash", &self.reporter.run_hash())
            .field("interval", &self.interval)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl ScheduledStatusReporter {
    /// Wrap `reporter`, ticking every `interval` once started.
    #[must_use]
    pub fn new(reporter: RunStatusReporter, interval: Duration) -> Self {
        Self {
            reporter: Arc::new(reporter),
            interval,
            state: Arc::new(Mutex::new(TickState::default())),
            task: Mutex::new(None),
        }
    }

    /// Get the wrapped reporter.
    #[must_use]
    pub fn reporter(&self) -> &RunStatusReporter {
        &self.reporter
    }

    /// Whether `stop` has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        lock_unpoisoned(&self.state).stopped
    }

    /// Spawn the heartbeat on the current tokio runtime.
    ///
    /// The first tick fires immediately. Starting twice is a no-op.
    ///
    /// # Errors
    /// `InvalidMode` outside a tokio runtime or after `stop`;
    /// `InvalidInput` for a zero interval.
    pub fn start(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidInput("heartbeat interval must be positive".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Error::InvalidMode("heartbeat must be started inside a tokio runtime".to_string())
        })?;
        if self.is_stopped() {
            return Err(Error::InvalidMode("heartbeat was already stopped".to_string()));
        }
        let mut task = lock_unpoisoned(&self.task);
        if task.is_some() {
            return Ok(());
        }

        let reporter = Arc::clone(&self.reporter);
        let state = Arc::clone(&self.state);
        let period = self.interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let guard = lock_unpoisoned(&state);
                if guard.stopped {
                    break;
                }
                if let Err(e) = reporter.report_progress() {
                    warn!(run_hash = %reporter.run_hash(), error = %e, "heartbeat tick failed");
                }
            }
        }));
        debug!(run_hash = %self.reporter.run_hash(), interval = ?period, "heartbeat started");
        Ok(())
    }

    /// Stop ticking and write one final progress stamp.
    ///
    /// Callable from any context, including outside a runtime. Stopping
    /// twice is a no-op.
    ///
    /// # Errors
    /// Returns error if the final stamp cannot be written.
    pub fn stop(&self) -> Result<()> {
        let flushed = {
            let mut state = lock_unpoisoned(&self.state);
            if state.stopped {
                return Ok(());
            }
            state.stopped = true;
            self.reporter.report_progress()
        };
        if let Some(task) = lock_unpoisoned(&self.task).take() {
            task.abort();
        }
        debug!(run_hash = %self.reporter.run_hash(), "heartbeat stopped");
        flushed
    }
}

impl Drop for ScheduledStatusReporter {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(run_hash = %self.reporter.run_hash(), error = %e, "final heartbeat failed");
        }
    }
}

/// Time since the run's progress flag was last written.
///
/// `None` when the run has no flag.
///
/// # Errors
/// Returns error if the flag exists but its metadata cannot be read.
pub fn progress_age(repo_path: &Path, run_hash: &str) -> Result<Option<Duration>> {
    let flag = repo_path.join(progress_flag(run_hash));
    let modified = match std::fs::metadata(&flag) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(
        SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO),
    ))
}

/// Whether the run reported progress within `threshold`.
///
/// # Errors
/// See [`progress_age`].
pub fn is_run_active(repo_path: &Path, run_hash: &str, threshold: Duration) -> Result<bool> {
    Ok(progress_age(repo_path, run_hash)?.is_some_and(|age| age <= threshold))
}
