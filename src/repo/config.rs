//! Repository configuration

use crate::container::ContainerOptions;
use crate::run::LockWait;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HASH_LENGTH: usize = 24;
const MAX_HASH_LENGTH: usize = 32;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Settings threaded through a [`Repo`](super::Repo).
///
/// Serializable so deployments can keep it next to the repository.
///
/// # Example
///
/// ```rust
/// use aimstore::repo::RepoConfig;
/// use aimstore::run::LockWait;
/// use std::time::Duration;
///
/// # fn example() -> aimstore::Result<()> {
/// let config = RepoConfig::builder()
///     .hash_length(16)
///     .heartbeat_interval(Duration::from_secs(5))
///     .lock_wait(LockWait::Timeout(Duration::from_secs(2)))
///     .build()?;
/// assert_eq!(config.hash_length(), 16);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    hash_length: usize,
    heartbeat_interval: Duration,
    lock_wait: LockWait,
    container_options: ContainerOptions,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            hash_length: DEFAULT_HASH_LENGTH,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            lock_wait: LockWait::default(),
            container_options: ContainerOptions::default(),
        }
    }
}

impl RepoConfig {
    /// Create a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RepoConfigBuilder {
        RepoConfigBuilder::default()
    }

    /// Get the length of generated run hashes.
    #[must_use]
    pub const fn hash_length(&self) -> usize {
        self.hash_length
    }

    /// Get the heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Get the run lock wait policy.
    #[must_use]
    pub const fn lock_wait(&self) -> LockWait {
        self.lock_wait
    }

    /// Get the options used for every container the repository opens.
    #[must_use]
    pub const fn container_options(&self) -> &ContainerOptions {
        &self.container_options
    }

    /// Parse and validate a JSON configuration. Missing fields take their
    /// defaults.
    ///
    /// # Errors
    /// `Serialization` for malformed JSON, `InvalidInput` for out-of-range
    /// values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty JSON.
    ///
    /// # Errors
    /// `Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_HASH_LENGTH).contains(&self.hash_length) {
            return Err(Error::InvalidInput(format!(
                "hash length must be between 1 and {MAX_HASH_LENGTH}, got {}",
                self.hash_length
            )));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidInput(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for `RepoConfig`.
#[derive(Debug, Default)]
pub struct RepoConfigBuilder {
    config: RepoConfig,
}

impl RepoConfigBuilder {
    /// Set the length of generated run hashes (1 to 32).
    #[must_use]
    pub const fn hash_length(mut self, length: usize) -> Self {
        self.config.hash_length = length;
        self
    }

    /// Set the heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set how long run lock acquisition waits.
    #[must_use]
    pub const fn lock_wait(mut self, wait: LockWait) -> Self {
        self.config.lock_wait = wait;
        self
    }

    /// Set container options.
    #[must_use]
    pub fn container_options(mut self, options: ContainerOptions) -> Self {
        self.config.container_options = options;
        self
    }

    /// Build the `RepoConfig`.
    ///
    /// # Errors
    /// `InvalidInput` for a hash length outside 1..=32 or a zero heartbeat
    /// interval.
    pub fn build(self) -> Result<RepoConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
