//! Containers: ordered key-value backends bound to one location
//!
//! A container is opened either read-only or read-write. Tree views are
//! layered on top of the narrow [`Container`] contract, so any ordered
//! byte-keyed store can back a run's chunk.
//!
//! Backends:
//! - [`DiskContainer`]: append-only batch log plus a compacted segment, with a
//!   single-writer `LOCK` file
//! - [`MemoryContainer`]: ordered in-memory map, lost on process exit
//! - [`UnionContainer`]: read-only overlay of several containers
//!
//! # Example
//!
//! ```rust
//! use aimstore::container::{Container, MemoryContainer, WriteBatch};
//!
//! # fn example() -> aimstore::Result<()> {
//! let store = MemoryContainer::new();
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"run/loss".to_vec(), b"0.5".to_vec());
//! batch.put(b"run/acc".to_vec(), b"0.9".to_vec());
//! store.write(batch)?;
//!
//! assert_eq!(store.get(b"run/loss")?, Some(b"0.5".to_vec()));
//! assert_eq!(store.prefix_items(b"run/")?.len(), 2);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "compression")]
mod compressed;
mod disk;
mod memory;
mod union;

#[cfg(feature = "compression")]
pub use compressed::Compression;
pub use disk::DiskContainer;
pub use memory::MemoryContainer;
pub use union::UnionContainer;

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Ordered key-value backend contract.
///
/// Keys are compared bytewise; [`Container::prefix_items`] returns entries in
/// ascending key order.
pub trait Container: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    ///
    /// # Errors
    /// Returns error if the container is closed or the backend fails.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// All entries whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    /// Returns error if the container is closed or the backend fails.
    fn prefix_items(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Apply a batch atomically.
    ///
    /// # Errors
    /// Returns `InvalidMode` on read-only containers.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Whether the container was opened read-only.
    fn is_read_only(&self) -> bool;

    /// Consolidate backend files for faster scans.
    ///
    /// Valid only on read-only containers; a no-op when already optimized.
    ///
    /// # Errors
    /// Returns `InvalidMode` on writable containers.
    fn optimize_for_read(&self) -> Result<()>;

    /// Release backend resources. Safe to call more than once.
    ///
    /// # Errors
    /// Returns error if pending data cannot be flushed.
    fn close(&self) -> Result<()>;

    /// Serializes read-check-write sequences issued by tree views within
    /// this process.
    fn transaction(&self) -> MutexGuard<'_, ()>;

    /// Check if a key exists.
    ///
    /// # Errors
    /// Same as [`Container::get`].
    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Single mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOp {
    /// Insert or overwrite a key
    Put {
        /// Key bytes
        key: Vec<u8>,
        /// Value bytes
        value: Vec<u8>,
    },
    /// Remove one key (no-op if missing)
    Delete {
        /// Key bytes
        key: Vec<u8>,
    },
    /// Remove every key starting with the prefix
    DeletePrefix {
        /// Prefix bytes
        prefix: Vec<u8>,
    },
}

/// Ordered group of mutations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put { key, value });
    }

    /// Queue a single-key delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete { key });
    }

    /// Queue a prefix delete.
    pub fn delete_prefix(&mut self, prefix: Vec<u8>) {
        self.ops.push(WriteOp::DeletePrefix { prefix });
    }

    /// Queued operations in application order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply the batch to an ordered map in place.
    pub(crate) fn apply_to(&self, map: &mut BTreeMap<Vec<u8>, Vec<u8>>) {
        for op in &self.ops {
            match op {
                WriteOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                WriteOp::Delete { key } => {
                    map.remove(key);
                }
                WriteOp::DeletePrefix { prefix } => {
                    let doomed: Vec<Vec<u8>> = map
                        .range(prefix.clone()..)
                        .take_while(|(k, _)| k.starts_with(prefix))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for key in doomed {
                        map.remove(&key);
                    }
                }
            }
        }
    }
}

/// Ordered scan helper shared by the map-backed containers.
pub(crate) fn scan_prefix(
    map: &BTreeMap<Vec<u8>, Vec<u8>>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    map.range(prefix.to_vec()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Flush strategy for container writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncMode {
    /// Flush to the OS after every batch (default)
    #[default]
    Flush,
    /// `fsync` after every batch
    EveryWrite,
}

/// Backend options supplied at open time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOptions {
    /// Durability of each write batch
    pub sync: SyncMode,
    /// Payload compression for new records
    #[cfg(feature = "compression")]
    pub compression: Option<Compression>,
}

/// Open a disk container at `path`.
///
/// # Errors
/// See [`DiskContainer::open`].
pub fn open<P: AsRef<Path>>(
    path: P,
    read_only: bool,
    options: ContainerOptions,
) -> Result<DiskContainer> {
    DiskContainer::open(path, read_only, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_applies_in_order() {
        let mut map = BTreeMap::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a/1".to_vec(), b"x".to_vec());
        batch.put(b"a/2".to_vec(), b"y".to_vec());
        batch.put(b"b".to_vec(), b"z".to_vec());
        batch.delete_prefix(b"a/".to_vec());
        batch.put(b"a/3".to_vec(), b"w".to_vec());
        batch.delete(b"missing".to_vec());
        batch.apply_to(&mut map);

        assert_eq!(batch.len(), 6);
        let keys: Vec<&[u8]> = map.keys().map(Vec::as_slice).collect();
        assert_eq!(keys, vec![b"a/3".as_slice(), b"b".as_slice()]);
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let mut map = BTreeMap::new();
        for key in ["ab", "a", "b", "aa", "ac"] {
            map.insert(key.as_bytes().to_vec(), vec![]);
        }
        let keys: Vec<Vec<u8>> = scan_prefix(&map, b"a").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"aa".to_vec(), b"ab".to_vec(), b"ac".to_vec()]);
        assert!(scan_prefix(&map, b"c").is_empty());
    }

    #[test]
    fn test_options_default() {
        let options = ContainerOptions::default();
        assert_eq!(options.sync, SyncMode::Flush);
    }
}
