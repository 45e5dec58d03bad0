//! In-memory container.
//!
//! Ordered map behind a `RwLock`; data is lost when the container is
//! dropped. Used for ephemeral trees and tests.

use super::{lock_unpoisoned, scan_prefix, Container, WriteBatch};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};

/// In-memory ordered key-value container.
///
/// # Example
///
/// ```rust
/// use aimstore::container::{Container, MemoryContainer, WriteBatch};
///
/// # fn example() -> aimstore::Result<()> {
/// let store = MemoryContainer::new();
/// let mut batch = WriteBatch::new();
/// batch.put(b"hello".to_vec(), b"world".to_vec());
/// store.write(batch)?;
/// assert_eq!(store.get(b"hello")?, Some(b"world".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryContainer {
    store: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    read_only: bool,
    closed: AtomicBool,
    txn: Mutex<()>,
}

impl MemoryContainer {
    /// Create a new writable in-memory container.
    #[must_use]
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new(), false)
    }

    /// Create a read-only container over existing entries.
    #[must_use]
    pub fn read_only(entries: BTreeMap<Vec<u8>, Vec<u8>>) -> Self {
        Self::from_map(entries, true)
    }

    fn from_map(store: BTreeMap<Vec<u8>, Vec<u8>>, read_only: bool) -> Self {
        Self {
            store: RwLock::new(store),
            read_only,
            closed: AtomicBool::new(false),
            txn: Mutex::new(()),
        }
    }

    /// Get the number of entries in the container.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().map_or(0, |s| s.len())
    }

    /// Check if the container is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::BackendUnavailable("memory container is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Container for MemoryContainer {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let store = self
            .store
            .read()
            .map_err(|_| Error::Other("memory container lock poisoned".to_string()))?;
        Ok(store.get(key).cloned())
    }

    fn prefix_items(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.ensure_open()?;
        let store = self
            .store
            .read()
            .map_err(|_| Error::Other("memory container lock poisoned".to_string()))?;
        Ok(scan_prefix(&store, prefix))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.ensure_open()?;
        if self.read_only {
            return Err(Error::InvalidMode(
                "cannot write to a read-only container".to_string(),
            ));
        }
        let mut store = self
            .store
            .write()
            .map_err(|_| Error::Other("memory container lock poisoned".to_string()))?;
        batch.apply_to(&mut store);
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn optimize_for_read(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.read_only {
            return Err(Error::InvalidMode(
                "optimize_for_read requires a read-only container".to_string(),
            ));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn transaction(&self) -> MutexGuard<'_, ()> {
        lock_unpoisoned(&self.txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &MemoryContainer, key: &str, value: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        store.write(batch)
    }

    #[test]
    fn test_memory_set_get() {
        let store = MemoryContainer::new();
        put(&store, "key1", "value1").unwrap();
        assert_eq!(store.get(b"key1").unwrap(), Some(b"value1".to_vec()));
        assert_eq!(store.get(b"nonexistent").unwrap(), None);
    }

    #[test]
    fn test_memory_overwrite_and_delete() {
        let store = MemoryContainer::new();
        put(&store, "key", "value1").unwrap();
        put(&store, "key", "value2").unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value2".to_vec()));

        let mut batch = WriteBatch::new();
        batch.delete(b"key".to_vec());
        store.write(batch).unwrap();
        assert!(!store.exists(b"key").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_read_only_rejects_writes() {
        let store = MemoryContainer::read_only(BTreeMap::new());
        let err = put(&store, "k", "v").unwrap_err();
        assert!(matches!(err, Error::InvalidMode(_)));
        store.optimize_for_read().unwrap();
    }

    #[test]
    fn test_memory_optimize_requires_read_only() {
        let store = MemoryContainer::new();
        assert!(matches!(store.optimize_for_read(), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_memory_closed_is_unavailable() {
        let store = MemoryContainer::new();
        store.close().unwrap();
        store.close().unwrap();
        assert!(matches!(store.get(b"k"), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_memory_concurrent_access() {
        use std::sync::Arc;

        let store = Arc::new(MemoryContainer::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || put(&store, &format!("key{i:02}"), "v").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 16);
        assert_eq!(store.prefix_items(b"key").unwrap().len(), 16);
    }
}
