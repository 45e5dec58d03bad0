//! Read-only overlay of several containers.
//!
//! Used to read the index and every run's chunk as one keyspace. Members
//! later in the list shadow earlier ones when a key exists in both.

use super::{lock_unpoisoned, Container, WriteBatch};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Read-only union of containers.
pub struct UnionContainer {
    members: Vec<Arc<dyn Container>>,
    txn: Mutex<()>,
}

impl UnionContainer {
    /// Overlay `members`; the last member wins on key collisions.
    #[must_use]
    pub fn new(members: Vec<Arc<dyn Container>>) -> Self {
        Self {
            members,
            txn: Mutex::new(()),
        }
    }

    /// Number of overlaid containers.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

impl std::fmt::Debug for UnionContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionContainer")
            .field("members", &self.members.len())
            .finish()
    }
}

impl Container for UnionContainer {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for member in self.members.iter().rev() {
            if let Some(value) = member.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn prefix_items(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged = BTreeMap::new();
        for member in &self.members {
            merged.extend(member.prefix_items(prefix)?);
        }
        Ok(merged.into_iter().collect())
    }

    fn write(&self, _batch: WriteBatch) -> Result<()> {
        Err(Error::InvalidMode(
            "union containers are read-only".to_string(),
        ))
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn optimize_for_read(&self) -> Result<()> {
        for member in &self.members {
            member.optimize_for_read()?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut first_err = None;
        for member in &self.members {
            if let Err(e) = member.close() {
                first_err.get_or_insert(e);
            }
        }
        debug!(members = self.members.len(), "union container closed");
        first_err.map_or(Ok(()), Err)
    }

    fn transaction(&self) -> MutexGuard<'_, ()> {
        lock_unpoisoned(&self.txn)
    }
}
