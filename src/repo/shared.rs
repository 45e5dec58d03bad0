//! Writable containers shared between the views of one process
//!
//! A [`SharedWriter`] owns the open container; every view handed out holds a
//! [`WriterLease`]. Closing or dropping a lease only gives up that view's
//! claim. The container is flushed and closed once the last lease is gone.

use crate::container::{lock_unpoisoned, Container, DiskContainer, WriteBatch};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug)]
pub(crate) struct SharedWriter {
    container: DiskContainer,
    leases: Mutex<usize>,
}

impl SharedWriter {
    pub(crate) fn new(container: DiskContainer) -> Arc<Self> {
        Arc::new(Self {
            container,
            leases: Mutex::new(0),
        })
    }

    /// New claim on the writer, or `None` once it has been closed.
    pub(crate) fn lease(self: &Arc<Self>) -> Option<WriterLease> {
        let mut leases = lock_unpoisoned(&self.leases);
        if self.container.is_closed() {
            return None;
        }
        *leases += 1;
        Some(WriterLease {
            writer: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    /// Close regardless of outstanding leases; they fail from now on.
    pub(crate) fn force_close(&self) -> Result<()> {
        let _leases = lock_unpoisoned(&self.leases);
        self.container.close()
    }

    #[cfg(test)]
    pub(crate) fn lease_count(&self) -> usize {
        *lock_unpoisoned(&self.leases)
    }

    fn release(&self) -> Result<()> {
        let mut leases = lock_unpoisoned(&self.leases);
        *leases = leases.saturating_sub(1);
        if *leases > 0 {
            return Ok(());
        }
        debug!(path = %self.container.path().display(), "last lease released");
        self.container.close()
    }
}

/// One view's claim on a [`SharedWriter`].
#[derive(Debug)]
pub(crate) struct WriterLease {
    writer: Arc<SharedWriter>,
    released: AtomicBool,
}

impl WriterLease {
    fn live(&self) -> Result<&DiskContainer> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::BackendUnavailable(format!(
                "view of {} is closed",
                self.writer.container.path().display()
            )));
        }
        Ok(&self.writer.container)
    }
}

impl Container for WriterLease {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.live()?.get(key)
    }

    fn prefix_items(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.live()?.prefix_items(prefix)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.live()?.write(batch)
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn optimize_for_read(&self) -> Result<()> {
        self.live()?.optimize_for_read()
    }

    fn close(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.writer.release()
    }

    fn transaction(&self) -> MutexGuard<'_, ()> {
        self.writer.container.transaction()
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(
                path = %self.writer.container.path().display(),
                error = %e,
                "closing shared writer failed"
            );
        }
    }
}
