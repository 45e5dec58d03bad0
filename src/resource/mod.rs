//! Resource handle registry
//!
//! Long-lived objects handed out to remote callers are registered under an
//! opaque handle. Each registration carries a finalizer that runs exactly
//! once: on explicit release, on [`ResourceRegistry::release_all`], or when
//! the registry is dropped.
//!
//! # Example
//!
//! ```rust
//! use aimstore::resource::ResourceRegistry;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! # fn example() -> aimstore::Result<()> {
//! let registry = ResourceRegistry::new();
//! let closed = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&closed);
//! let id = registry.register(String::from("tree"), move |_: &String| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//!
//! assert_eq!(*registry.dereference::<String>(&id)?, "tree");
//! assert!(registry.release(&id));
//! assert!(!registry.release(&id));
//! assert_eq!(closed.load(Ordering::SeqCst), 1);
//! # Ok(())
//! # }
//! ```

pub mod handlers;

pub use handlers::{HandleRequest, ResourceFactory, ResourceKind};

use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque handle naming a registered resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(String);

impl HandleId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the handle as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HandleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

type Object = Arc<dyn Any + Send + Sync>;
type Finalizer = Box<dyn FnOnce(&(dyn Any + Send + Sync)) -> Result<()> + Send + Sync>;

struct Entry {
    object: Object,
    type_name: &'static str,
    finalizer: Option<Finalizer>,
}

/// Process-wide map from handles to live resources.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: DashMap<HandleId, Entry>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("live", &self.entries.len())
            .finish()
    }
}

impl ResourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `object` with a finalizer run on release.
    pub fn register<T, F>(&self, object: T, finalizer: F) -> HandleId
    where
        T: Any + Send + Sync,
        F: FnOnce(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.register_arc(Arc::new(object), finalizer)
    }

    /// Register an already shared object.
    pub fn register_arc<T, F>(&self, object: Arc<T>, finalizer: F) -> HandleId
    where
        T: Any + Send + Sync,
        F: FnOnce(&T) -> Result<()> + Send + Sync + 'static,
    {
        let finalizer: Finalizer = Box::new(move |any: &(dyn Any + Send + Sync)| {
            any.downcast_ref::<T>().map_or_else(
                || Err(Error::Other("finalizer type mismatch".to_string())),
                finalizer,
            )
        });
        self.insert(object, std::any::type_name::<T>(), Some(finalizer))
    }

    /// Register an object that needs no teardown.
    pub fn register_plain<T: Any + Send + Sync>(&self, object: Arc<T>) -> HandleId {
        self.insert(object, std::any::type_name::<T>(), None)
    }

    fn insert(&self, object: Object, type_name: &'static str, finalizer: Option<Finalizer>) -> HandleId {
        let id = HandleId::generate();
        self.entries.insert(
            id.clone(),
            Entry {
                object,
                type_name,
                finalizer,
            },
        );
        debug!(handle = %id, kind = type_name, "resource registered");
        id
    }

    /// Look up the object behind `id`.
    ///
    /// # Errors
    /// `UnknownHandle` if `id` was never registered or is released;
    /// `InvalidInput` if it holds a different type.
    pub fn dereference<T: Any + Send + Sync>(&self, id: &HandleId) -> Result<Arc<T>> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| Error::UnknownHandle(id.to_string()))?;
        Arc::clone(&entry.object).downcast::<T>().map_err(|_| {
            Error::InvalidInput(format!(
                "handle {id} holds {}, not {}",
                entry.type_name,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Whether `id` maps to a live resource.
    #[must_use]
    pub fn contains(&self, id: &HandleId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of live resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no resources are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the mapping for `id` and run its finalizer.
    ///
    /// Returns `false` if `id` was not live; the finalizer of a handle runs at
    /// most once however many callers race to release it.
    pub fn release(&self, id: &HandleId) -> bool {
        let Some((id, entry)) = self.entries.remove(id) else {
            return false;
        };
        finalize(&id, entry);
        true
    }

    /// Release every live handle; returns how many were released.
    pub fn release_all(&self) -> usize {
        let ids: Vec<HandleId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.release(id)).count()
    }

    /// Wrap `id` in a guard that releases it when dropped.
    #[must_use]
    pub fn guard(self: &Arc<Self>, id: HandleId) -> HandleGuard {
        HandleGuard {
            registry: Arc::clone(self),
            id: Some(id),
        }
    }
}

fn finalize(id: &HandleId, entry: Entry) {
    let Entry {
        object,
        type_name,
        finalizer,
    } = entry;
    let Some(finalizer) = finalizer else {
        debug!(handle = %id, kind = type_name, "resource released");
        return;
    };
    match catch_unwind(AssertUnwindSafe(|| finalizer(object.as_ref()))) {
        Ok(Ok(())) => debug!(handle = %id, kind = type_name, "resource finalized"),
        Ok(Err(e)) => warn!(handle = %id, kind = type_name, error = %e, "resource finalizer failed"),
        Err(_) => warn!(handle = %id, kind = type_name, "resource finalizer panicked"),
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        let released = self.release_all();
        if released > 0 {
            debug!(released, "registry swept live resources");
        }
    }
}

/// Releases its handle when dropped.
#[derive(Debug)]
pub struct HandleGuard {
    registry: Arc<ResourceRegistry>,
    id: Option<HandleId>,
}

impl HandleGuard {
    /// Get the guarded handle.
    ///
    /// # Panics
    /// Never: the handle is only taken by [`HandleGuard::into_inner`], which
    /// consumes the guard.
    #[must_use]
    pub fn id(&self) -> &HandleId {
        self.id.as_ref().unwrap_or_else(|| unreachable!("guard handle taken"))
    }

    /// Look up the guarded object.
    ///
    /// # Errors
    /// See [`ResourceRegistry::dereference`].
    pub fn dereference<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.registry.dereference(self.id())
    }

    /// Disarm the guard and hand back the handle without releasing it.
    #[must_use]
    pub fn into_inner(mut self) -> HandleId {
        self.id.take().unwrap_or_else(|| unreachable!("guard handle taken"))
    }
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.registry.release(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_finalizer(counter: &Arc<AtomicUsize>) -> impl FnOnce(&String) -> Result<()> + Send + Sync {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_register_dereference_release() {
        let registry = ResourceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.register("obj".to_string(), counting_finalizer(&calls));

        assert!(registry.contains(&id));
        assert_eq!(*registry.dereference::<String>(&id).unwrap(), "obj");
        assert!(registry.release(&id));
        assert!(!registry.release(&id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            registry.dereference::<String>(&id),
            Err(Error::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_dereference_wrong_type() {
        let registry = ResourceRegistry::new();
        let id = registry.register_plain(Arc::new(5_u32));
        assert!(matches!(
            registry.dereference::<String>(&id),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(*registry.dereference::<u32>(&id).unwrap(), 5);
    }

    #[test]
    fn test_unknown_handle() {
        let registry = ResourceRegistry::new();
        assert!(!registry.release(&HandleId::from("missing")));
        assert!(matches!(
            registry.dereference::<String>(&HandleId::from("missing")),
            Err(Error::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_concurrent_release_finalizes_once() {
        let registry = Arc::new(ResourceRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.register("shared".to_string(), counting_finalizer(&calls));

        let released: usize = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                std::thread::spawn(move || registry.release(&id))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();
        assert_eq!(released, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_finalizers_are_contained() {
        let registry = ResourceRegistry::new();
        let failing = registry.register(1_i32, |_| Err(Error::Other("close failed".to_string())));
        let panicking = registry.register(2_i32, |_| panic!("boom"));
        assert!(registry.release(&failing));
        assert!(registry.release(&panicking));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_sweeps_live_handles() {
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let registry = ResourceRegistry::new();
            registry.register("a".to_string(), counting_finalizer(&calls));
            registry.register("b".to_string(), counting_finalizer(&calls));
            let released = registry.register("c".to_string(), counting_finalizer(&calls));
            registry.release(&released);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_release_all() {
        let registry = ResourceRegistry::new();
        for i in 0..5 {
            registry.register_plain(Arc::new(i));
        }
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.release_all(), 5);
        assert_eq!(registry.release_all(), 0);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let registry = Arc::new(ResourceRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let id = registry.register("g".to_string(), counting_finalizer(&calls));
        {
            let guard = registry.guard(id.clone());
            assert_eq!(*guard.dereference::<String>().unwrap(), "g");
        }
        assert!(!registry.contains(&id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let kept = registry.register_plain(Arc::new(1_u8));
        let handle = registry.guard(kept.clone()).into_inner();
        assert_eq!(handle, kept);
        assert!(registry.contains(&kept));
    }
}
