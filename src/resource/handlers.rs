//! Construct repository resources on request and register them
//!
//! A transport layer decodes a [`HandleRequest`], passes it to
//! [`ResourceFactory::request`] and sends the returned handle back to the
//! client. Releasing the handle runs the teardown matching the resource
//! kind: trees and properties close their view (a shared writer stays open
//! while other views use it), locks are released, heartbeats stop.

use super::{HandleId, ResourceRegistry};
use crate::repo::{Repo, RunProperties};
use crate::run::{FileManager, RunLock, ScheduledStatusReporter};
use crate::tree::TreeView;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Kinds of resources a client can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Tree over one run chunk or a union of chunks
    Tree,
    /// Writable tree over an index container
    IndexTree,
    /// Run properties
    RunProperties,
    /// The repository itself
    Repo,
    /// Run lock
    RunLock,
    /// Started heartbeat of a run
    RunHeartbeat,
    /// File manager rooted at the repository
    FileManager,
}

/// Parameters of a resource request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandleRequest {
    /// See [`Repo::request_tree`]
    Tree {
        /// Container family, e.g. `meta` or `seqs`
        name: String,
        /// Chunk name; required unless `from_union` is set
        #[serde(default)]
        sub: Option<String>,
        /// Open read-only
        read_only: bool,
        /// Read the index and all chunks as one tree
        #[serde(default)]
        from_union: bool,
    },
    /// See [`Repo::index_tree`]
    IndexTree {
        /// Container family
        name: String,
        /// How long to retry while another process holds the index
        #[serde(default)]
        timeout: Option<Duration>,
    },
    /// See [`Repo::request_props`]
    RunProperties {
        /// Run hash
        run_hash: String,
        /// Open read-only
        read_only: bool,
    },
    /// The repository backing the factory
    Repo,
    /// See [`Repo::request_run_lock`]
    RunLock {
        /// Run hash
        run_hash: String,
    },
    /// See [`Repo::run_heartbeat`]; the heartbeat is started on the current
    /// tokio runtime
    RunHeartbeat {
        /// Run hash
        run_hash: String,
    },
    /// See [`Repo::file_manager`]
    FileManager,
}

impl HandleRequest {
    /// Get the kind of resource requested.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Tree { .. } => ResourceKind::Tree,
            Self::IndexTree { .. } => ResourceKind::IndexTree,
            Self::RunProperties { .. } => ResourceKind::RunProperties,
            Self::Repo => ResourceKind::Repo,
            Self::RunLock { .. } => ResourceKind::RunLock,
            Self::RunHeartbeat { .. } => ResourceKind::RunHeartbeat,
            Self::FileManager => ResourceKind::FileManager,
        }
    }
}

/// Builds resources from a repository and registers them.
#[derive(Debug, Clone)]
pub struct ResourceFactory {
    repo: Arc<Repo>,
    registry: Arc<ResourceRegistry>,
}

impl ResourceFactory {
    /// Create a factory over `repo` registering into `registry`.
    #[must_use]
    pub const fn new(repo: Arc<Repo>, registry: Arc<ResourceRegistry>) -> Self {
        Self { repo, registry }
    }

    /// Get the registry resources are registered into.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Build the requested resource and register it.
    ///
    /// Resource types by kind: [`TreeView`] for trees, [`RunProperties`],
    /// [`Repo`], [`RunLock`], [`ScheduledStatusReporter`], and
    /// `Arc<dyn FileManager>`.
    ///
    /// # Errors
    /// Whatever constructing the resource fails with; nothing is registered
    /// in that case.
    pub fn request(&self, request: &HandleRequest) -> Result<HandleId> {
        let registry = &self.registry;
        let id = match request {
            HandleRequest::Tree {
                name,
                sub,
                read_only,
                from_union,
            } => {
                let tree = self
                    .repo
                    .request_tree(name, sub.as_deref(), *read_only, *from_union)?;
                registry.register(tree, TreeView::close)
            }
            HandleRequest::IndexTree { name, timeout } => {
                let tree = self.repo.index_tree(name, *timeout)?;
                registry.register(tree, TreeView::close)
            }
            HandleRequest::RunProperties {
                run_hash,
                read_only,
            } => {
                let props = self.repo.request_props(run_hash, *read_only)?;
                registry.register(props, RunProperties::close)
            }
            HandleRequest::Repo => registry.register_plain(Arc::clone(&self.repo)),
            HandleRequest::RunLock { run_hash } => {
                let lock = self.repo.request_run_lock(run_hash)?;
                registry.register(lock, RunLock::release)
            }
            HandleRequest::RunHeartbeat { run_hash } => {
                let heartbeat = self.repo.run_heartbeat(run_hash);
                heartbeat.start()?;
                registry.register(heartbeat, ScheduledStatusReporter::stop)
            }
            HandleRequest::FileManager => {
                let manager: Arc<dyn FileManager> = Arc::new(self.repo.file_manager());
                registry.register_plain(Arc::new(manager))
            }
        };
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{path, AimObject};
    use crate::repo::RepoConfig;
    use crate::run::LockWait;
    use crate::Error;
    use tempfile::TempDir;

    fn factory() -> (TempDir, ResourceFactory) {
        let dir = TempDir::new().unwrap();
        let repo = Repo::init(dir.path(), RepoConfig::default()).unwrap();
        (
            dir,
            ResourceFactory::new(Arc::new(repo), Arc::new(ResourceRegistry::new())),
        )
    }

    #[test]
    fn test_request_parsing() {
        let request: HandleRequest = serde_json::from_str(
            r#"{"kind": "tree", "name": "meta", "sub": "abc", "read_only": false}"#,
        )
        .unwrap();
        assert_eq!(request.kind(), ResourceKind::Tree);
        assert_eq!(
            request,
            HandleRequest::Tree {
                name: "meta".to_string(),
                sub: Some("abc".to_string()),
                read_only: false,
                from_union: false,
            }
        );
        let repo: HandleRequest = serde_json::from_str(r#"{"kind": "repo"}"#).unwrap();
        assert_eq!(repo.kind(), ResourceKind::Repo);
    }

    #[test]
    fn test_tree_handle_closes_container() {
        let (_dir, factory) = factory();
        let id = factory
            .request(&HandleRequest::Tree {
                name: "meta".to_string(),
                sub: Some("r1".to_string()),
                read_only: false,
                from_union: false,
            })
            .unwrap();
        let tree = factory.registry().dereference::<TreeView>(&id).unwrap();
        tree.set(&path(["x"]), &AimObject::Int(1)).unwrap();

        assert!(factory.registry().release(&id));
        assert!(matches!(tree.get(&path(["x"])), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_released_tree_handle_leaves_other_handles_writable() {
        let (_dir, factory) = factory();
        let tree_request = HandleRequest::Tree {
            name: "meta".to_string(),
            sub: Some("r1".to_string()),
            read_only: false,
            from_union: false,
        };
        let first = factory.request(&tree_request).unwrap();
        let second = factory.request(&tree_request).unwrap();
        let props_id = factory
            .request(&HandleRequest::RunProperties {
                run_hash: "r1".to_string(),
                read_only: false,
            })
            .unwrap();
        let registry = factory.registry();

        assert!(registry.release(&first));
        let tree = registry.dereference::<TreeView>(&second).unwrap();
        tree.set(&path(["epoch"]), &AimObject::Int(4)).unwrap();
        let props = registry.dereference::<RunProperties>(&props_id).unwrap();
        props.set_name("kept").unwrap();

        assert!(registry.release(&props_id));
        tree.set(&path(["epoch"]), &AimObject::Int(5)).unwrap();
        assert!(matches!(props.name(), Err(Error::BackendUnavailable(_))));

        assert!(registry.release(&second));
        assert!(matches!(tree.get(&path(["epoch"])), Err(Error::BackendUnavailable(_))));
    }

    #[test]
    fn test_lock_handle_releases_lock() {
        let (dir, factory) = factory();
        let id = factory
            .request(&HandleRequest::RunLock {
                run_hash: "r1".to_string(),
            })
            .unwrap();
        let aim = dir.path().join(".aim");
        assert!(RunLock::acquire(&aim, "r1", LockWait::NoWait).is_err());
        factory.registry().release(&id);
        assert!(RunLock::acquire(&aim, "r1", LockWait::NoWait).is_ok());
    }

    #[test]
    fn test_failed_request_registers_nothing() {
        let (_dir, factory) = factory();
        let err = factory
            .request(&HandleRequest::Tree {
                name: "meta".to_string(),
                sub: None,
                read_only: true,
                from_union: false,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(factory.registry().is_empty());
    }

    #[test]
    fn test_plain_resources() {
        let (_dir, factory) = factory();
        let repo_id = factory.request(&HandleRequest::Repo).unwrap();
        let repo = factory.registry().dereference::<Repo>(&repo_id).unwrap();
        let fm_id = factory.request(&HandleRequest::FileManager).unwrap();
        let fm = factory
            .registry()
            .dereference::<Arc<dyn FileManager>>(&fm_id)
            .unwrap();
        fm.touch("meta/progress/abc").unwrap();
        assert!(repo.path().join("meta/progress/abc").exists());
    }

    #[tokio::test]
    async fn test_heartbeat_handle_stops_on_release() {
        let (dir, factory) = factory();
        let id = factory
            .request(&HandleRequest::RunHeartbeat {
                run_hash: "hb".to_string(),
            })
            .unwrap();
        let flag = dir.path().join(".aim/meta/progress/hb");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(flag.exists());

        factory.registry().release(&id);
        std::fs::remove_file(&flag).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!flag.exists());
    }
}
