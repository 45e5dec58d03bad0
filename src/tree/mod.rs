//! Typed hierarchical views over containers
//!
//! A [`TreeView`] addresses a container as a tree of [`AimObject`] nodes.
//! Every node that is reachable from the root through objects only carries a
//! schema typename; writes must be compatible with the recorded typename and
//! may widen it (`int` + `float` -> `number`, `list` -> `list(int)`).
//!
//! # Example
//!
//! ```rust
//! use aimstore::container::MemoryContainer;
//! use aimstore::object::{path, AimObject};
//! use aimstore::tree::TreeView;
//! use std::sync::Arc;
//!
//! # fn example() -> aimstore::Result<()> {
//! let tree = TreeView::new(Arc::new(MemoryContainer::new()));
//! tree.set(&path(["hparams", "lr"]), &AimObject::Float(0.01))?;
//! assert_eq!(tree.get(&path(["hparams", "lr"]))?, Some(AimObject::Float(0.01)));
//! assert_eq!(tree.typename(&path(["hparams"]))?.as_deref(), Some("object"));
//! # Ok(())
//! # }
//! ```

mod encoding;

use crate::container::{Container, WriteBatch};
use crate::object::typing::{unify, Unification, OBJECT};
use crate::object::{display_path, get_object_typename, AimObject, AimObjectKey, AimObjectPath};
use crate::{Error, Result};
use encoding::{
    decode_node, decode_path, encode_key, encode_node, flatten, rebuild, StoredNode, DATA_NS,
    SCHEMA_NS,
};
use std::sync::Arc;
use tracing::debug;

/// View of a container rooted at a base path.
///
/// Cloning is cheap; clones share the underlying container.
#[derive(Clone)]
pub struct TreeView {
    container: Arc<dyn Container>,
    base: AimObjectPath,
}

impl std::fmt::Debug for TreeView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeView")
            .field("base", &display_path(&self.base))
            .field("read_only", &self.container.is_read_only())
            .finish()
    }
}

impl TreeView {
    /// View the whole container.
    #[must_use]
    pub fn new(container: Arc<dyn Container>) -> Self {
        Self {
            container,
            base: Vec::new(),
        }
    }

    /// View rooted at `path` below this view's root.
    #[must_use]
    pub fn subtree(&self, path: &[AimObjectKey]) -> Self {
        Self {
            container: Arc::clone(&self.container),
            base: self.full_path(path),
        }
    }

    /// Underlying container.
    #[must_use]
    pub const fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    /// Absolute path of this view's root.
    #[must_use]
    pub fn base_path(&self) -> &[AimObjectKey] {
        &self.base
    }

    /// Whether writes through this view are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.container.is_read_only()
    }

    fn full_path(&self, path: &[AimObjectKey]) -> AimObjectPath {
        let mut full = self.base.clone();
        full.extend_from_slice(path);
        full
    }

    /// Reconstruct the value stored at `path`.
    ///
    /// Returns `None` when nothing is stored there.
    ///
    /// # Errors
    /// Returns error if the container fails or holds undecodable entries.
    pub fn get(&self, path: &[AimObjectKey]) -> Result<Option<AimObject>> {
        let prefix = encode_key(DATA_NS, &self.full_path(path));
        let raw = self.container.prefix_items(&prefix)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            entries.push((decode_path(&key[prefix.len()..])?, decode_node(&value)?));
        }
        Ok(Some(rebuild(&entries, 0)))
    }

    /// Whether anything is stored at `path`.
    ///
    /// # Errors
    /// Returns error if the container fails.
    pub fn contains(&self, path: &[AimObjectKey]) -> Result<bool> {
        let prefix = encode_key(DATA_NS, &self.full_path(path));
        Ok(!self.container.prefix_items(&prefix)?.is_empty())
    }

    /// Recorded schema typename of `path`.
    ///
    /// # Errors
    /// Returns error if the container fails.
    pub fn typename(&self, path: &[AimObjectKey]) -> Result<Option<String>> {
        self.schema_at(&self.full_path(path))
    }

    fn schema_at(&self, full: &[AimObjectKey]) -> Result<Option<String>> {
        self.container
            .get(&encode_key(SCHEMA_NS, full))?
            .map(|raw| {
                String::from_utf8(raw)
                    .map_err(|e| Error::CorruptStore(format!("non UTF-8 schema typename: {e}")))
            })
            .transpose()
    }

    /// Store `value` at `path`, replacing whatever was there.
    ///
    /// The whole write is rejected with [`Error::TypeConflict`] if any typed
    /// node of `value`, or any ancestor of `path`, is incompatible with its
    /// recorded typename. On success data and schema updates land in a single
    /// batch.
    ///
    /// # Errors
    /// `TypeConflict` on schema mismatch, `InvalidMode` on read-only views,
    /// or any container failure.
    pub fn set(&self, path: &[AimObjectKey], value: &AimObject) -> Result<()> {
        if self.container.is_read_only() {
            return Err(Error::InvalidMode(format!(
                "cannot write {} to a read-only tree",
                display_path(&self.full_path(path))
            )));
        }
        let full = self.full_path(path);
        let _txn = self.container.transaction();
        let mut batch = WriteBatch::new();

        // Ancestors must be objects; absent ones are created.
        for depth in 0..full.len() {
            let ancestor = &full[..depth];
            match self.schema_at(ancestor)? {
                Some(base_dtype) if base_dtype != OBJECT => {
                    return Err(Error::TypeConflict {
                        path: display_path(ancestor),
                        dtype: OBJECT.to_string(),
                        base_dtype,
                    });
                }
                Some(_) => {}
                None => {
                    batch.put(encode_key(DATA_NS, ancestor), encode_node(&StoredNode::Object)?);
                    batch.put(encode_key(SCHEMA_NS, ancestor), OBJECT.as_bytes().to_vec());
                }
            }
        }

        let mut typed = Vec::new();
        typed_nodes(&mut full.clone(), value, &mut typed);
        for (node_path, dtype) in typed {
            match self.schema_at(&node_path)? {
                None => batch.put(encode_key(SCHEMA_NS, &node_path), dtype.into_bytes()),
                Some(base_dtype) => match unify(&dtype, &base_dtype) {
                    Unification::Unchanged => {}
                    Unification::Widened(widened) => {
                        debug!(
                            path = %display_path(&node_path),
                            from = %base_dtype,
                            to = %widened,
                            "schema widened"
                        );
                        batch.put(encode_key(SCHEMA_NS, &node_path), widened.into_bytes());
                    }
                    Unification::Conflict => {
                        return Err(Error::TypeConflict {
                            path: display_path(&node_path),
                            dtype,
                            base_dtype,
                        });
                    }
                },
            }
        }

        batch.delete_prefix(encode_key(DATA_NS, &full));
        let mut nodes = Vec::new();
        flatten(&mut full.clone(), value, &mut nodes);
        for (node_path, node) in nodes {
            batch.put(encode_key(DATA_NS, &node_path), encode_node(&node)?);
        }
        self.container.write(batch)
    }

    /// Remove the value and schema at and below `path`.
    ///
    /// Deleting an absent path is not an error.
    ///
    /// # Errors
    /// `InvalidMode` on read-only views, or any container failure.
    pub fn delete(&self, path: &[AimObjectKey]) -> Result<()> {
        let full = self.full_path(path);
        let _txn = self.container.transaction();
        let mut batch = WriteBatch::new();
        batch.delete_prefix(encode_key(DATA_NS, &full));
        batch.delete_prefix(encode_key(SCHEMA_NS, &full));
        self.container.write(batch)
    }

    /// Immediate child keys of the node at `path`.
    ///
    /// Leaves and absent paths have no children.
    ///
    /// # Errors
    /// Same as [`TreeView::get`].
    pub fn keys(&self, path: &[AimObjectKey]) -> Result<Vec<AimObjectKey>> {
        Ok(self.items(path)?.into_iter().map(|(k, _)| k).collect())
    }

    /// Immediate children of the node at `path`, in key order.
    ///
    /// # Errors
    /// Same as [`TreeView::get`].
    pub fn items(&self, path: &[AimObjectKey]) -> Result<Vec<(AimObjectKey, AimObject)>> {
        Ok(match self.get(path)? {
            Some(AimObject::Object(map)) => map.into_iter().collect(),
            Some(AimObject::Custom(custom)) => custom
                .fields()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Some(AimObject::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (AimObjectKey::from(i), v))
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Close the underlying container.
    ///
    /// # Errors
    /// See [`Container::close`].
    pub fn close(&self) -> Result<()> {
        self.container.close()
    }
}

/// Collect `(path, typename)` for the target and every node reached through
/// object members. Array elements and custom-object fields are untyped.
fn typed_nodes(path: &mut AimObjectPath, value: &AimObject, out: &mut Vec<(AimObjectPath, String)>) {
    out.push((path.clone(), get_object_typename(value)));
    if let AimObject::Object(map) = value {
        for (key, child) in map {
            path.push(key.clone());
            typed_nodes(path, child, out);
            path.pop();
        }
    }
}
