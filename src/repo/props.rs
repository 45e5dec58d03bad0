//! Run properties - typed accessors over a run's `props` subtree

use crate::object::{path, AimObject};
use crate::tree::TreeView;
use crate::{Error, Result};
use chrono::{DateTime, Utc};

const NAME: &str = "name";
const DESCRIPTION: &str = "description";
const EXPERIMENT: &str = "experiment";
const ARCHIVED: &str = "archived";
const TAGS: &str = "tags";
const CREATED_AT: &str = "created_at";

/// Descriptive properties of one run.
///
/// Every accessor reads through to the underlying tree, so concurrent
/// writers sharing the container observe each other's updates.
#[derive(Debug, Clone)]
pub struct RunProperties {
    run_hash: String,
    tree: TreeView,
}

impl RunProperties {
    /// Wrap the `props` subtree of `run_hash`.
    #[must_use]
    pub fn new(run_hash: impl Into<String>, tree: TreeView) -> Self {
        Self {
            run_hash: run_hash.into(),
            tree,
        }
    }

    /// Get the run hash.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    /// Get the underlying tree view.
    #[must_use]
    pub const fn tree(&self) -> &TreeView {
        &self.tree
    }

    fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.tree.get(&path([key]))? {
            Some(AimObject::Str(s)) => Ok(Some(s)),
            None | Some(AimObject::None) => Ok(None),
            Some(other) => Err(Error::CorruptStore(format!(
                "run {} property '{key}' is not a string: {other:?}",
                self.run_hash
            ))),
        }
    }

    fn set(&self, key: &str, value: AimObject) -> Result<()> {
        self.tree.set(&path([key]), &value)
    }

    /// Get the run name.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn name(&self) -> Result<Option<String>> {
        self.get_str(NAME)
    }

    /// Set the run name.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn set_name(&self, name: &str) -> Result<()> {
        self.set(NAME, AimObject::from(name))
    }

    /// Get the run description.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn description(&self) -> Result<Option<String>> {
        self.get_str(DESCRIPTION)
    }

    /// Set the run description.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn set_description(&self, description: &str) -> Result<()> {
        self.set(DESCRIPTION, AimObject::from(description))
    }

    /// Get the experiment the run belongs to.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn experiment(&self) -> Result<Option<String>> {
        self.get_str(EXPERIMENT)
    }

    /// Move the run to `experiment`.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn set_experiment(&self, experiment: &str) -> Result<()> {
        self.set(EXPERIMENT, AimObject::from(experiment))
    }

    /// Whether the run is archived. Unset means not archived.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn archived(&self) -> Result<bool> {
        Ok(self
            .tree
            .get(&path([ARCHIVED]))?
            .is_some_and(|v| v.node().is_truthy()))
    }

    /// Archive or unarchive the run.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn set_archived(&self, archived: bool) -> Result<()> {
        self.set(ARCHIVED, AimObject::Bool(archived))
    }

    /// Get the run's tags, in insertion order.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read.
    pub fn tags(&self) -> Result<Vec<String>> {
        Ok(self
            .tree
            .items(&path([TAGS]))?
            .into_iter()
            .filter_map(|(_, v)| match v {
                AimObject::Str(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    /// Add `tag` unless already present.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn add_tag(&self, tag: &str) -> Result<()> {
        let mut tags = self.tags()?;
        if tags.iter().any(|t| t == tag) {
            return Ok(());
        }
        tags.push(tag.to_string());
        self.write_tags(tags)
    }

    /// Remove `tag`; returns whether it was present.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn remove_tag(&self, tag: &str) -> Result<bool> {
        let mut tags = self.tags()?;
        let before = tags.len();
        tags.retain(|t| t != tag);
        if tags.len() == before {
            return Ok(false);
        }
        self.write_tags(tags)?;
        Ok(true)
    }

    fn write_tags(&self, tags: Vec<String>) -> Result<()> {
        self.set(
            TAGS,
            AimObject::Array(tags.into_iter().map(AimObject::Str).collect()),
        )
    }

    /// Get the creation time, if recorded.
    ///
    /// # Errors
    /// Returns error if the tree cannot be read or the stamp is malformed.
    pub fn created_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_str(CREATED_AT)?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::CorruptStore(format!("bad creation time '{s}': {e}")))
            })
            .transpose()
    }

    /// Record the creation time if none is set yet.
    ///
    /// # Errors
    /// Returns error if the tree is read-only or cannot be written.
    pub fn ensure_created_at(&self) -> Result<DateTime<Utc>> {
        if let Some(existing) = self.created_at()? {
            return Ok(existing);
        }
        let now = Utc::now();
        self.set(CREATED_AT, AimObject::Str(now.to_rfc3339()))?;
        Ok(now)
    }

    /// Close the underlying container.
    ///
    /// # Errors
    /// See [`TreeView::close`].
    pub fn close(&self) -> Result<()> {
        self.tree.close()
    }
}
