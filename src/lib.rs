//! # aimstore: Embedded Experiment-Tracking Storage
//!
//! **Version**: 0.1.0
//!
//! aimstore keeps experiment runs in a `.aim` repository directory. Each run
//! owns a metadata chunk and a sequence chunk, stored in ordered key-value
//! containers. Nested objects are written through typed trees that keep a
//! schema alongside the data and widen it as new values arrive.
//!
//! ## Building blocks
//!
//! - [`object`]: the nested value model and its typename rules
//! - [`container`]: ordered byte-keyed stores (disk, memory, union)
//! - [`tree`]: typed nested views over a container
//! - [`run`]: run locks, progress heartbeats, backups, file access
//! - [`repo`]: repository layout, run discovery and resource factories
//! - [`resource`]: handle registry for resources shared with remote clients
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use aimstore::object::{path, AimObject};
//! use aimstore::repo::{Repo, RepoConfig};
//!
//! let repo = Repo::init("/tmp/experiments", RepoConfig::default())?;
//! let run_hash = repo.new_run_hash();
//!
//! let _lock = repo.request_run_lock(&run_hash)?;
//! let meta = repo.request_tree("meta", Some(&run_hash), false, false)?;
//! meta.set(&path(["hparams", "lr"]), &AimObject::Float(0.001))?;
//!
//! let props = repo.request_props(&run_hash, false)?;
//! props.set_name("baseline")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod container;
pub mod error;
pub mod logging;
pub mod object;
pub mod repo;
pub mod resource;
pub mod run;
pub mod tree;

pub use error::{Error, Result};
pub use object::{AimObject, AimObjectKey, AimObjectPath};
pub use repo::{Repo, RepoConfig};
pub use tree::TreeView;
