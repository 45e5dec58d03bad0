//! Safe absence for chained tree navigation
//!
//! Looking up `tree["a"]["b"]["c"]` should not need a check at every level.
//! [`Node`] carries either a borrowed value or [`Node::Absent`]; every lookup
//! on `Absent` yields `Absent` again, so a miss anywhere in a chain degrades
//! to "no value".
//!
//! ```rust
//! use aimstore::object::{AimObject, Node};
//!
//! let params = AimObject::from(serde_json::json!({"optimizer": {"lr": 0.01}}));
//! assert_eq!(params.node().get("optimizer").get("lr").value(), Some(&AimObject::Float(0.01)));
//!
//! let missing = params.node().get("scheduler").get("gamma").get(0);
//! assert!(!missing.is_truthy());
//! assert_eq!(missing, Node::Absent);
//! assert_eq!(missing.iter().count(), 0);
//! ```

use super::{AimObject, AimObjectKey};
use std::fmt;

/// The process-wide "no value here" marker.
///
/// Zero-sized: every reference returned by [`SafeNone::instance`] points to
/// the same static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SafeNone;

static SAFE_NONE: SafeNone = SafeNone;

impl SafeNone {
    /// The singleton instance.
    #[must_use]
    pub fn instance() -> &'static Self {
        &SAFE_NONE
    }
}

impl fmt::Display for SafeNone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("None")
    }
}

/// Result of navigating into an [`AimObject`].
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    /// A stored value
    Present(&'a AimObject),
    /// Nothing at this position
    Absent,
}

impl<'a> Node<'a> {
    /// Wrap an optional reference.
    #[must_use]
    pub const fn from_option(value: Option<&'a AimObject>) -> Self {
        match value {
            Some(v) => Self::Present(v),
            None => Self::Absent,
        }
    }

    /// Child lookup; `Absent` on any miss.
    #[must_use]
    pub fn get(self, key: impl Into<AimObjectKey>) -> Self {
        match self {
            Self::Present(obj) => Self::from_option(obj.child(&key.into())),
            Self::Absent => Self::Absent,
        }
    }

    /// Multi-level lookup.
    #[must_use]
    pub fn at(self, path: &[AimObjectKey]) -> Self {
        match self {
            Self::Present(obj) => Self::from_option(obj.at(path)),
            Self::Absent => Self::Absent,
        }
    }

    /// Apply `f` to a present value, short-circuiting on `Absent`.
    #[must_use]
    pub fn and_then(self, f: impl FnOnce(&'a AimObject) -> Option<&'a AimObject>) -> Self {
        match self {
            Self::Present(obj) => Self::from_option(f(obj)),
            Self::Absent => Self::Absent,
        }
    }

    /// The borrowed value, if any.
    #[must_use]
    pub const fn value(self) -> Option<&'a AimObject> {
        match self {
            Self::Present(obj) => Some(obj),
            Self::Absent => None,
        }
    }

    /// Whether a value exists at this position.
    #[must_use]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Truthiness: `Absent`, stored `None`, `false`, zero, and empty
    /// strings/bytes/containers are falsy.
    #[must_use]
    pub fn is_truthy(self) -> bool {
        match self {
            Self::Absent | Self::Present(AimObject::None) => false,
            Self::Present(AimObject::Bool(b)) => *b,
            Self::Present(AimObject::Int(i)) => *i != 0,
            Self::Present(AimObject::Float(f)) => *f != 0.0,
            Self::Present(AimObject::Str(s)) => !s.is_empty(),
            Self::Present(AimObject::Bytes(b)) => !b.is_empty(),
            Self::Present(AimObject::Array(items)) => !items.is_empty(),
            Self::Present(AimObject::Object(map)) => !map.is_empty(),
            Self::Present(AimObject::Custom(_)) => true,
        }
    }

    /// Iterate over child values. Primitives and `Absent` yield nothing.
    #[must_use]
    pub fn iter(self) -> Box<dyn Iterator<Item = Node<'a>> + 'a> {
        match self {
            Self::Present(AimObject::Array(items)) => Box::new(items.iter().map(Node::Present)),
            Self::Present(AimObject::Object(map)) => Box::new(map.values().map(Node::Present)),
            Self::Present(AimObject::Custom(custom)) => {
                Box::new(custom.fields().values().map(Node::Present))
            }
            _ => Box::new(std::iter::empty()),
        }
    }
}

impl PartialEq for Node<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Present(a), Self::Present(b)) => a == b,
            (Self::Absent, Self::Absent) => true,
            _ => false,
        }
    }
}

impl PartialEq<Option<&AimObject>> for Node<'_> {
    fn eq(&self, other: &Option<&AimObject>) -> bool {
        match (self, other) {
            (Self::Present(a), Some(b)) => *a == *b,
            (Self::Absent, None) => true,
            _ => false,
        }
    }
}

impl PartialEq<SafeNone> for Node<'_> {
    fn eq(&self, _other: &SafeNone) -> bool {
        matches!(self, Self::Absent)
    }
}

impl<'a> From<Option<&'a AimObject>> for Node<'a> {
    fn from(value: Option<&'a AimObject>) -> Self {
        Self::from_option(value)
    }
}
