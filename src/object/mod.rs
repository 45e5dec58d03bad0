//! Object model for the run tree
//!
//! Every value storable at a tree path is an [`AimObject`]: a primitive, an
//! array, an object keyed by [`AimObjectKey`], or a custom object carrying its
//! own typename.
//!
//! ```rust
//! use aimstore::object::{AimObject, AimObjectKey};
//! use aimstore::object::typing::get_object_typename;
//!
//! let metric = AimObject::object([("loss", AimObject::Float(0.5))]);
//! assert_eq!(get_object_typename(&metric), "object");
//! assert_eq!(metric.child(&AimObjectKey::from("loss")), Some(&AimObject::Float(0.5)));
//! ```

pub mod safe;
pub mod typing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use safe::{Node, SafeNone};
pub use typing::{check_types_compatibility, get_object_typename};

/// Addressing unit for one tree level.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AimObjectKey {
    /// Array index (or integer object key)
    Int(i64),
    /// Object member name
    Str(String),
}

impl fmt::Display for AimObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for AimObjectKey {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AimObjectKey {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<usize> for AimObjectKey {
    #[allow(clippy::cast_possible_wrap)]
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<&str> for AimObjectKey {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AimObjectKey {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Root-to-node sequence of keys.
pub type AimObjectPath = Vec<AimObjectKey>;

/// Build an [`AimObjectPath`] from anything convertible to keys.
///
/// ```rust
/// use aimstore::object::{path, AimObjectKey};
///
/// let p = path(["ctx", "metric"]);
/// assert_eq!(p, vec![AimObjectKey::from("ctx"), AimObjectKey::from("metric")]);
/// ```
pub fn path<K, I>(keys: I) -> AimObjectPath
where
    K: Into<AimObjectKey>,
    I: IntoIterator<Item = K>,
{
    keys.into_iter().map(Into::into).collect()
}

/// Render a path for error messages and logs, e.g. `("ctx", "metric", 0)`.
#[must_use]
pub fn display_path(path: &[AimObjectKey]) -> String {
    let parts: Vec<String> = path.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}

/// Domain-specific object kind (images, distributions, ...).
///
/// Stored as a typed node whose fields form an ordinary subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomObject {
    typename: String,
    fields: BTreeMap<AimObjectKey, AimObject>,
}

impl CustomObject {
    /// Create a custom object with no fields.
    #[must_use]
    pub fn new(typename: impl Into<String>) -> Self {
        Self {
            typename: typename.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<AimObjectKey>, value: AimObject) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// The custom typename, e.g. `aim.Image`.
    #[must_use]
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// Field map.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<AimObjectKey, AimObject> {
        &self.fields
    }

    pub(crate) fn from_parts(typename: String, fields: BTreeMap<AimObjectKey, AimObject>) -> Self {
        Self { typename, fields }
    }
}

/// Recursive value universe storable at any tree path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum AimObject {
    /// Explicitly stored absence of a value
    #[default]
    None,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered sequence
    Array(Vec<AimObject>),
    /// Keyed mapping
    Object(BTreeMap<AimObjectKey, AimObject>),
    /// Custom object kind
    Custom(CustomObject),
}

impl AimObject {
    /// Build an object node from key/value pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<AimObjectKey>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// True for every variant except arrays, objects and custom objects.
    #[must_use]
    pub const fn is_primitive(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Object(_) | Self::Custom(_))
    }

    /// Direct child lookup.
    ///
    /// Arrays accept non-negative integer keys; objects accept any key;
    /// custom objects expose their fields.
    #[must_use]
    pub fn child(&self, key: &AimObjectKey) -> Option<&Self> {
        match (self, key) {
            (Self::Array(items), AimObjectKey::Int(i)) => {
                usize::try_from(*i).ok().and_then(|i| items.get(i))
            }
            (Self::Object(map), key) => map.get(key),
            (Self::Custom(custom), key) => custom.fields.get(key),
            _ => None,
        }
    }

    /// Descend along `path`, returning `None` at the first miss.
    #[must_use]
    pub fn at(&self, path: &[AimObjectKey]) -> Option<&Self> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }

    /// Safe navigation wrapper rooted at this value.
    #[must_use]
    pub const fn node(&self) -> Node<'_> {
        Node::Present(self)
    }
}

impl From<bool> for AimObject {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AimObject {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AimObject {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AimObject {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AimObject {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AimObject {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<u8>> for AimObject {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<Self>> for AimObject {
    fn from(value: Vec<Self>) -> Self {
        Self::Array(value)
    }
}

impl From<CustomObject> for AimObject {
    fn from(value: CustomObject) -> Self {
        Self::Custom(value)
    }
}

impl From<serde_json::Value> for AimObject {
    /// JSON numbers that fit `i64` become `Int`, everything else numeric
    /// becomes `Float`.
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Str(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::object(map.into_iter().map(|(k, v)| (k, Self::from(v)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_lookup() {
        let obj = AimObject::object([
            ("a", AimObject::Array(vec![AimObject::Int(1), AimObject::Int(2)])),
            ("b", AimObject::from("x")),
        ]);

        assert_eq!(obj.at(&path(["a"])).map(AimObject::is_primitive), Some(false));
        assert_eq!(
            obj.at(&[AimObjectKey::from("a"), AimObjectKey::Int(1)]),
            Some(&AimObject::Int(2))
        );
        assert_eq!(obj.at(&[AimObjectKey::from("a"), AimObjectKey::Int(-1)]), None);
        assert_eq!(obj.at(&path(["b", "c"])), None);
    }

    #[test]
    fn test_custom_fields_are_children() {
        let image = CustomObject::new("aim.Image").with_field("width", AimObject::Int(32));
        let obj = AimObject::from(image);
        assert_eq!(obj.child(&"width".into()), Some(&AimObject::Int(32)));
    }

    #[test]
    fn test_from_json() {
        let obj = AimObject::from(serde_json::json!({"lr": 0.01, "epochs": 10, "tags": ["a"]}));
        assert_eq!(obj.child(&"lr".into()), Some(&AimObject::Float(0.01)));
        assert_eq!(obj.child(&"epochs".into()), Some(&AimObject::Int(10)));
        assert_eq!(
            obj.child(&"tags".into()),
            Some(&AimObject::Array(vec![AimObject::from("a")]))
        );
    }

    #[test]
    fn test_display_path() {
        let p = vec![AimObjectKey::from("ctx"), AimObjectKey::Int(3)];
        assert_eq!(display_path(&p), "(\"ctx\", 3)");
        assert_eq!(display_path(&[]), "()");
    }
}
