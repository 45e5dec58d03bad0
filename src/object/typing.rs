//! Typename derivation and schema unification
//!
//! Each tree path accumulates a recorded typename across writes. Numeric and
//! list-element types only ever widen:
//!
//! ```text
//! int ──┐
//!       ├──> number
//! float ┘
//! list ────> list(<elem>)
//! ```

use super::AimObject;

/// Typename of integers (and booleans).
pub const INT: &str = "int";
/// Typename of floats.
pub const FLOAT: &str = "float";
/// Numeric supertype of `int` and `float`.
pub const NUMBER: &str = "number";
/// Typename of strings.
pub const STR: &str = "str";
/// Typename of byte sequences.
pub const BYTES: &str = "bytes";
/// Typename of keyed objects.
pub const OBJECT: &str = "object";
/// Typename of arrays whose element type is not known yet.
pub const LIST: &str = "list";
/// Typename of the explicit absent value.
pub const UNKNOWN: &str = "unknown";

/// Derive the typename tag of a value.
///
/// Arrays are sampled by their first element only: `[1, "a"]` is
/// `list(int)`, and `[]` is plain `list`.
///
/// ```rust
/// use aimstore::object::AimObject;
/// use aimstore::object::typing::get_object_typename;
///
/// assert_eq!(get_object_typename(&AimObject::Bool(true)), "int");
/// assert_eq!(get_object_typename(&AimObject::Array(vec![])), "list");
/// assert_eq!(
///     get_object_typename(&AimObject::Array(vec![AimObject::Float(1.0)])),
///     "list(float)"
/// );
/// ```
#[must_use]
pub fn get_object_typename(obj: &AimObject) -> String {
    match obj {
        AimObject::Float(_) => FLOAT.to_string(),
        AimObject::Int(_) | AimObject::Bool(_) => INT.to_string(),
        AimObject::Str(_) => STR.to_string(),
        AimObject::Bytes(_) => BYTES.to_string(),
        AimObject::Object(_) => OBJECT.to_string(),
        AimObject::Array(items) => match items.first() {
            None => LIST.to_string(),
            Some(first) => format!("list({})", get_object_typename(first)),
        },
        AimObject::Custom(custom) => custom.typename().to_string(),
        AimObject::None => UNKNOWN.to_string(),
    }
}

/// Whether `dtype` has the shape `list(<elem>)`.
///
/// The element must start with an ASCII letter followed by letters, digits or
/// dots. Only the start of the string is anchored, so nested list typenames
/// such as `list(list(int))` do not qualify.
#[must_use]
pub fn is_typed_list(dtype: &str) -> bool {
    let Some(rest) = dtype.strip_prefix("list(") else {
        return false;
    };
    let mut chars = rest.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    for c in chars {
        if c == ')' {
            return true;
        }
        if !(c.is_ascii_alphanumeric() || c == '.') {
            return false;
        }
    }
    false
}

/// Decide whether `dtype` may be stored where `base_dtype` is recorded.
///
/// When the recorded type has to widen, `on_widen` is called with
/// `(base_dtype, widened)`. Nothing else is mutated.
///
/// ```rust
/// use aimstore::object::typing::check_types_compatibility;
///
/// let mut widened = None;
/// let ok = check_types_compatibility("int", "float", Some(&mut |old: &str, new: &str| {
///     widened = Some((old.to_string(), new.to_string()));
/// }));
/// assert!(ok);
/// assert_eq!(widened, Some(("float".to_string(), "number".to_string())));
/// assert!(!check_types_compatibility("str", "int", None));
/// ```
pub fn check_types_compatibility(
    dtype: &str,
    base_dtype: &str,
    on_widen: Option<&mut dyn FnMut(&str, &str)>,
) -> bool {
    if dtype == base_dtype {
        return true;
    }
    if base_dtype == NUMBER && (dtype == INT || dtype == FLOAT) {
        return true;
    }
    if (dtype == INT && base_dtype == FLOAT) || (dtype == FLOAT && base_dtype == INT) {
        if let Some(cb) = on_widen {
            cb(base_dtype, NUMBER);
        }
        return true;
    }
    if base_dtype == LIST && is_typed_list(dtype) {
        if let Some(cb) = on_widen {
            cb(base_dtype, dtype);
        }
        return true;
    }
    dtype == LIST && is_typed_list(base_dtype)
}

/// Outcome of unifying a new typename with a recorded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unification {
    /// Recorded typename already covers the new one
    Unchanged,
    /// Recorded typename must be replaced by the contained one
    Widened(String),
    /// The types cannot be reconciled
    Conflict,
}

/// Value-returning form of [`check_types_compatibility`].
#[must_use]
pub fn unify(dtype: &str, base_dtype: &str) -> Unification {
    let mut widened = None;
    let ok = check_types_compatibility(
        dtype,
        base_dtype,
        Some(&mut |_old: &str, new: &str| widened = Some(new.to_string())),
    );
    match (ok, widened) {
        (false, _) => Unification::Conflict,
        (true, Some(new)) => Unification::Widened(new),
        (true, None) => Unification::Unchanged,
    }
}
