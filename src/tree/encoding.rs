//! Path and node encoding for tree views
//!
//! Key layout:
//!
//! ```text
//! [namespace byte] ([tag] [level bytes] 0xFE)*
//!
//! namespace: 'd' = node data, 't' = schema typename
//! tag 's':   UTF-8 string key (never contains 0xFE)
//! tag 'i':   16 lowercase hex digits of the i64 with its sign bit flipped
//! ```
//!
//! Every node, including objects and arrays, owns the key of its own path;
//! its descendants share that key as a prefix, so a prefix scan returns a
//! node followed by its whole subtree.

use crate::object::{AimObject, AimObjectKey, AimObjectPath, CustomObject};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub(crate) const DATA_NS: u8 = b'd';
pub(crate) const SCHEMA_NS: u8 = b't';

const SEP: u8 = 0xFE;
const STR_TAG: u8 = b's';
const INT_TAG: u8 = b'i';
const SIGN_BIT: u64 = 1 << 63;

/// Value stored under a single node key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum StoredNode {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Object,
    Array,
    Custom(String),
}

pub(crate) fn encode_key(ns: u8, path: &[AimObjectKey]) -> Vec<u8> {
    let mut buf = vec![ns];
    for key in path {
        match key {
            AimObjectKey::Str(s) => {
                buf.push(STR_TAG);
                buf.extend_from_slice(s.as_bytes());
            }
            AimObjectKey::Int(i) => {
                buf.push(INT_TAG);
                #[allow(clippy::cast_sign_loss)]
                let flipped = (*i as u64) ^ SIGN_BIT;
                buf.extend_from_slice(format!("{flipped:016x}").as_bytes());
            }
        }
        buf.push(SEP);
    }
    buf
}

/// Decode the levels of an encoded path (without the namespace byte).
pub(crate) fn decode_path(mut bytes: &[u8]) -> Result<AimObjectPath> {
    let mut path = Vec::new();
    while let Some((&tag, rest)) = bytes.split_first() {
        let end = rest
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| Error::CorruptStore("unterminated tree key level".to_string()))?;
        let level = &rest[..end];
        let key = match tag {
            STR_TAG => AimObjectKey::Str(
                String::from_utf8(level.to_vec())
                    .map_err(|e| Error::CorruptStore(format!("non UTF-8 tree key: {e}")))?,
            ),
            INT_TAG => {
                let hex = std::str::from_utf8(level)
                    .map_err(|e| Error::CorruptStore(format!("bad integer tree key: {e}")))?;
                let flipped = u64::from_str_radix(hex, 16)
                    .map_err(|e| Error::CorruptStore(format!("bad integer tree key: {e}")))?;
                #[allow(clippy::cast_possible_wrap)]
                let value = (flipped ^ SIGN_BIT) as i64;
                AimObjectKey::Int(value)
            }
            other => {
                return Err(Error::CorruptStore(format!("unknown tree key tag {other:#04x}")))
            }
        };
        path.push(key);
        bytes = &rest[end + 1..];
    }
    Ok(path)
}

pub(crate) fn encode_node(node: &StoredNode) -> Result<Vec<u8>> {
    Ok(bincode::serialize(node)?)
}

pub(crate) fn decode_node(bytes: &[u8]) -> Result<StoredNode> {
    bincode::deserialize(bytes).map_err(|e| Error::CorruptStore(format!("undecodable tree node: {e}")))
}

/// Decompose `value` into one stored node per tree position.
pub(crate) fn flatten(path: &mut AimObjectPath, value: &AimObject, out: &mut Vec<(AimObjectPath, StoredNode)>) {
    let node = match value {
        AimObject::None => StoredNode::None,
        AimObject::Bool(b) => StoredNode::Bool(*b),
        AimObject::Int(i) => StoredNode::Int(*i),
        AimObject::Float(f) => StoredNode::Float(*f),
        AimObject::Str(s) => StoredNode::Str(s.clone()),
        AimObject::Bytes(b) => StoredNode::Bytes(b.clone()),
        AimObject::Object(_) => StoredNode::Object,
        AimObject::Array(_) => StoredNode::Array,
        AimObject::Custom(custom) => StoredNode::Custom(custom.typename().to_string()),
    };
    out.push((path.clone(), node));

    let mut descend = |key: AimObjectKey, child: &AimObject, out: &mut Vec<_>| {
        path.push(key);
        flatten(path, child, out);
        path.pop();
    };
    match value {
        AimObject::Object(map) => {
            for (key, child) in map {
                descend(key.clone(), child, out);
            }
        }
        AimObject::Custom(custom) => {
            for (key, child) in custom.fields() {
                descend(key.clone(), child, out);
            }
        }
        AimObject::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                descend(AimObjectKey::from(idx), child, out);
            }
        }
        _ => {}
    }
}

/// Rebuild a value from `(relative path, node)` pairs sorted by key.
///
/// `entries[0]` is the node at `depth` when present; a missing node record
/// is treated as an object.
pub(crate) fn rebuild(entries: &[(AimObjectPath, StoredNode)], depth: usize) -> AimObject {
    let (node, rest) = match entries.split_first() {
        Some((first, rest)) if first.0.len() == depth => (Some(&first.1), rest),
        _ => (None, entries),
    };

    let leaf = match node {
        Some(StoredNode::None) => Some(AimObject::None),
        Some(StoredNode::Bool(b)) => Some(AimObject::Bool(*b)),
        Some(StoredNode::Int(i)) => Some(AimObject::Int(*i)),
        Some(StoredNode::Float(f)) => Some(AimObject::Float(*f)),
        Some(StoredNode::Str(s)) => Some(AimObject::Str(s.clone())),
        Some(StoredNode::Bytes(b)) => Some(AimObject::Bytes(b.clone())),
        Some(StoredNode::Object | StoredNode::Array | StoredNode::Custom(_)) | None => None,
    };
    if let Some(leaf) = leaf {
        return leaf;
    }

    let mut children: Vec<(AimObjectKey, AimObject)> = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let key = &rest[i].0[depth];
        let mut j = i + 1;
        while j < rest.len() && &rest[j].0[depth] == key {
            j += 1;
        }
        children.push((key.clone(), rebuild(&rest[i..j], depth + 1)));
        i = j;
    }

    match node {
        Some(StoredNode::Array) => AimObject::Array(children.into_iter().map(|(_, v)| v).collect()),
        Some(StoredNode::Custom(typename)) => AimObject::Custom(CustomObject::from_parts(
            typename.clone(),
            children.into_iter().collect::<BTreeMap<_, _>>(),
        )),
        _ => AimObject::Object(children.into_iter().collect()),
    }
}
