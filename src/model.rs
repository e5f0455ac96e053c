//! Data model for graph nodes, edges, and their properties.
//!
//! This mirrors the shape described in `§3` of the design: a node is a
//! mapping from property name to property value, with a mandatory `id`,
//! an optional `proxy` marker, and an `edges` map keyed by target node id.
//!
//! # Examples
//!
//! ```rust
//! use plasma::model::{Node, NodeId, PropValue};
//!
//! let id = NodeId::new_random();
//! let mut node = Node::new(id.clone());
//! node.properties.insert("label".into(), PropValue::from("bass"));
//! assert_eq!(node.id, id);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed prefix for every canonical node identifier.
pub const NODE_ID_PREFIX: &str = "UUID:";

/// Path-variable name reserved for a plan's seed parameter: a peer's graph
/// root (`§3`).
pub const ROOT_VAR: &str = "ROOT-ID";

/// Reserved identifier for a peer's graph root node.
pub fn root_id() -> NodeId {
    NodeId(format!("{NODE_ID_PREFIX}00000000-0000-0000-0000-000000000000"))
}

/// Reserved identifier for a peer's metadata anchor node.
pub fn meta_id() -> NodeId {
    NodeId(format!("{NODE_ID_PREFIX}00000000-0000-0000-0000-000000000001"))
}

/// Opaque node identifier: `"UUID:"` followed by a canonical UUID.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// Wraps a raw identifier string, trusting it is already prefixed.
    ///
    /// Use [`NodeId::parse`] at untrusted boundaries instead.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Parses and validates a `"UUID:<uuid>"` identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let uuid_part = raw.strip_prefix(NODE_ID_PREFIX)?;
        Uuid::parse_str(uuid_part).ok()?;
        Some(Self(raw.to_owned()))
    }

    /// Generates a fresh identifier with a random v4 UUID.
    pub fn new_random() -> Self {
        Self(format!("{NODE_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// The four characters immediately after the prefix — for logs only.
    pub fn short(&self) -> &str {
        let body = self.0.strip_prefix(NODE_ID_PREFIX).unwrap_or(&self.0);
        &body[..body.len().min(4)]
    }

    /// The full raw identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// A scalar property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Scalar {
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload.
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Numeric view of the scalar, for arithmetic/comparison evaluation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            Scalar::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// A property value: scalar, list, or mapping (`§3`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    /// A single scalar.
    Scalar(Scalar),
    /// An ordered list of property values.
    List(Vec<PropValue>),
    /// A nested mapping of property values.
    Map(BTreeMap<String, PropValue>),
}

impl PropValue {
    /// Borrows the scalar inside this value, if it is one.
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            PropValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Borrows the mapping inside this value, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            PropValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl<T: Into<Scalar>> From<T> for PropValue {
    fn from(value: T) -> Self {
        PropValue::Scalar(value.into())
    }
}

/// Properties attached to one edge. Must always carry a `label`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeProps {
    /// The edge's label (relationship type).
    pub label: String,
    /// Any additional edge properties beyond `label`.
    #[serde(default)]
    pub extra: BTreeMap<String, PropValue>,
}

impl EdgeProps {
    /// Creates a new edge-properties map with just a label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            extra: BTreeMap::new(),
        }
    }
}

/// A graph node: a mapping from property name to property value, plus the
/// mandatory `id`, optional `proxy` marker, and outgoing `edges` map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// This node's identifier.
    pub id: NodeId,
    /// If present, this node is a proxy pointing at a node owned by the
    /// peer at this URL (see `§1`/`§4.A`).
    #[serde(default)]
    pub proxy: Option<String>,
    /// Arbitrary properties, excluding `id`, `proxy`, and `edges`.
    #[serde(default)]
    pub properties: BTreeMap<String, PropValue>,
    /// Outgoing edges, keyed by target node id.
    #[serde(default)]
    pub edges: BTreeMap<NodeId, EdgeProps>,
}

impl Node {
    /// Creates a new node with no properties, proxy, or edges.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            proxy: None,
            properties: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    /// True if this node is a proxy for a node on another peer.
    pub fn is_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Adds an outgoing edge to `target` with the given label.
    pub fn with_edge(mut self, target: NodeId, label: impl Into<String>) -> Self {
        self.edges.insert(target, EdgeProps::new(label));
        self
    }

    /// Sets a property value, returning `self` for chaining.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_parse_roundtrip() {
        let id = NodeId::new_random();
        let parsed = NodeId::parse(id.as_str()).expect("valid id");
        assert_eq!(id, parsed);
    }

    #[test]
    fn node_id_rejects_bad_prefix() {
        assert!(NodeId::parse("nope").is_none());
        assert!(NodeId::parse("UUID:not-a-uuid").is_none());
    }

    #[test]
    fn reserved_ids_are_stable() {
        assert_eq!(root_id(), root_id());
        assert_ne!(root_id(), meta_id());
    }
}
