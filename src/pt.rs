//! Path tuples (PTs): the unit of flow between operators (`§3`/`§4.B`).
//!
//! A PT is a mapping keyed by *operator identifiers* (stable ids assigned at
//! plan time). Every operator produces new PTs by structural extension; a
//! PT already placed on a channel is never mutated (`§3` invariants).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{NodeId, PropValue};
use crate::plan::OpId;

/// What a single operator contributed to a path tuple: either the graph
/// node id it bound, or — for property/projection ops — a nested mapping of
/// loaded properties for that node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PtSlot {
    /// A bound node id.
    Node(NodeId),
    /// Loaded properties for the node bound at this slot's operator.
    Props(BTreeMap<String, PropValue>),
    /// A scalar value produced by an `expression` operator.
    Value(PropValue),
}

impl PtSlot {
    /// Borrows the node id in this slot, if it is one.
    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            PtSlot::Node(id) => Some(id),
            _ => None,
        }
    }

    /// Borrows the property map in this slot, if it is one.
    pub fn as_props(&self) -> Option<&BTreeMap<String, PropValue>> {
        match self {
            PtSlot::Props(props) => Some(props),
            _ => None,
        }
    }
}

/// An immutable path tuple.
///
/// Cloning a [`PathTuple`] is cheap relative to a full graph node, but is
/// still an O(n) map clone; operators that only add one binding use
/// [`PathTuple::extended`] rather than mutating a shared instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathTuple {
    bindings: BTreeMap<OpId, PtSlot>,
}

impl PathTuple {
    /// The empty path tuple.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a new tuple extended with one more binding. Right (the new
    /// binding) wins if the key is already present.
    pub fn extended(&self, key: OpId, value: PtSlot) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.insert(key, value);
        Self { bindings }
    }

    /// Merges two tuples; bindings in `other` win on key conflicts.
    pub fn merged(&self, other: &PathTuple) -> Self {
        let mut bindings = self.bindings.clone();
        for (k, v) in &other.bindings {
            bindings.insert(k.clone(), v.clone());
        }
        Self { bindings }
    }

    /// Looks up the binding for operator `key`.
    pub fn get(&self, key: &OpId) -> Option<&PtSlot> {
        self.bindings.get(key)
    }

    /// Looks up the bound node id for operator `key`.
    pub fn node(&self, key: &OpId) -> Option<&NodeId> {
        self.get(key).and_then(PtSlot::as_node)
    }

    /// Iterates over all bindings.
    pub fn iter(&self) -> impl Iterator<Item = (&OpId, &PtSlot)> {
        self.bindings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extend_does_not_mutate_original() {
        let base = PathTuple::empty();
        let op = OpId::from_raw("op0");
        let extended = base.extended(op.clone(), PtSlot::Node(NodeId::new_random()));
        assert!(base.get(&op).is_none());
        assert!(extended.get(&op).is_some());
    }

    #[test]
    fn merge_right_wins() {
        let op = OpId::from_raw("op0");
        let left = PathTuple::empty().extended(op.clone(), PtSlot::Node(NodeId::new_random()));
        let right_id = NodeId::new_random();
        let right = PathTuple::empty().extended(op.clone(), PtSlot::Node(right_id.clone()));
        let merged = left.merged(&right);
        assert_eq!(merged.node(&op), Some(&right_id));
    }
}
