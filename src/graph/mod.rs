//! The graph adapter (`§4.A`): a minimal read surface over the underlying
//! single-node graph store.
//!
//! The store itself — transactional node/edge persistence — is an external
//! collaborator out of this crate's scope (`§1`). [`GraphAdapter`] is the
//! seam; [`memory::InMemoryGraphAdapter`] is the one concrete, in-process
//! implementation this crate ships, mirroring the way `sombra`'s
//! `MetadataProvider` trait ships both a real `CatalogMetadata` and a test
//! `InMemoryMetadata`.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EdgeProps, Node, NodeId};

pub use memory::InMemoryGraphAdapter;

/// Which outgoing edges a `traverse` step should follow (`§4.A`, `§4.D`).
///
/// The wire-transportable subset of `§4.A`'s predicate kinds: absent (all
/// edges), a label symbol, or a label regex. Arbitrary predicates over the
/// full edge mapping are not serializable and so cannot appear inside a
/// [`crate::plan::Plan`] that might cross the wire (`§4.G`); local callers
/// that need that generality can filter [`GraphAdapter::edges`]'s result
/// directly instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EdgePredicate {
    /// Matches every edge.
    Any,
    /// Matches edges whose label equals this string exactly.
    Label(String),
    /// Matches edges whose label matches this regex pattern.
    Regex(String),
}

impl EdgePredicate {
    /// Evaluates the predicate against one edge's properties.
    pub fn matches(&self, props: &EdgeProps) -> Result<bool> {
        match self {
            EdgePredicate::Any => Ok(true),
            EdgePredicate::Label(label) => Ok(&props.label == label),
            EdgePredicate::Regex(pattern) => {
                let re = Regex::new(pattern).map_err(|err| {
                    crate::error::PlasmaError::TypeMismatch {
                        op: "edge-regex".into(),
                        detail: err.to_string(),
                    }
                })?;
                Ok(re.is_match(&props.label))
            }
        }
    }
}

/// Minimal read surface over a peer's local graph store (`§4.A`).
///
/// Writes are delegated to the store; the query engine never mutates the
/// graph, so no write methods appear here.
#[async_trait]
pub trait GraphAdapter: Send + Sync {
    /// Looks up a node by id.
    async fn find_node(&self, id: &NodeId) -> Result<Option<Node>>;

    /// Lists outgoing edges from `id` matching `pred` (all edges if `None`).
    async fn edges(
        &self,
        id: &NodeId,
        pred: Option<&EdgePredicate>,
    ) -> Result<BTreeMap<NodeId, EdgeProps>>;

    /// True if `id` names a proxy node (`§1`).
    async fn is_proxy(&self, id: &NodeId) -> Result<bool> {
        Ok(self
            .find_node(id)
            .await?
            .map(|n| n.is_proxy())
            .unwrap_or(false))
    }
}
