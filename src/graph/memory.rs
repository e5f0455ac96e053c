//! An in-memory [`GraphAdapter`], analogous to `sombra`'s `InMemoryMetadata`.
//!
//! Used directly by tests and by the `plasma-peer` binary's `--seed-file`
//! startup path; a peer backed by a real transactional store would ship its
//! own [`GraphAdapter`] impl outside this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{EdgeProps, Node, NodeId};

use super::{EdgePredicate, GraphAdapter};

/// A graph held entirely in memory behind a `tokio` read-write lock.
///
/// Concurrent reads are safe (`§5` "Shared resources"); writes go through
/// [`InMemoryGraphAdapter::insert`], which is not part of the
/// [`GraphAdapter`] trait itself since the query engine never mutates the
/// graph through that seam.
#[derive(Clone, Default)]
pub struct InMemoryGraphAdapter {
    nodes: Arc<RwLock<BTreeMap<NodeId, Node>>>,
}

impl InMemoryGraphAdapter {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a node.
    pub async fn insert(&self, node: Node) {
        self.nodes.write().await.insert(node.id.clone(), node);
    }
}

#[async_trait]
impl GraphAdapter for InMemoryGraphAdapter {
    async fn find_node(&self, id: &NodeId) -> Result<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn edges(
        &self,
        id: &NodeId,
        pred: Option<&EdgePredicate>,
    ) -> Result<BTreeMap<NodeId, EdgeProps>> {
        let nodes = self.nodes.read().await;
        let Some(node) = nodes.get(id) else {
            return Ok(BTreeMap::new());
        };
        let mut out = BTreeMap::new();
        for (target, props) in &node.edges {
            let keep = match pred {
                Some(p) => p.matches(props)?,
                None => true,
            };
            if keep {
                out.insert(target.clone(), props.clone());
            }
        }
        Ok(out)
    }

    async fn is_proxy(&self, id: &NodeId) -> Result<bool> {
        Ok(self
            .nodes
            .read()
            .await
            .get(id)
            .map(|n| n.is_proxy())
            .unwrap_or(false))
    }
}
