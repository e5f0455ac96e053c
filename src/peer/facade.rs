//! The peer facade (`§4.H`): the seven local operations an incoming RPC
//! dispatches to. This is the one seam [`super::server::serve`] talks to —
//! it never touches [`crate::runtime::ops`] or [`crate::plan`] directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{PlasmaError, Result};
use crate::graph::GraphAdapter;
use crate::iter_query::{IterQueryDriver, RecurQueryDriver};
use crate::model::{root_id, Node, NodeId, ROOT_VAR};
use crate::plan::{Plan, PlanKind, ResultRecord};
use crate::pt::PathTuple;
use crate::runtime::{Engine, EngineMetrics, EngineOutput, RemoteQuerier, RunContext};

use super::PING_MARKER;

/// Bundles a peer's graph, query engine, and configuration behind the
/// operation set `§4.H` names (`ping`, `node_by_uuid`, `query`,
/// `query_channel`, `sub_query`, `recur_query`, `iter_n_query`).
pub struct PeerFacade {
    graph: Arc<dyn GraphAdapter>,
    engine: Engine,
    config: Config,
}

impl PeerFacade {
    /// Builds a facade over `graph`, proxy-crossing requests through
    /// `remote`, honoring `config`'s timeouts and channel sizing.
    pub fn new(graph: Arc<dyn GraphAdapter>, remote: Arc<dyn RemoteQuerier>, config: Config) -> Self {
        // `RunContext::events` is overridden fresh by `Engine::execute` on
        // every call (`§4.F`); this sender only needs to exist, never be
        // read, so the facade owns exactly one and discards its receiver.
        let (events, _events_rx) = mpsc::unbounded_channel();
        let ctx = RunContext {
            graph: graph.clone(),
            remote,
            events,
            metrics: Arc::new(EngineMetrics::from_env()),
            channel_capacity: config.channel_capacity,
        };
        Self {
            graph,
            engine: Engine::new(ctx),
            config,
        }
    }

    /// `ping()` → the fixed marker (`§8` scenario a).
    pub async fn ping(&self) -> Result<String> {
        Ok(PING_MARKER.to_string())
    }

    /// `node_by_uuid(id)` → a node map or none.
    pub async fn node_by_uuid(&self, id: &NodeId) -> Result<Option<Node>> {
        self.graph.find_node(id).await
    }

    /// `query(plan, params)` → a finite sequence of result records, bounded
    /// by this peer's configured wall-clock query timeout.
    pub async fn query(&self, plan: Plan, seeds: BTreeMap<String, Vec<NodeId>>) -> Result<Vec<ResultRecord>> {
        plan.validate()?;
        let timeout = Duration::from_millis(self.config.query_timeout_ms);
        Ok(self.engine.query(plan, seeds, Some(timeout)).await)
    }

    /// `query_channel(plan, params)` → a raw result stream, used internally
    /// to feed a `receive` op's proxy-crossing merge rather than collecting
    /// into records.
    pub fn query_channel(&self, plan: Plan, seeds: BTreeMap<String, Vec<NodeId>>) -> Result<EngineOutput> {
        plan.validate()?;
        Ok(self.engine.execute(plan, seeds))
    }

    /// `sub_query(plan)` → streams result path tuples; the plan is
    /// self-contained (`§4.G`) and carries its own seed, so no external
    /// seed map is supplied.
    pub async fn sub_query(&self, plan: Plan) -> Result<mpsc::Receiver<PathTuple>> {
        plan.validate()?;
        let output = self.engine.execute(plan, BTreeMap::new());
        Ok(output.results)
    }

    /// `recur_query(plan)` → the final set of terminal node ids once every
    /// branch's predicate stops recursing (`§4.I`). Unlike `query`, neither
    /// RPC method takes a caller-supplied seed map (`§4.H`); the first
    /// round always starts from this peer's own graph root.
    pub async fn recur_query(&self, plan: Plan) -> Result<Vec<NodeId>> {
        if !matches!(plan.kind, PlanKind::RecurQuery { .. }) {
            return Err(PlasmaError::PlanInvalid("recur_query requires a RecurQuery plan".into()));
        }
        plan.validate()?;
        let driver = RecurQueryDriver::new(&self.engine, self.graph.as_ref());
        driver.run(plan, root_seed()).await
    }

    /// `iter_n_query(plan)` → the final round's node ids after `iter-n`
    /// rounds of `ROOT-ID` rebinding (`§4.I`). See [`PeerFacade::recur_query`]
    /// on why no seed map is taken.
    pub async fn iter_n_query(&self, plan: Plan) -> Result<Vec<NodeId>> {
        if !matches!(plan.kind, PlanKind::IterNQuery { .. }) {
            return Err(PlasmaError::PlanInvalid("iter_n_query requires an IterNQuery plan".into()));
        }
        plan.validate()?;
        let driver = IterQueryDriver::new(&self.engine);
        driver.run(plan, root_seed()).await
    }
}

/// The implicit seed every `recur_query`/`iter_n_query` round starts from:
/// this peer's own graph root bound to `ROOT-ID`.
fn root_seed() -> BTreeMap<String, Vec<NodeId>> {
    let mut seeds = BTreeMap::new();
    seeds.insert(ROOT_VAR.to_string(), vec![root_id()]);
    seeds
}

#[cfg(test)]
mod tests {
    use crate::graph::InMemoryGraphAdapter;
    use crate::model::root_id;
    use crate::runtime::NoRemoteQuerier;

    use super::*;

    #[tokio::test]
    async fn ping_returns_fixed_marker() {
        let facade = PeerFacade::new(Arc::new(InMemoryGraphAdapter::new()), Arc::new(NoRemoteQuerier), Config::default());
        assert_eq!(facade.ping().await.unwrap(), super::PING_MARKER);
    }

    #[tokio::test]
    async fn node_by_uuid_reports_missing_node() {
        let facade = PeerFacade::new(Arc::new(InMemoryGraphAdapter::new()), Arc::new(NoRemoteQuerier), Config::default());
        assert!(facade.node_by_uuid(&root_id()).await.unwrap().is_none());
    }
}
