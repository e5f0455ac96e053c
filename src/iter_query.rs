//! The recursive/iterated query driver (`§4.I`): `iter-n-query` and
//! `recur-query`, the two [`Plan`](crate::plan::Plan) kinds that rebind
//! `ROOT-ID` and re-run rather than executing once.
//!
//! **Open Question resolution** (recorded in `DESIGN.md`): `§4.I`'s prose
//! has the originator of a `recur-query` "listen for a single event bearing
//! the final result" and has non-recursing branches "forward to the
//! originator over the network". Proxy-crossing traversal already carries
//! any cross-peer hop transparently (`§4.G`/`§9` "location transparency"),
//! so a branch that stops recursing needs no bespoke forwarding path of its
//! own — it simply becomes part of this call's return value, which already
//! travels back to whichever peer invoked `recur_query` as the RPC
//! response (the "single event"). `RecurQueryDriver` therefore only
//! implements the per-branch recurse/stop decision; transport is the
//! existing [`crate::subplan`]/[`crate::runtime::RemoteQuerier`] machinery.

use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};

use crate::error::{PlasmaError, Result};
use crate::expr::{eval_call, LExpr};
use crate::graph::GraphAdapter;
use crate::model::{Node, NodeId, PropValue, Scalar, ROOT_VAR};
use crate::plan::{Plan, PlanKind};
use crate::runtime::Engine;

/// Runs `iter-n-query` plans (`§4.I`, steps 1-3).
pub struct IterQueryDriver<'a> {
    engine: &'a Engine,
}

impl<'a> IterQueryDriver<'a> {
    /// Binds a driver to the engine that will run each round.
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Runs `plan` to completion, rebinding `ROOT-ID` to the prior round's
    /// results between iterations. `seeds` supplies the first round's seed.
    ///
    /// Returns the final round's raw node ids once `iter-n` reaches zero, or
    /// [`PlasmaError::HtlExhausted`] if the hop budget runs out first
    /// (`§8` property 6).
    pub async fn run(&self, plan: Plan, mut seeds: BTreeMap<String, Vec<NodeId>>) -> Result<Vec<NodeId>> {
        let (mut iter_n, iter_params) = match &plan.kind {
            PlanKind::IterNQuery { iter_n, iter_params } => (*iter_n, iter_params.clone()),
            other => {
                return Err(PlasmaError::PlanInvalid(format!(
                    "iter_n_query requires an IterNQuery plan, got {other:?}"
                )))
            }
        };
        let mut htl = plan.htl.unwrap_or(u32::MAX);

        loop {
            iter_n = iter_n.saturating_sub(1);
            htl = htl.saturating_sub(1);

            let ids = self.engine.query_raw_ids(plan.clone(), seeds.clone(), None).await;

            if iter_n == 0 {
                return Ok(ids);
            }
            if htl == 0 {
                return Err(PlasmaError::HtlExhausted);
            }

            for name in iter_params.keys() {
                seeds.insert(name.clone(), ids.clone());
            }
            if iter_params.is_empty() {
                seeds.insert(ROOT_VAR.to_string(), ids);
            }
        }
    }
}

/// Runs `recur-query` plans (`§4.I`).
pub struct RecurQueryDriver<'a> {
    engine: &'a Engine,
    graph: &'a dyn GraphAdapter,
}

impl<'a> RecurQueryDriver<'a> {
    /// Binds a driver to the engine that runs each branch's plan and the
    /// graph used to evaluate the recursion predicate.
    pub fn new(engine: &'a Engine, graph: &'a dyn GraphAdapter) -> Self {
        Self { engine, graph }
    }

    /// Runs `plan`, recursing per-branch while `pred` holds for the node
    /// reached, stopping a branch once `pred` is false (`§4.I`).
    pub async fn run(&self, plan: Plan, seeds: BTreeMap<String, Vec<NodeId>>) -> Result<Vec<NodeId>> {
        let pred = match &plan.kind {
            PlanKind::RecurQuery { pred } => pred.clone(),
            other => {
                return Err(PlasmaError::PlanInvalid(format!(
                    "recur_query requires a RecurQuery plan, got {other:?}"
                )))
            }
        };
        let htl = plan.htl.unwrap_or(u32::MAX);
        self.recurse(&plan, &pred, seeds, htl).await
    }

    fn recurse<'b>(
        &'b self,
        plan: &'b Plan,
        pred: &'b LExpr,
        seeds: BTreeMap<String, Vec<NodeId>>,
        htl: u32,
    ) -> BoxFuture<'b, Result<Vec<NodeId>>> {
        async move {
            if htl == 0 {
                return Err(PlasmaError::HtlExhausted);
            }
            let ids = self.engine.query_raw_ids(plan.clone(), seeds, None).await;

            let mut terminal = Vec::new();
            let mut recurse_seeds = Vec::new();
            for id in ids {
                let node = self
                    .graph
                    .find_node(&id)
                    .await?
                    .ok_or_else(|| PlasmaError::GraphMissing(id.to_string()))?;
                if eval_pred_on_node(pred, &node)? {
                    recurse_seeds.push(id);
                } else {
                    terminal.push(id);
                }
            }

            if recurse_seeds.is_empty() {
                return Ok(terminal);
            }

            let mut next_seeds = BTreeMap::new();
            next_seeds.insert(ROOT_VAR.to_string(), recurse_seeds);
            let deeper = self.recurse(plan, pred, next_seeds, htl - 1).await?;
            terminal.extend(deeper);
            Ok(terminal)
        }
        .boxed()
    }
}

/// Evaluates `expr` against a single node's properties directly, without a
/// [`crate::pt::PathTuple`] — the per-branch recursion decision has only one
/// "current" node in scope, not an operator-keyed tuple.
fn eval_value(expr: &LExpr, node: &Node) -> Result<PropValue> {
    match expr {
        LExpr::Lit(v) => Ok(v.clone()),
        LExpr::PropRef { prop, .. } => node.properties.get(prop).cloned().ok_or_else(|| {
            PlasmaError::TypeMismatch {
                op: "recur-predicate".into(),
                detail: format!("property `{prop}` not present on node {}", node.id),
            }
        }),
        LExpr::ValueRef(op) => Err(PlasmaError::TypeMismatch {
            op: op.to_string(),
            detail: "recur-query predicates cannot reference an upstream expression value".into(),
        }),
        LExpr::Call { op, args } => {
            let values = args.iter().map(|a| eval_value(a, node)).collect::<Result<Vec<_>>>()?;
            eval_call(op, &values)
        }
    }
}

fn eval_pred_on_node(pred: &LExpr, node: &Node) -> Result<bool> {
    match eval_value(pred, node)? {
        PropValue::Scalar(Scalar::Bool(b)) => Ok(b),
        other => Err(PlasmaError::TypeMismatch {
            op: "recur-predicate".into(),
            detail: format!("predicate must evaluate to a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::expr::Expr;
    use crate::graph::InMemoryGraphAdapter;
    use crate::model::{root_id, Node};
    use crate::query::ast::{EdgeStep, PathQuery, Segment};
    use crate::query::planner::Planner;
    use crate::runtime::{EngineMetrics, NoRemoteQuerier, RunContext};

    use super::*;

    async fn chain_graph(len: usize) -> (InMemoryGraphAdapter, Vec<NodeId>) {
        let graph = InMemoryGraphAdapter::new();
        let mut ids = vec![root_id()];
        for i in 0..len {
            ids.push(NodeId::new_random());
            let node = Node::new(ids[i].clone())
                .with_edge(ids[i + 1].clone(), "friend")
                .with_property("depth", i as i64);
            graph.insert(node).await;
        }
        graph
            .insert(Node::new(ids[len].clone()).with_property("depth", len as i64))
            .await;
        (graph, ids)
    }

    fn test_ctx(graph: InMemoryGraphAdapter) -> RunContext {
        let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
        RunContext {
            graph: Arc::new(graph),
            remote: Arc::new(NoRemoteQuerier),
            events,
            metrics: Arc::new(EngineMetrics::from_env()),
            channel_capacity: 16,
        }
    }

    fn one_hop_plan() -> crate::plan::Plan {
        let query = PathQuery::path(vec![Segment::new("next", vec![EdgeStep::label("friend")])]);
        Planner::new().plan(&query).expect("plan").plan
    }

    #[tokio::test]
    async fn iter_n_query_reaches_distance_three_with_ample_htl() {
        let (graph, ids) = chain_graph(5).await;
        let mut plan = one_hop_plan();
        let iter_params = {
            let mut m = BTreeMap::new();
            m.insert(ROOT_VAR.to_string(), plan.params[ROOT_VAR].clone());
            m
        };
        plan.kind = PlanKind::IterNQuery { iter_n: 3, iter_params };
        plan.htl = Some(5);

        let engine = Engine::new(test_ctx(graph));
        let driver = IterQueryDriver::new(&engine);
        let mut seeds = BTreeMap::new();
        seeds.insert(ROOT_VAR.to_string(), vec![ids[0].clone()]);

        let result = driver.run(plan, seeds).await.expect("iteration succeeds");
        assert_eq!(result, vec![ids[3].clone()]);
    }

    #[tokio::test]
    async fn iter_n_query_reports_htl_reached() {
        let (graph, ids) = chain_graph(5).await;
        let mut plan = one_hop_plan();
        let iter_params = {
            let mut m = BTreeMap::new();
            m.insert(ROOT_VAR.to_string(), plan.params[ROOT_VAR].clone());
            m
        };
        plan.kind = PlanKind::IterNQuery { iter_n: 3, iter_params };
        plan.htl = Some(2);

        let engine = Engine::new(test_ctx(graph));
        let driver = IterQueryDriver::new(&engine);
        let mut seeds = BTreeMap::new();
        seeds.insert(ROOT_VAR.to_string(), vec![ids[0].clone()]);

        let result = driver.run(plan, seeds).await;
        assert!(matches!(result, Err(PlasmaError::HtlExhausted)));
    }

    #[tokio::test]
    async fn recur_query_stops_once_predicate_fails() {
        let (graph, ids) = chain_graph(5).await;
        let mut plan = one_hop_plan();
        // Recurse while `depth < 2`; the third hop (depth == 2) should stop.
        let pred = LExpr::Call {
            op: "<".into(),
            args: vec![
                LExpr::PropRef { op: plan.root.clone(), prop: "depth".into() },
                LExpr::Lit(PropValue::from(2_i64)),
            ],
        };
        plan.kind = PlanKind::RecurQuery { pred };
        plan.htl = Some(10);

        let engine = Engine::new(test_ctx(graph.clone()));
        let driver = RecurQueryDriver::new(&engine, &graph);
        let mut seeds = BTreeMap::new();
        seeds.insert(ROOT_VAR.to_string(), vec![ids[0].clone()]);

        let result = driver.run(plan, seeds).await.expect("recursion succeeds");
        assert_eq!(result, vec![ids[2].clone()]);
    }
}
