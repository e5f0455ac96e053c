//! `§8` scenario d: `iter-n-query` rebinds `ROOT-ID` to each round's result
//! set and reports `HtlExhausted` once the hop budget runs out first.

use std::collections::BTreeMap;
use std::sync::Arc;

use plasma::config::Config;
use plasma::error::PlasmaError;
use plasma::expr::LExpr;
use plasma::graph::InMemoryGraphAdapter;
use plasma::model::{root_id, Node, NodeId};
use plasma::peer::PeerFacade;
use plasma::plan::{OpId, OpKind, OpNode, Plan, PlanKind};
use plasma::runtime::NoRemoteQuerier;

/// A chain of `len` nodes beyond the root, each linked to the next by a
/// "next" edge: root -> n0 -> n1 -> ... -> n(len-1).
async fn chain_graph(len: usize) -> (InMemoryGraphAdapter, Vec<NodeId>) {
    let graph = InMemoryGraphAdapter::new();
    let ids: Vec<NodeId> = (0..len).map(|_| NodeId::new_random()).collect();

    let mut prev = Node::new(root_id());
    prev = prev.with_edge(ids[0].clone(), "next");
    graph.insert(prev).await;

    for (i, id) in ids.iter().enumerate() {
        let mut node = Node::new(id.clone());
        if let Some(next) = ids.get(i + 1) {
            node = node.with_edge(next.clone(), "next");
        }
        graph.insert(node).await;
    }

    (graph, ids)
}

/// A one-hop `IterNQuery` plan over the "next" edge, re-seeded each round
/// from the `ROOT-ID` parameter. `literal` stays unset so the facade's
/// implicit first-round seed (this peer's graph root) and every later
/// round's rebind both flow through the same `seeds` map (`§4.H`/`§4.I`).
fn one_hop_iter_plan(iter_n: u32, htl: u32) -> Plan {
    let mut ops = BTreeMap::new();
    let param_id = OpId::from_raw("param");
    ops.insert(
        param_id.clone(),
        OpNode {
            id: param_id.clone(),
            kind: OpKind::Parameter { name: "ROOT-ID".into(), literal: None },
            deps: vec![],
        },
    );
    let traverse_id = OpId::from_raw("traverse");
    ops.insert(
        traverse_id.clone(),
        OpNode {
            id: traverse_id.clone(),
            kind: OpKind::Traverse {
                src_key: param_id.clone(),
                predicate: plasma::graph::EdgePredicate::Label("next".into()),
            },
            deps: vec![param_id.clone()],
        },
    );

    let mut iter_params = BTreeMap::new();
    iter_params.insert("ROOT-ID".to_string(), param_id.clone());

    Plan {
        ops,
        root: traverse_id,
        params: [("ROOT-ID".to_string(), param_id.clone())].into_iter().collect(),
        pbind: BTreeMap::new(),
        filters: vec![],
        projection: None,
        src_url: None,
        htl: Some(htl),
        kind: PlanKind::IterNQuery { iter_n, iter_params },
    }
}

#[tokio::test]
async fn iter_n_query_advances_one_hop_per_round() {
    let (graph, ids) = chain_graph(5).await;
    let facade = PeerFacade::new(Arc::new(graph), Arc::new(NoRemoteQuerier), Config::default());

    let plan = one_hop_iter_plan(3, 10);
    let result = facade.iter_n_query(plan).await.unwrap();

    assert_eq!(result, vec![ids[2].clone()]);
}

#[tokio::test]
async fn iter_n_query_reports_htl_exhausted_before_reaching_iter_n() {
    let (graph, _ids) = chain_graph(5).await;
    let facade = PeerFacade::new(Arc::new(graph), Arc::new(NoRemoteQuerier), Config::default());

    let plan = one_hop_iter_plan(5, 2);
    let result = facade.iter_n_query(plan).await;

    assert!(matches!(result, Err(PlasmaError::HtlExhausted)));
}

#[tokio::test]
async fn recur_query_stops_once_the_predicate_rejects_a_branch() {
    let (graph, ids) = chain_graph(5).await;
    let graph = Arc::new(graph);

    // Annotate nodes with a "depth" property so the predicate can see how
    // far along the chain each branch has walked.
    for (i, id) in ids.iter().enumerate() {
        let mut node = graph.find_node(id).await.unwrap().unwrap();
        node.properties.insert("depth".into(), (i as i64).into());
        graph.insert(node).await;
    }
    let mut root = graph.find_node(&root_id()).await.unwrap().unwrap();
    root.properties.insert("depth".into(), (-1_i64).into());
    graph.insert(root).await;

    let facade = PeerFacade::new(graph, Arc::new(NoRemoteQuerier), Config::default());

    let mut ops = BTreeMap::new();
    let param_id = OpId::from_raw("param");
    ops.insert(
        param_id.clone(),
        OpNode {
            id: param_id.clone(),
            kind: OpKind::Parameter { name: "ROOT-ID".into(), literal: None },
            deps: vec![],
        },
    );
    let traverse_id = OpId::from_raw("traverse");
    ops.insert(
        traverse_id.clone(),
        OpNode {
            id: traverse_id.clone(),
            kind: OpKind::Traverse {
                src_key: param_id.clone(),
                predicate: plasma::graph::EdgePredicate::Label("next".into()),
            },
            deps: vec![param_id.clone()],
        },
    );

    // `recur_query`'s predicate is evaluated against each branch's current
    // node directly (the operator id inside `PropRef` is ignored in this
    // per-branch context — see `iter_query::eval_value`), so any `OpId`
    // works so long as `prop` names a real property.
    let plan = Plan {
        ops,
        root: traverse_id,
        params: [("ROOT-ID".to_string(), param_id)].into_iter().collect(),
        pbind: BTreeMap::new(),
        filters: vec![],
        projection: None,
        src_url: None,
        htl: Some(10),
        kind: PlanKind::RecurQuery {
            pred: LExpr::Call {
                op: "<".into(),
                args: vec![
                    LExpr::PropRef { op: OpId::from_raw("traverse"), prop: "depth".into() },
                    LExpr::Lit(plasma::model::PropValue::Scalar(plasma::model::Scalar::Int(2))),
                ],
            },
        },
    };

    let result = facade.recur_query(plan).await.unwrap();
    assert_eq!(result, vec![ids[2].clone()]);
}
