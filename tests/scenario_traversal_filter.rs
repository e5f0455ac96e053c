//! `§8` scenario b: a local multi-hop traversal with a `where` filter and a
//! projection, run end to end through [`PeerFacade::query`].

use std::collections::BTreeMap;
use std::sync::Arc;

use plasma::config::Config;
use plasma::expr::Expr;
use plasma::graph::InMemoryGraphAdapter;
use plasma::model::{root_id, Node, NodeId, PropValue, Scalar};
use plasma::peer::PeerFacade;
use plasma::query::{EdgeStep, PathQuery, Planner, ProjectSpec, Segment};
use plasma::runtime::NoRemoteQuerier;

async fn band_graph() -> (InMemoryGraphAdapter, NodeId, NodeId, NodeId) {
    let graph = InMemoryGraphAdapter::new();
    let root = root_id();
    let ada = NodeId::new_random();
    let grace = NodeId::new_random();
    let alan = NodeId::new_random();

    graph
        .insert(
            Node::new(root.clone())
                .with_edge(ada.clone(), "friend")
                .with_edge(grace.clone(), "friend")
                .with_edge(alan.clone(), "friend"),
        )
        .await;
    graph.insert(Node::new(ada.clone()).with_property("name", "ada").with_property("score", 9_i64)).await;
    graph.insert(Node::new(grace.clone()).with_property("name", "grace").with_property("score", 7_i64)).await;
    graph.insert(Node::new(alan.clone()).with_property("name", "alan").with_property("score", 4_i64)).await;

    (graph, ada, grace, alan)
}

#[tokio::test]
async fn traversal_with_filter_keeps_only_matching_friends() {
    let (graph, ada, grace, _alan) = band_graph().await;
    let facade = PeerFacade::new(Arc::new(graph), Arc::new(NoRemoteQuerier), Config::default());

    let query = PathQuery::path(vec![Segment::new("f", vec![EdgeStep::label("friend")])])
        .filter(Expr::Call {
            op: ">=".into(),
            args: vec![
                Expr::PvarProp { var: "f".into(), prop: "score".into() },
                Expr::Lit(PropValue::Scalar(Scalar::Int(5))),
            ],
        })
        .projecting(vec![ProjectSpec::props("f", vec!["name".into()])]);

    let output = Planner::new().plan(&query).unwrap();
    let mut seeds = BTreeMap::new();
    seeds.insert("ROOT-ID".to_string(), vec![root_id()]);

    let records = facade.query(output.plan, seeds).await.unwrap();

    let names: Vec<String> = records
        .iter()
        .filter_map(|record| record.get("f"))
        .filter_map(|value| value.as_map())
        .filter_map(|props| props.get("name"))
        .filter_map(|value| value.as_scalar())
        .map(|scalar| match scalar {
            Scalar::String(s) => s.clone(),
            other => panic!("expected string name, got {other:?}"),
        })
        .collect();

    assert_eq!(names.len(), 2);
    assert!(names.contains(&"ada".to_string()));
    assert!(names.contains(&"grace".to_string()));
    let _ = (ada, grace);
}

#[tokio::test]
async fn explain_renders_every_operator_on_the_spine() {
    let query = PathQuery::path(vec![Segment::new("f", vec![EdgeStep::label("friend")])])
        .projecting(vec![ProjectSpec::props("f", vec!["name".into()])]);
    let output = Planner::new().plan(&query).unwrap();

    assert!(output.explain_text.contains("project"));
    assert!(output.explain_text.contains("traverse"));
}
