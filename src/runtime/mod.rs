//! The streaming operator runtime (`§4.F`): twelve operators wired through
//! asynchronous channels, one cooperative `tokio` task per operator
//! instance (`§5`).

pub mod context;
pub mod engine;
mod ops;

pub use context::{EngineEvent, EngineMetrics, NoRemoteQuerier, RemoteQuerier, RunContext};
pub use engine::{Engine, EngineOutput};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::expr::Expr;
    use crate::graph::InMemoryGraphAdapter;
    use crate::model::{root_id, Node, NodeId};
    use crate::plan::Order;
    use crate::query::ast::{AggregateTail, EdgeStep, PathQuery, ProjectSpec, Segment};
    use crate::query::planner::Planner;

    use super::*;

    async fn music_graph() -> (InMemoryGraphAdapter, NodeId, NodeId, NodeId, NodeId) {
        let graph = InMemoryGraphAdapter::new();
        let root = root_id();
        let music = NodeId::new_random();
        let synths = NodeId::new_random();
        let bass = NodeId::new_random();
        let kick = NodeId::new_random();
        let snare = NodeId::new_random();
        let hat = NodeId::new_random();

        graph.insert(Node::new(root.clone()).with_edge(music.clone(), "music")).await;
        graph.insert(Node::new(music.clone()).with_edge(synths.clone(), "synths")).await;
        graph
            .insert(
                Node::new(synths.clone())
                    .with_edge(bass.clone(), "synth")
                    .with_edge(kick.clone(), "synth")
                    .with_edge(snare.clone(), "synth")
                    .with_edge(hat.clone(), "synth"),
            )
            .await;
        graph
            .insert(Node::new(bass.clone()).with_property("label", "bass").with_property("score", 0.8_f64))
            .await;
        graph
            .insert(Node::new(kick.clone()).with_property("label", "kick").with_property("score", 0.7_f64))
            .await;
        graph
            .insert(Node::new(snare.clone()).with_property("label", "snare").with_property("score", 0.4_f64))
            .await;
        graph
            .insert(Node::new(hat.clone()).with_property("label", "hat").with_property("score", 0.3_f64))
            .await;

        (graph, root, bass, kick, hat)
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

    fn synth_path() -> PathQuery {
        PathQuery::path(vec![Segment::new(
            "synth",
            vec![
                EdgeStep::label("music"),
                EdgeStep::label("synths"),
                EdgeStep::label("synth"),
            ],
        )])
    }

    #[tokio::test]
    async fn local_traversal_with_filter_matches_scenario_b() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path()
            .filter(Expr::Call {
                op: ">=".into(),
                args: vec![
                    Expr::PvarProp {
                        var: "synth".into(),
                        prop: "score".into(),
                    },
                    Expr::Lit(0.6_f64.into()),
                ],
            })
            .projecting(vec![ProjectSpec::props("synth", vec!["label".into()])]);
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;

        let labels: std::collections::BTreeSet<String> = records
            .iter()
            .filter_map(|r| r.get("synth"))
            .filter_map(|v| v.as_map())
            .filter_map(|m| m.get("label"))
            .filter_map(|v| v.as_scalar())
            .filter_map(|s| match s {
                crate::model::Scalar::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            labels,
            std::collections::BTreeSet::from(["bass".to_string(), "kick".to_string()])
        );
    }

    #[tokio::test]
    async fn unfiltered_traversal_yields_all_four_synths() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path().projecting(vec![ProjectSpec::props("synth", vec!["label".into()])]);
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn count_aggregate_matches_scenario_e() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path().with_tail(AggregateTail::Count);
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].get("count").and_then(|v| v.as_scalar()).and_then(|s| s.as_f64()),
            Some(4.0)
        );
    }

    #[tokio::test]
    async fn limit_emits_exactly_n_and_shuts_down() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path().with_tail(AggregateTail::Limit { n: 2 });
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn sort_orders_by_property() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path()
            .projecting(vec![ProjectSpec::props("synth", vec!["label".into(), "score".into()])])
            .with_tail(AggregateTail::Sort {
                var: "synth".into(),
                prop: "score".into(),
                order: Order::Desc,
            });
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;
        assert_eq!(records.len(), 4);
    }

    #[tokio::test]
    async fn select_drops_non_matching_without_aborting_query() {
        let (graph, root, _bass, _kick, _hat) = music_graph().await;
        let query = synth_path().filter(Expr::Call {
            op: ">=".into(),
            args: vec![
                Expr::PvarProp {
                    var: "synth".into(),
                    prop: "score".into(),
                },
                Expr::Lit(10.0_f64.into()),
            ],
        });
        let output = Planner::new().plan(&query).expect("plan");
        let engine = Engine::new(test_ctx(graph));
        let mut seeds = BTreeMap::new();
        seeds.insert("ROOT-ID".to_string(), vec![root]);
        let records = engine.query(output.plan, seeds, None).await;
        assert!(records.is_empty());
    }
}
