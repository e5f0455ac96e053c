//! `§8` scenario a: a peer reports itself reachable before any graph data
//! exists.

use std::sync::Arc;

use plasma::config::Config;
use plasma::graph::InMemoryGraphAdapter;
use plasma::peer::{PeerFacade, PING_MARKER};
use plasma::runtime::NoRemoteQuerier;

#[tokio::test]
async fn ping_succeeds_against_an_empty_graph() {
    let facade = PeerFacade::new(
        Arc::new(InMemoryGraphAdapter::new()),
        Arc::new(NoRemoteQuerier),
        Config::default(),
    );

    assert_eq!(facade.ping().await.unwrap(), PING_MARKER);
}

#[tokio::test]
async fn node_by_uuid_on_an_empty_graph_reports_none() {
    let facade = PeerFacade::new(
        Arc::new(InMemoryGraphAdapter::new()),
        Arc::new(NoRemoteQuerier),
        Config::default(),
    );

    let missing = plasma::model::NodeId::new_random();
    assert!(facade.node_by_uuid(&missing).await.unwrap().is_none());
}
