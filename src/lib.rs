//! # Plasma - a peer-to-peer graph query engine
//!
//! Plasma executes path-tuple queries over a local graph, transparently
//! crossing onto a remote peer whenever a traversal hits a proxy node. It
//! ships the plan representation, planner, operator runtime, and RPC glue;
//! the transactional graph store itself is an external collaborator this
//! crate only reads through [`graph::GraphAdapter`].
//!
//! ## Quick Start
//!
//! ```rust
//! use plasma::graph::InMemoryGraphAdapter;
//! use plasma::model::{root_id, Node, NodeId};
//! use plasma::query::{EdgeStep, PathQuery, Planner, ProjectSpec, Segment};
//! use plasma::runtime::{Engine, EngineMetrics, NoRemoteQuerier, RunContext};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> plasma::error::Result<()> {
//! let graph = InMemoryGraphAdapter::new();
//! let friend = NodeId::new_random();
//! graph.insert(Node::new(root_id()).with_edge(friend.clone(), "friend")).await;
//! graph.insert(Node::new(friend).with_property("name", "ada")).await;
//!
//! let query = PathQuery::path(vec![Segment::new("f", vec![EdgeStep::label("friend")])])
//!     .projecting(vec![ProjectSpec::props("f", vec!["name".into()])]);
//! let output = Planner::new().plan(&query)?;
//!
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let ctx = RunContext {
//!     graph: Arc::new(graph),
//!     remote: Arc::new(NoRemoteQuerier),
//!     events,
//!     metrics: Arc::new(EngineMetrics::from_env()),
//!     channel_capacity: 16,
//! };
//! let engine = Engine::new(ctx);
//! let mut seeds = BTreeMap::new();
//! seeds.insert("ROOT-ID".to_string(), vec![root_id()]);
//! let records = engine.query(output.plan, seeds, None).await;
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`graph`] — the read-only seam over a peer's local graph store.
//! - [`model`], [`pt`] — node/property data model and the path-tuple unit.
//! - [`expr`] — the quoted expression sub-language `select`/`where` clauses
//!   compile into.
//! - [`plan`] — the operator DAG representation, serializable for transport.
//! - [`query`] — the path-query surface AST and its planner.
//! - [`runtime`] — the streaming operator runtime that executes a plan.
//! - [`subplan`] — extracts a transportable sub-plan at a proxy crossing.
//! - [`iter_query`] — the `recur-query`/`iter-n-query` drivers.
//! - [`peer`] — RPC wire types plus the client and server transport halves.
//! - [`config`], [`logging`] — ambient process configuration and tracing.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod expr;
pub mod graph;
pub mod iter_query;
pub mod logging;
pub mod model;
pub mod peer;
pub mod plan;
pub mod pt;
pub mod query;
pub mod runtime;
pub mod subplan;

pub use crate::error::{PlasmaError, Result};
pub use crate::model::{Node, NodeId, PropValue};
pub use crate::plan::Plan;
pub use crate::pt::PathTuple;
