//! High-level path-query AST: the ergonomic input shape a caller builds
//! before the planner lowers it into a [`crate::plan::Plan`] (`§4.E`).
//!
//! Intentionally thin — one path expression, one optional `where`, one
//! optional projection, one optional aggregation/sort/limit tail — mirroring
//! the five inputs `§4.E` names.

use crate::expr::Expr;
use crate::graph::EdgePredicate;
use crate::plan::Order;

/// One step of a path segment: an edge predicate to follow.
#[derive(Clone, Debug)]
pub struct EdgeStep {
    /// Which outgoing edges to follow.
    pub predicate: EdgePredicate,
}

impl EdgeStep {
    /// A step matching edges by exact label.
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            predicate: EdgePredicate::Label(label.into()),
        }
    }
}

/// One segment of a path expression: `[variable, [edge-predicates...]]`.
#[derive(Clone, Debug)]
pub struct Segment {
    /// Path-variable symbol this segment's final traversal binds to.
    pub var: String,
    /// Edge predicates to follow in sequence, starting from the segment's
    /// source (the query root for the first segment, the prior segment's
    /// variable otherwise).
    pub edges: Vec<EdgeStep>,
}

impl Segment {
    /// Creates a segment binding `var` after following `edges` in order.
    pub fn new(var: impl Into<String>, edges: Vec<EdgeStep>) -> Self {
        Self {
            var: var.into(),
            edges,
        }
    }
}

/// One field of a `project` clause: a path variable plus the properties to
/// include (empty means "bare node id").
#[derive(Clone, Debug)]
pub struct ProjectSpec {
    /// Path-variable symbol to project.
    pub var: String,
    /// Property names to include; empty emits the bare node id.
    pub props: Vec<String>,
}

impl ProjectSpec {
    /// Projects the bare node id bound to `var`.
    pub fn id(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            props: vec![],
        }
    }

    /// Projects `props` of the node bound to `var`.
    pub fn props(var: impl Into<String>, props: Vec<String>) -> Self {
        Self {
            var: var.into(),
            props,
        }
    }
}

/// The optional aggregation/sort/limit tail appended after projection
/// (`§4.D`'s `aggregate`/`sort`/`min`/`max`/`average`/`count`/`choose`/`limit`).
#[derive(Clone, Debug)]
pub enum AggregateTail {
    /// Orders results by a path variable's property.
    Sort {
        /// Path-variable symbol carrying the sort property.
        var: String,
        /// Property name to sort by.
        prop: String,
        /// Sort direction.
        order: Order,
    },
    /// Keeps the single result with the minimum property value.
    Min {
        /// Path-variable symbol.
        var: String,
        /// Property name to compare.
        prop: String,
    },
    /// Keeps the single result with the maximum property value.
    Max {
        /// Path-variable symbol.
        var: String,
        /// Property name to compare.
        prop: String,
    },
    /// Averages a numeric property across all results.
    Average {
        /// Path-variable symbol.
        var: String,
        /// Property name to average.
        prop: String,
    },
    /// Counts the results.
    Count,
    /// Chooses up to `n` arbitrary results.
    Choose {
        /// Number of results to keep.
        n: usize,
    },
    /// Emits only the first `n` results.
    Limit {
        /// Maximum number of results.
        n: usize,
    },
}

/// A complete path query: the planner's sole input (`§4.E`).
#[derive(Clone, Debug, Default)]
pub struct PathQuery {
    /// Path segments, applied in order starting from `ROOT-ID`.
    pub path: Vec<Segment>,
    /// Optional filter predicate evaluated over bound path variables.
    pub where_expr: Option<Expr>,
    /// Optional projection; if absent the query's root op is the terminal.
    pub project: Option<Vec<ProjectSpec>>,
    /// Optional trailing aggregation/sort/limit.
    pub tail: Option<AggregateTail>,
}

impl PathQuery {
    /// Starts a query with the given path segments.
    pub fn path(segments: Vec<Segment>) -> Self {
        Self {
            path: segments,
            ..Self::default()
        }
    }

    /// Attaches a `where` filter.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_expr = Some(expr);
        self
    }

    /// Attaches a projection.
    pub fn projecting(mut self, fields: Vec<ProjectSpec>) -> Self {
        self.project = Some(fields);
        self
    }

    /// Attaches a trailing aggregation/sort/limit.
    pub fn with_tail(mut self, tail: AggregateTail) -> Self {
        self.tail = Some(tail);
        self
    }
}
