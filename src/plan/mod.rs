//! The plan (operator DAG) representation (`§3`/`§4.D`).
//!
//! A [`Plan`] is a value: operator nodes keyed by a stable [`OpId`], a root
//! pointer, and a handful of parameter/binding maps. Plans must be
//! serializable for transport (`§6`) — every type in this module derives
//! `serde::{Serialize, Deserialize}` so a [`Plan`] can be shipped verbatim
//! to a remote peer by [`crate::subplan`].

pub mod explain;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PlasmaError, Result};
use crate::expr::LExpr;
use crate::graph::EdgePredicate;
use crate::model::{NodeId, PropValue};

/// Stable identifier assigned to an operator at plan time.
///
/// Path-tuple keys are these identifiers, so merging PTs from a local and a
/// remote run is sound iff both sides share the plan (`§9` "Operator
/// identity") — which they do by construction, since `§4.G` transports the
/// plan verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct OpId(String);

impl OpId {
    /// Wraps a raw operator id string.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic generator of fresh, stable operator ids (`"op0"`, `"op1"`, ...).
#[derive(Debug, Default)]
pub struct OpIdGen {
    next: u64,
}

impl OpIdGen {
    /// Creates a generator starting at `op0`.
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocates the next id in sequence.
    pub fn next(&mut self) -> OpId {
        let id = OpId(format!("op{}", self.next));
        self.next += 1;
        id
    }
}

/// Sort/choose direction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Order {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// The buffer-then-fold family: `sort`, `min`, `max`, `average`, `count`,
/// `choose` are all expressed as an `aggregate` with a specific fold
/// (`§4.D`: "Aggregate... Basis for the next four").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AggregateKind {
    /// Identity fold: reissues the buffer in original order.
    Generic,
    /// Orders the buffer by `pt[sort_key].sort_prop`.
    Sort {
        /// Operator whose bound node carries the sort property.
        sort_key: OpId,
        /// Property name to sort by.
        sort_prop: String,
        /// Sort direction.
        order: Order,
    },
    /// Emits the single PT with the minimum `pt[sort_key].sort_prop`.
    Min {
        /// Operator whose bound node carries the compared property.
        sort_key: OpId,
        /// Property name to compare.
        sort_prop: String,
    },
    /// Emits the single PT with the maximum `pt[sort_key].sort_prop`.
    Max {
        /// Operator whose bound node carries the compared property.
        sort_key: OpId,
        /// Property name to compare.
        sort_prop: String,
    },
    /// Emits one record with the arithmetic mean of `pt[value_key].prop`.
    Average {
        /// Operator whose bound node carries the averaged property.
        value_key: OpId,
        /// Property name to average.
        prop: String,
    },
    /// Emits one record with the count of buffered PTs.
    Count,
    /// Emits up to `n` arbitrarily chosen PTs from the buffer.
    Choose {
        /// Number of PTs to choose.
        n: usize,
    },
}

/// One field of a `project` operator's output record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectField {
    /// The path variable's binding operator.
    pub pvar: OpId,
    /// Properties to include; empty means "bare node id".
    pub props: Vec<String>,
    /// Name this field is projected under.
    pub alias: String,
}

/// The operator-specific argument set (`§4.D`'s operator table).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OpKind {
    /// Yields a seed value exactly once (or once per element, if fed a
    /// list), then closes.
    Parameter {
        /// Path-variable name this parameter supplies.
        name: String,
        /// Embedded seed, for a self-contained sub-plan (`§4.G`): when set,
        /// this overrides whatever the caller's external seed map supplies
        /// for `name`. `None` for an ordinary top-level `ROOT-ID` parameter,
        /// whose value arrives via `Engine::execute`'s `seeds` argument.
        literal: Option<NodeId>,
    },
    /// For each PT, follows matching edges from `pt[src_key]`, emitting one
    /// PT per target. Handles proxy crossings (`§4.F`).
    Traverse {
        /// Operator whose output holds the source node.
        src_key: OpId,
        /// Which outgoing edges to follow.
        predicate: EdgePredicate,
    },
    /// Feeds `left`'s output into `right`'s input, forwarding `right`'s
    /// output as this operator's own. Resolved at wiring time as a channel
    /// redirection rather than a spawned task — see
    /// `crate::runtime::resolve_producer` — since `§4.F` describes it as
    /// "standard channel plumbing", not computation.
    Join {
        /// The operator whose output feeds `right`'s input.
        left: OpId,
        /// The operator whose output becomes this join's output.
        right: OpId,
    },
    /// Ensures the listed properties of `pt[pt_key]` are attached to the PT.
    Property {
        /// Operator whose output holds the node to load properties from.
        pt_key: OpId,
        /// Property names to ensure are present.
        props: Vec<String>,
    },
    /// Retains PTs for which `predicate` evaluates to `true`.
    Select {
        /// Lowered predicate expression.
        predicate: LExpr,
    },
    /// Emits a new PT extended with the computed value bound to this
    /// operator's id.
    Expression {
        /// Lowered expression to evaluate.
        expr: LExpr,
    },
    /// Converts each PT into a result record of chosen properties.
    Project {
        /// Output fields.
        fields: Vec<ProjectField>,
    },
    /// Buffers all PTs; on input close, emits the folded output.
    Aggregate {
        /// Which fold to apply.
        kind: AggregateKind,
    },
    /// Stream-side: emits the first `n` PTs then closes, draining any
    /// residual upstream silently.
    Limit {
        /// Maximum number of PTs to emit.
        n: usize,
    },
    /// Forwards the left dependency's output onto a named outbound
    /// channel; closes it when input closes.
    Send {
        /// Name of the destination channel (opaque to the plan itself).
        dest: String,
    },
    /// Merges the left dependency's output with a dynamic set of remote
    /// tuple streams arriving on the `remotes` meta-channel (`§9`).
    Receive {
        /// Per-remote-channel timeout, in milliseconds.
        timeout_ms: u64,
    },
}

impl OpKind {
    /// Short machine name, for logging/explain output.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Parameter { .. } => "parameter",
            OpKind::Traverse { .. } => "traverse",
            OpKind::Join { .. } => "join",
            OpKind::Property { .. } => "property",
            OpKind::Select { .. } => "select",
            OpKind::Expression { .. } => "expression",
            OpKind::Project { .. } => "project",
            OpKind::Aggregate { .. } => "aggregate",
            OpKind::Limit { .. } => "limit",
            OpKind::Send { .. } => "send",
            OpKind::Receive { .. } => "receive",
        }
    }
}

/// One node in the plan DAG: an operator plus the ids it depends on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpNode {
    /// This operator's stable id.
    pub id: OpId,
    /// The operator descriptor.
    pub kind: OpKind,
    /// Upstream operator ids this operator reads from.
    pub deps: Vec<OpId>,
}

/// Distinguishes a one-shot query plan from a recursive/iterated one
/// (`§4.I`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum PlanKind {
    /// Ordinary query; execute once.
    Query,
    /// `recur-query`: a user predicate decides per-branch whether to
    /// recurse locally or forward to the originator.
    RecurQuery {
        /// Predicate deciding whether to recurse on a given PT.
        pred: LExpr,
    },
    /// `iter-n-query`: run the plan `iter_n` times, rebinding `ROOT-ID` to
    /// the prior round's results each time.
    IterNQuery {
        /// Remaining iteration count.
        iter_n: u32,
        /// Parameter operators rebound between iterations.
        iter_params: BTreeMap<String, OpId>,
    },
}

/// The full operator DAG produced by the planner, ready for execution or
/// transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    /// All operators, keyed by id.
    pub ops: BTreeMap<OpId, OpNode>,
    /// The terminal operator whose output is the query result.
    pub root: OpId,
    /// Path-variable name to the parameter-operator id that supplies it.
    pub params: BTreeMap<String, OpId>,
    /// Path-variable symbol to the operator id whose output slot holds that
    /// variable's node.
    pub pbind: BTreeMap<String, OpId>,
    /// Ids of every `select` operator in the plan, for `§8` property 2
    /// ("every result satisfies every select").
    pub filters: Vec<OpId>,
    /// The final projection, if any.
    pub projection: Option<Vec<ProjectField>>,
    /// Origin peer URL, for `recur-query` plans (`§4.I`).
    pub src_url: Option<String>,
    /// Hops-to-live budget, for recursive/iterated plans.
    pub htl: Option<u32>,
    /// Recursive/iterated query metadata.
    pub kind: PlanKind,
}

impl Plan {
    /// Looks up an operator by id.
    pub fn op(&self, id: &OpId) -> Option<&OpNode> {
        self.ops.get(id)
    }

    /// Validates structural invariants (`§7` `PlanInvalid`): the root
    /// exists, and every dependency edge points at a known operator.
    pub fn validate(&self) -> Result<()> {
        if !self.ops.contains_key(&self.root) {
            return Err(PlasmaError::PlanInvalid(format!(
                "root operator {} not present in plan",
                self.root
            )));
        }
        for node in self.ops.values() {
            for dep in &node.deps {
                if !self.ops.contains_key(dep) {
                    return Err(PlasmaError::PlanInvalid(format!(
                        "operator {} depends on missing operator {}",
                        node.id, dep
                    )));
                }
            }
        }
        for (var, op) in &self.pbind {
            if !self.ops.contains_key(op) {
                return Err(PlasmaError::PlanInvalid(format!(
                    "pbind for `{var}` references missing operator {op}"
                )));
            }
        }
        Ok(())
    }
}

/// A single result record: a mapping from the projected alias to its value.
pub type ResultRecord = BTreeMap<String, PropValue>;

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> OpNode {
        OpNode {
            id: OpId::from_raw(id),
            kind: OpKind::Parameter { name: "ROOT-ID".into(), literal: None },
            deps: vec![],
        }
    }

    #[test]
    fn validate_rejects_missing_root() {
        let mut ops = BTreeMap::new();
        ops.insert(OpId::from_raw("op0"), leaf("op0"));
        let plan = Plan {
            ops,
            root: OpId::from_raw("missing"),
            params: BTreeMap::new(),
            pbind: BTreeMap::new(),
            filters: vec![],
            projection: None,
            src_url: None,
            htl: None,
            kind: PlanKind::Query,
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn validate_rejects_dangling_dep() {
        let mut ops = BTreeMap::new();
        ops.insert(
            OpId::from_raw("op0"),
            OpNode {
                id: OpId::from_raw("op0"),
                kind: OpKind::Join {
                    left: OpId::from_raw("left"),
                    right: OpId::from_raw("right"),
                },
                deps: vec![OpId::from_raw("ghost")],
            },
        );
        let plan = Plan {
            ops,
            root: OpId::from_raw("op0"),
            params: BTreeMap::new(),
            pbind: BTreeMap::new(),
            filters: vec![],
            projection: None,
            src_url: None,
            htl: None,
            kind: PlanKind::Query,
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn id_gen_produces_stable_sequence() {
        let mut gen = OpIdGen::new();
        assert_eq!(gen.next().as_str(), "op0");
        assert_eq!(gen.next().as_str(), "op1");
    }
}
