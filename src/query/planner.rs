//! The planner (`§4.E`): lowers a [`PathQuery`](super::PathQuery) into a
//! [`Plan`] DAG, grounded on `sombra::query::planner::Planner`'s
//! AST-to-physical-plan lowering style (rule-based, single entry point,
//! paired with an explain tree).
//!
//! The seven steps below follow `§4.E` literally. Every appended operator
//! references the current root as its sole dependency and then becomes the
//! new root, keeping the plan linear along its primary spine (`§9`
//! "Operator identity" / end of `§4.E`), with side branches only for the
//! `receive` op's eventual remote merges.

use std::collections::BTreeMap;

use crate::expr::{Expr, LExpr};
use crate::model::ROOT_VAR;
use crate::plan::{explain, AggregateKind, OpId, OpIdGen, OpKind, OpNode, Plan, PlanKind, ProjectField};

use super::ast::{AggregateTail, PathQuery};

/// Lowers [`PathQuery`] values into [`Plan`]s.
#[derive(Debug, Default)]
pub struct Planner {
    ids: OpIdGen,
}

/// Output of a successful planning pass: the plan plus a human-readable
/// explain tree (`§4.E`'s additive tooling, in the spirit of `sombra`'s
/// `PlannerOutput`).
#[derive(Debug)]
pub struct PlannerOutput {
    /// The produced operator DAG.
    pub plan: Plan,
    /// Indented text rendering of the plan, for the CLI `explain` command.
    pub explain_text: String,
}

impl Planner {
    /// Creates a fresh planner with its own operator-id sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowers a [`PathQuery`] into a [`Plan`] (`§4.E`, steps 1-7).
    pub fn plan(&mut self, query: &PathQuery) -> crate::error::Result<PlannerOutput> {
        let mut ops: BTreeMap<OpId, OpNode> = BTreeMap::new();
        let mut pbind: BTreeMap<String, OpId> = BTreeMap::new();

        // Step 1: seed with a `parameter` op bound to ROOT-ID.
        let param_id = self.ids.next();
        ops.insert(
            param_id.clone(),
            OpNode {
                id: param_id.clone(),
                kind: OpKind::Parameter {
                    name: ROOT_VAR.to_string(),
                    literal: None,
                },
                deps: vec![],
            },
        );
        let mut params = BTreeMap::new();
        params.insert(ROOT_VAR.to_string(), param_id.clone());

        // Step 3 (performed here, ahead of the path spine, per `§4.E`: "Insert
        // a receive op at the front so that any remote sub-query results can
        // be merged into the stream before downstream operators see them").
        let receive_id = self.ids.next();
        ops.insert(
            receive_id.clone(),
            OpNode {
                id: receive_id.clone(),
                kind: OpKind::Receive { timeout_ms: 5_000 },
                deps: vec![param_id.clone()],
            },
        );
        let mut root = receive_id;
        // `receive` is pure channel plumbing — it forwards each PT exactly as
        // received, without rebinding its own id (`§4.F` run_receive). So the
        // first traversal's `src_key` must still point at the `parameter` op
        // that actually produced the binding; `root` (the *wiring* spine) and
        // `data_root` (the *binding* producer) only diverge for this one hop.
        let mut data_root = param_id;

        // Step 2: for each path segment, append traverse ops per predicate.
        for segment in &query.path {
            for step in &segment.edges {
                let traverse_id = self.ids.next();
                ops.insert(
                    traverse_id.clone(),
                    OpNode {
                        id: traverse_id.clone(),
                        kind: OpKind::Traverse {
                            src_key: data_root.clone(),
                            predicate: step.predicate.clone(),
                        },
                        deps: vec![root.clone()],
                    },
                );
                root = traverse_id.clone();
                data_root = traverse_id;
            }
            pbind.insert(segment.var.clone(), root.clone());
        }

        // Step 4: lower the `where` expression, if present.
        let mut filters = Vec::new();
        if let Some(expr) = &query.where_expr {
            let predicate = self.lower_expr(expr, &pbind, &mut ops, &mut root)?;
            let select_id = self.ids.next();
            ops.insert(
                select_id.clone(),
                OpNode {
                    id: select_id.clone(),
                    kind: OpKind::Select { predicate },
                    deps: vec![root.clone()],
                },
            );
            filters.push(select_id.clone());
            root = select_id;
        }

        // Step 5: lower the projection, if present.
        let mut projection_fields = None;
        if let Some(specs) = &query.project {
            let mut fields = Vec::with_capacity(specs.len());
            for spec in specs {
                let pvar_op = pbind.get(&spec.var).cloned().ok_or_else(|| {
                    crate::error::PlasmaError::PlanInvalid(format!(
                        "project references unbound path variable `{}`",
                        spec.var
                    ))
                })?;
                if spec.props.is_empty() {
                    fields.push(ProjectField {
                        pvar: pvar_op,
                        props: vec![],
                        alias: spec.var.clone(),
                    });
                } else {
                    let prop_id = self.ids.next();
                    ops.insert(
                        prop_id.clone(),
                        OpNode {
                            id: prop_id.clone(),
                            kind: OpKind::Property {
                                pt_key: pvar_op,
                                props: spec.props.clone(),
                            },
                            deps: vec![root.clone()],
                        },
                    );
                    root = prop_id.clone();
                    fields.push(ProjectField {
                        pvar: prop_id,
                        props: spec.props.clone(),
                        alias: spec.var.clone(),
                    });
                }
            }
            let project_id = self.ids.next();
            ops.insert(
                project_id.clone(),
                OpNode {
                    id: project_id.clone(),
                    kind: OpKind::Project {
                        fields: fields.clone(),
                    },
                    deps: vec![root.clone()],
                },
            );
            root = project_id;
            projection_fields = Some(fields);
        }

        // Step 6: append any trailing aggregation/sort/limit.
        if let Some(tail) = &query.tail {
            let (kind, deps_root) = self.lower_tail(tail, &pbind, root.clone())?;
            let agg_id = self.ids.next();
            ops.insert(
                agg_id.clone(),
                OpNode {
                    id: agg_id.clone(),
                    kind,
                    deps: vec![deps_root],
                },
            );
            root = agg_id;
        }

        // Step 7: the current spine head is the plan's terminal operator.
        let plan = Plan {
            ops,
            root,
            params,
            pbind,
            filters,
            projection: projection_fields,
            src_url: None,
            htl: None,
            kind: PlanKind::Query,
        };
        plan.validate()?;

        let explain_tree = explain::explain(&plan);
        let explain_text = explain::render(&explain_tree);
        Ok(PlannerOutput { plan, explain_text })
    }

    /// Depth-first lowers a surface [`Expr`] into an [`LExpr`], inserting a
    /// `property` operator for each `PvarProp` encountered and advancing the
    /// plan spine to depend on it (`§4.E` step 4, `§4.C`).
    fn lower_expr(
        &mut self,
        expr: &Expr,
        pbind: &BTreeMap<String, OpId>,
        ops: &mut BTreeMap<OpId, OpNode>,
        root: &mut OpId,
    ) -> crate::error::Result<LExpr> {
        match expr {
            Expr::Lit(v) => Ok(LExpr::Lit(v.clone())),
            Expr::PvarProp { var, prop } => {
                let pvar_op = pbind.get(var).cloned().ok_or_else(|| {
                    crate::error::PlasmaError::PlanInvalid(format!(
                        "unbound path variable `{var}` in where clause"
                    ))
                })?;
                let prop_id = self.ids.next();
                ops.insert(
                    prop_id.clone(),
                    OpNode {
                        id: prop_id.clone(),
                        kind: OpKind::Property {
                            pt_key: pvar_op,
                            props: vec![prop.clone()],
                        },
                        deps: vec![root.clone()],
                    },
                );
                *root = prop_id.clone();
                Ok(LExpr::PropRef {
                    op: prop_id,
                    prop: prop.clone(),
                })
            }
            Expr::Call { op, args } => {
                let args = args
                    .iter()
                    .map(|a| self.lower_expr(a, pbind, ops, root))
                    .collect::<crate::error::Result<Vec<_>>>()?;
                Ok(LExpr::Call {
                    op: op.clone(),
                    args,
                })
            }
        }
    }

    fn lower_tail(
        &mut self,
        tail: &AggregateTail,
        pbind: &BTreeMap<String, OpId>,
        root: OpId,
    ) -> crate::error::Result<(OpKind, OpId)> {
        let lookup = |var: &str| -> crate::error::Result<OpId> {
            pbind.get(var).cloned().ok_or_else(|| {
                crate::error::PlasmaError::PlanInvalid(format!(
                    "aggregate tail references unbound path variable `{var}`"
                ))
            })
        };
        let kind = match tail {
            AggregateTail::Sort { var, prop, order } => OpKind::Aggregate {
                kind: AggregateKind::Sort {
                    sort_key: lookup(var)?,
                    sort_prop: prop.clone(),
                    order: *order,
                },
            },
            AggregateTail::Min { var, prop } => OpKind::Aggregate {
                kind: AggregateKind::Min {
                    sort_key: lookup(var)?,
                    sort_prop: prop.clone(),
                },
            },
            AggregateTail::Max { var, prop } => OpKind::Aggregate {
                kind: AggregateKind::Max {
                    sort_key: lookup(var)?,
                    sort_prop: prop.clone(),
                },
            },
            AggregateTail::Average { var, prop } => OpKind::Aggregate {
                kind: AggregateKind::Average {
                    value_key: lookup(var)?,
                    prop: prop.clone(),
                },
            },
            AggregateTail::Count => OpKind::Aggregate {
                kind: AggregateKind::Count,
            },
            AggregateTail::Choose { n } => OpKind::Aggregate {
                kind: AggregateKind::Choose { n: *n },
            },
            AggregateTail::Limit { n } => OpKind::Limit { n: *n },
        };
        Ok((kind, root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgePredicate;
    use crate::query::ast::{EdgeStep, ProjectSpec, Segment};

    #[test]
    fn plans_single_segment_path_with_filter_and_projection() {
        let query = PathQuery::path(vec![Segment::new(
            "synth",
            vec![
                EdgeStep { predicate: EdgePredicate::Label("music".into()) },
                EdgeStep { predicate: EdgePredicate::Label("synths".into()) },
                EdgeStep { predicate: EdgePredicate::Label("synth".into()) },
            ],
        )])
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

        let output = Planner::new().plan(&query).expect("plan succeeds");
        assert!(output.plan.validate().is_ok());
        assert_eq!(output.plan.filters.len(), 1);
        assert!(output.plan.projection.is_some());
        assert!(!output.explain_text.is_empty());
    }

    #[test]
    fn rejects_projection_of_unbound_variable() {
        let query = PathQuery::path(vec![]).projecting(vec![ProjectSpec::id("ghost")]);
        assert!(Planner::new().plan(&query).is_err());
    }

    #[test]
    fn rejects_where_clause_referencing_unbound_variable() {
        let query = PathQuery::path(vec![]).filter(Expr::Call {
            op: ">=".into(),
            args: vec![
                Expr::PvarProp {
                    var: "ghost".into(),
                    prop: "score".into(),
                },
                Expr::Lit(0.6_f64.into()),
            ],
        });
        let err = Planner::new().plan(&query).unwrap_err();
        assert!(matches!(err, crate::error::PlasmaError::PlanInvalid(_)));
    }
}
