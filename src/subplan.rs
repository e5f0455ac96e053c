//! The sub-plan extractor (`§4.G`): given a full plan and the traversal
//! operator that hit a proxy node, produces a self-contained plan to ship
//! to the remote peer.
//!
//! **Open Question resolution** (recorded in `DESIGN.md`): `§4.G`'s prose
//! ("walk the deps DAG from the plan's root out to (and including) the
//! receive op; everything from receive outward is the portion to execute
//! remotely") is read here as: the transportable portion is the closure of
//! operators reachable from `plan.root` by following `deps`, stopping at
//! (and including) the cut traversal — i.e. everything the *cut and its
//! downstream* (select/property/project/aggregate) would still need to do,
//! with the cut's own upstream (the receive op, earlier traversals, the
//! original `ROOT-ID` parameter) replaced by a fresh `parameter` seeded
//! with the proxy's remote node id. This keeps the remote peer from
//! re-walking the portion of the path that already executed locally, and
//! matches `§8` property 5 (location transparency): executing the
//! sub-plan with `seed = proxy_src` reproduces exactly the remote-traversal
//! portion of a hypothetical single-peer execution.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{PlasmaError, Result};
use crate::model::{NodeId, ROOT_VAR};
use crate::plan::{OpId, OpKind, OpNode, Plan, PlanKind};

/// Produces a sub-plan rooted at `plan.root`, covering the cut traversal
/// `cut` and everything downstream of it, with `cut`'s upstream replaced by
/// a parameter seeded with `remote_seed` (`§4.G`).
pub fn extract(plan: &Plan, cut: &OpId, remote_seed: NodeId) -> Result<Plan> {
    if !plan.ops.contains_key(cut) {
        return Err(PlasmaError::PlanInvalid(format!(
            "sub-plan extraction: cut operator {cut} not present in plan"
        )));
    }

    let keep = closure_from_root_to_cut(plan, cut)?;

    let param_id = OpId::from_raw(format!("{cut}-remote-seed"));
    let receive_id = OpId::from_raw(format!("{cut}-remote-receive"));
    let mut ops = BTreeMap::new();
    for id in &keep {
        let mut node = plan.ops.get(id).cloned().expect("id came from plan.ops");
        if id == cut {
            // Redirect the cut's upstream to a fresh `receive` op fed by the
            // remote-seeded parameter, not straight to the parameter itself
            // (`§4.F` run_receive does not rebind its own id, so `src_key`
            // must name the actual producer — the parameter — while `deps`
            // names the channel predecessor — the receive). This receive is
            // what lets a *further* proxy crossing inside this sub-plan's
            // own remote execution merge its own remote stream back in
            // (`§9`'s "nested proxies supported by recursion").
            node.deps = vec![receive_id.clone()];
            if let OpKind::Traverse { src_key, .. } = &mut node.kind {
                *src_key = param_id.clone();
            }
        }
        ops.insert(id.clone(), node);
    }
    ops.insert(
        param_id.clone(),
        OpNode {
            id: param_id.clone(),
            kind: OpKind::Parameter {
                name: ROOT_VAR.to_string(),
                literal: Some(remote_seed),
            },
            deps: vec![],
        },
    );
    ops.insert(
        receive_id.clone(),
        OpNode {
            id: receive_id.clone(),
            kind: OpKind::Receive { timeout_ms: 5_000 },
            deps: vec![param_id.clone()],
        },
    );

    let mut params = BTreeMap::new();
    params.insert(ROOT_VAR.to_string(), param_id.clone());

    let pbind = plan
        .pbind
        .iter()
        .filter(|(_, op)| keep.contains(*op))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let filters = plan.filters.iter().filter(|f| keep.contains(f)).cloned().collect();

    let sub_plan = Plan {
        ops,
        root: plan.root.clone(),
        params,
        pbind,
        filters,
        projection: plan.projection.clone(),
        src_url: plan.src_url.clone(),
        htl: plan.htl,
        kind: PlanKind::Query,
    };
    sub_plan.validate()?;
    Ok(sub_plan)
}

/// Collects the operator ids reachable from `plan.root` by following
/// `deps`, stopping the walk at (and including) `cut` without descending
/// into `cut`'s own dependencies.
fn closure_from_root_to_cut(plan: &Plan, cut: &OpId) -> Result<BTreeSet<OpId>> {
    let mut keep = BTreeSet::new();
    let mut stack = vec![plan.root.clone()];
    while let Some(id) = stack.pop() {
        if !keep.insert(id.clone()) {
            continue;
        }
        if &id == cut {
            continue; // do not descend past the cut point
        }
        let node = plan.ops.get(&id).ok_or_else(|| {
            PlasmaError::PlanInvalid(format!("dangling operator reference {id} during extraction"))
        })?;
        for dep in &node.deps {
            stack.push(dep.clone());
        }
    }
    if !keep.contains(cut) {
        return Err(PlasmaError::PlanInvalid(format!(
            "cut operator {cut} is not reachable from plan root {}",
            plan.root
        )));
    }
    Ok(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::LExpr;
    use crate::graph::EdgePredicate;

    fn linear_plan() -> (Plan, OpId, OpId) {
        let param = OpId::from_raw("op0");
        let receive = OpId::from_raw("op1");
        let traverse1 = OpId::from_raw("op2");
        let traverse2 = OpId::from_raw("op3");
        let select = OpId::from_raw("op4");

        let mut ops = BTreeMap::new();
        ops.insert(
            param.clone(),
            OpNode {
                id: param.clone(),
                kind: OpKind::Parameter { name: ROOT_VAR.to_string(), literal: None },
                deps: vec![],
            },
        );
        ops.insert(
            receive.clone(),
            OpNode {
                id: receive.clone(),
                kind: OpKind::Receive { timeout_ms: 5000 },
                deps: vec![param.clone()],
            },
        );
        ops.insert(
            traverse1.clone(),
            OpNode {
                id: traverse1.clone(),
                kind: OpKind::Traverse {
                    src_key: receive.clone(),
                    predicate: EdgePredicate::Label("net".into()),
                },
                deps: vec![receive.clone()],
            },
        );
        ops.insert(
            traverse2.clone(),
            OpNode {
                id: traverse2.clone(),
                kind: OpKind::Traverse {
                    src_key: traverse1.clone(),
                    predicate: EdgePredicate::Label("music".into()),
                },
                deps: vec![traverse1.clone()],
            },
        );
        ops.insert(
            select.clone(),
            OpNode {
                id: select.clone(),
                kind: OpKind::Select {
                    predicate: LExpr::Lit(crate::model::PropValue::from(true)),
                },
                deps: vec![traverse2.clone()],
            },
        );

        let mut pbind = BTreeMap::new();
        pbind.insert("net".to_string(), traverse1.clone());
        pbind.insert("synth".to_string(), traverse2.clone());

        let mut params = BTreeMap::new();
        params.insert(ROOT_VAR.to_string(), param.clone());

        let plan = Plan {
            ops,
            root: select.clone(),
            params,
            pbind,
            filters: vec![select.clone()],
            projection: None,
            src_url: None,
            htl: None,
            kind: PlanKind::Query,
        };
        (plan, traverse1, traverse2)
    }

    #[test]
    fn extracted_subplan_excludes_upstream_of_cut() {
        let (plan, cut, _downstream) = linear_plan();
        let remote_seed = NodeId::new_random();
        let sub = extract(&plan, &cut, remote_seed).expect("extraction succeeds");

        assert!(!sub.ops.contains_key(&OpId::from_raw("op1")), "original receive op excluded");
        assert!(!sub.ops.contains_key(&OpId::from_raw("op0")), "original parameter excluded");
        assert!(sub.ops.contains_key(&cut), "cut retained");
        assert_eq!(sub.root, plan.root);
        assert!(sub.validate().is_ok());

        let expected_param = OpId::from_raw(format!("{cut}-remote-seed"));
        let expected_receive = OpId::from_raw(format!("{cut}-remote-receive"));
        assert!(sub.ops.contains_key(&expected_param), "fresh remote-seed parameter present");
        assert!(sub.ops.contains_key(&expected_receive), "fresh receive for nested crossings present");

        let cut_node = sub.ops.get(&cut).unwrap();
        assert_eq!(cut_node.deps, vec![expected_receive]);
        match &cut_node.kind {
            OpKind::Traverse { src_key, .. } => assert_eq!(src_key, &expected_param),
            _ => panic!("expected traverse"),
        }
    }

    #[test]
    fn rejects_unknown_cut() {
        let (plan, _cut, _downstream) = linear_plan();
        let result = extract(&plan, &OpId::from_raw("ghost"), NodeId::new_random());
        assert!(result.is_err());
    }
}
