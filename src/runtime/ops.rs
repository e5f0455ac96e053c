//! Per-operator task bodies (`§4.F`). Each function owns its input/output
//! channel ends and runs until its input(s) close, then closes its output
//! by returning (dropping `out`), matching the closure-propagation model of
//! `§5`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::PlasmaError;
use crate::expr::{self, LExpr};
use crate::graph::EdgePredicate;
use crate::model::{NodeId, PropValue};
use crate::plan::{AggregateKind, OpId, Order, Plan, ProjectField};
use crate::pt::{PathTuple, PtSlot};
use crate::subplan;

use super::context::RunContext;

type PtTx = mpsc::Sender<PathTuple>;
type PtRx = mpsc::Receiver<PathTuple>;

/// True when `pt` already carries the plan's terminal binding even though
/// we're about to run an operator strictly upstream of it in the local
/// spine (`§9` "Operator identity": PT keys are op ids shared by both
/// peers, so a remote sub-query's fully-computed result re-enters the
/// local dataflow at `receive` and flows back down through operators it
/// has, from the remote side, already passed). Such a PT must be forwarded
/// untouched rather than reprocessed — its upstream bindings (the ones
/// this operator would otherwise look up) were never carried across the
/// cut, only the finished result was.
fn already_finished(pt: &PathTuple, op: &OpId, root: &OpId) -> bool {
    if op == root {
        pt.get(op).is_some()
    } else {
        pt.get(root).is_some()
    }
}

/// `parameter`: yields a seed PT per provided value, once, then closes.
pub async fn run_parameter(op: OpId, seeds: Vec<NodeId>, out: PtTx, ctx: RunContext) {
    for seed in seeds {
        let pt = PathTuple::empty().extended(op.clone(), PtSlot::Node(seed));
        ctx.metrics.record_emit();
        if out.send(pt).await.is_err() {
            return;
        }
    }
}

/// `traverse`: follows matching edges from `pt[src_key]`, one PT per
/// target; detects proxy crossings and hands them off to the remote
/// transport, merging results back onto `remote_tx` (`§4.F`).
#[allow(clippy::too_many_arguments)]
pub async fn run_traverse(
    op: OpId,
    src_key: OpId,
    predicate: EdgePredicate,
    plan: Arc<Plan>,
    remote_timeout_ms: u64,
    mut input: PtRx,
    out: PtTx,
    remote_tx: PtTx,
    ctx: RunContext,
) {
    let root = plan.root.clone();
    let mut visited: HashSet<NodeId> = HashSet::new();
    while let Some(pt) = input.recv().await {
        if already_finished(&pt, &op, &root) {
            if out.send(pt).await.is_err() {
                return;
            }
            continue;
        }
        let Some(src) = pt.node(&src_key).cloned() else {
            ctx.report_drop(
                op.clone(),
                PlasmaError::PlanInvalid(format!("traverse op {op} has no binding at {src_key}")),
            );
            continue;
        };
        if !visited.insert(src.clone()) {
            continue; // §8 invariant 3: no repeat emission per traversal op run.
        }
        match ctx.graph.is_proxy(&src).await {
            Ok(true) => {
                spawn_proxy_crossing(
                    op.clone(),
                    src,
                    pt,
                    Arc::clone(&plan),
                    remote_timeout_ms,
                    remote_tx.clone(),
                    ctx.clone(),
                );
            }
            Ok(false) => {
                let targets = match ctx.graph.edges(&src, Some(&predicate)).await {
                    Ok(t) => t,
                    Err(err) => {
                        ctx.report_drop(op.clone(), err);
                        continue;
                    }
                };
                for target in targets.into_keys() {
                    let extended = pt.extended(op.clone(), PtSlot::Node(target));
                    ctx.metrics.record_emit();
                    if out.send(extended).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => ctx.report_drop(op.clone(), err),
        }
    }
}

fn spawn_proxy_crossing(
    cut: OpId,
    proxy_src: NodeId,
    inbound_pt: PathTuple,
    plan: Arc<Plan>,
    timeout_ms: u64,
    remote_tx: PtTx,
    ctx: RunContext,
) {
    ctx.metrics.record_remote_crossing();
    tokio::spawn(async move {
        let peer_url = match ctx.graph.find_node(&proxy_src).await {
            Ok(Some(node)) => node.proxy.clone(),
            _ => None,
        };
        let Some(peer_url) = peer_url else {
            ctx.report_drop(
                cut,
                PlasmaError::GraphMissing(format!("proxy node {proxy_src} has no `proxy` url")),
            );
            return;
        };
        let sub_plan = match subplan::extract(&plan, &cut, proxy_src.clone()) {
            Ok(p) => p,
            Err(err) => {
                ctx.report_drop(cut, err);
                return;
            }
        };
        let mut remote_rx = match ctx.remote.sub_query(&peer_url, sub_plan).await {
            Ok(rx) => rx,
            Err(err) => {
                let _ = ctx.events.send(super::context::EngineEvent::RemoteClosed {
                    peer: peer_url.clone(),
                    timed_out: false,
                });
                ctx.report_drop(cut, err);
                return;
            }
        };
        let budget = Duration::from_millis(timeout_ms);
        loop {
            match timeout(budget, remote_rx.recv()).await {
                Ok(Some(remote_pt)) => {
                    let merged = inbound_pt.merged(&remote_pt);
                    ctx.metrics.record_emit();
                    if remote_tx.send(merged).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = ctx.events.send(super::context::EngineEvent::RemoteClosed {
                        peer: peer_url.clone(),
                        timed_out: false,
                    });
                    break;
                }
                Err(_elapsed) => {
                    let _ = ctx.events.send(super::context::EngineEvent::RemoteClosed {
                        peer: peer_url.clone(),
                        timed_out: true,
                    });
                    break;
                }
            }
        }
        // `remote_tx` drops here, releasing this crossing's hold on the
        // receive op's fan-in channel (`§9` dynamic `remotes` channel).
    });
}

// `join` is standard channel plumbing (`§4.F`): the engine wires it by
// aliasing channel ends directly, so it has no task body here.

/// `property`: ensures the listed properties of `pt[pt_key]` are present,
/// loading them from the graph store if not already attached.
pub async fn run_property(
    op: OpId,
    pt_key: OpId,
    props: Vec<String>,
    root: OpId,
    mut input: PtRx,
    out: PtTx,
    ctx: RunContext,
) {
    while let Some(pt) = input.recv().await {
        if already_finished(&pt, &op, &root) {
            if out.send(pt).await.is_err() {
                return;
            }
            continue;
        }
        let already = pt.get(&op).and_then(PtSlot::as_props);
        if let Some(existing) = already {
            if props.iter().all(|p| existing.contains_key(p)) {
                ctx.metrics.record_emit();
                if out.send(pt).await.is_err() {
                    return;
                }
                continue;
            }
        }
        let Some(node_id) = pt.node(&pt_key).cloned() else {
            ctx.report_drop(
                op.clone(),
                PlasmaError::PlanInvalid(format!("property op {op} has no binding at {pt_key}")),
            );
            continue;
        };
        let node = match ctx.graph.find_node(&node_id).await {
            Ok(Some(n)) => n,
            Ok(None) => {
                ctx.report_drop(op.clone(), PlasmaError::GraphMissing(node_id.to_string()));
                continue;
            }
            Err(err) => {
                ctx.report_drop(op.clone(), err);
                continue;
            }
        };
        let mut loaded: BTreeMap<String, PropValue> = BTreeMap::new();
        for name in &props {
            if let Some(v) = node.properties.get(name) {
                loaded.insert(name.clone(), v.clone());
            }
        }
        let extended = pt.extended(op.clone(), PtSlot::Props(loaded));
        ctx.metrics.record_emit();
        if out.send(extended).await.is_err() {
            return;
        }
    }
}

/// `select`: retains PTs for which `predicate` evaluates to `true`.
/// Evaluation errors drop the offending PT and are reported, not fatal
/// (`§4.F`/`§7`).
pub async fn run_select(
    op: OpId,
    predicate: LExpr,
    root: OpId,
    mut input: PtRx,
    out: PtTx,
    ctx: RunContext,
) {
    while let Some(pt) = input.recv().await {
        if already_finished(&pt, &op, &root) {
            if out.send(pt).await.is_err() {
                return;
            }
            continue;
        }
        match expr::eval(&predicate, &pt) {
            Ok(PropValue::Scalar(crate::model::Scalar::Bool(true))) => {
                ctx.metrics.record_emit();
                if out.send(pt).await.is_err() {
                    return;
                }
            }
            Ok(PropValue::Scalar(crate::model::Scalar::Bool(false))) => {}
            Ok(other) => ctx.report_drop(
                op.clone(),
                PlasmaError::TypeMismatch {
                    op: "select".into(),
                    detail: format!("predicate did not evaluate to a boolean: {other:?}"),
                },
            ),
            Err(err) => ctx.report_drop(op.clone(), err),
        }
    }
}

/// `expression`: emits a new PT extended with the computed value bound to
/// this operator's id.
pub async fn run_expression(
    op: OpId,
    expr_tree: LExpr,
    root: OpId,
    mut input: PtRx,
    out: PtTx,
    ctx: RunContext,
) {
    while let Some(pt) = input.recv().await {
        if already_finished(&pt, &op, &root) {
            if out.send(pt).await.is_err() {
                return;
            }
            continue;
        }
        match expr::eval(&expr_tree, &pt) {
            Ok(value) => {
                let extended = pt.extended(op.clone(), PtSlot::Value(value));
                ctx.metrics.record_emit();
                if out.send(extended).await.is_err() {
                    return;
                }
            }
            Err(err) => ctx.report_drop(op.clone(), err),
        }
    }
}

/// `project`: converts each PT into a result record, stored as a
/// [`PtSlot::Props`] bound to this operator's own id so downstream
/// aggregates can treat projected and unprojected streams uniformly.
pub async fn run_project(
    op: OpId,
    fields: Vec<ProjectField>,
    root: OpId,
    mut input: PtRx,
    out: PtTx,
    ctx: RunContext,
) {
    while let Some(pt) = input.recv().await {
        if already_finished(&pt, &op, &root) {
            if out.send(pt).await.is_err() {
                return;
            }
            continue;
        }
        let mut record = BTreeMap::new();
        let mut ok = true;
        for field in &fields {
            if field.props.is_empty() {
                match pt.node(&field.pvar) {
                    Some(id) => {
                        record.insert(field.alias.clone(), PropValue::from(id.as_str()));
                    }
                    None => {
                        ctx.report_drop(
                            op.clone(),
                            PlasmaError::PlanInvalid(format!(
                                "project op {op} has no node bound at {}",
                                field.pvar
                            )),
                        );
                        ok = false;
                        break;
                    }
                }
            } else {
                match pt.get(&field.pvar).and_then(PtSlot::as_props) {
                    Some(props) => {
                        let mut selected = BTreeMap::new();
                        for name in &field.props {
                            if let Some(v) = props.get(name) {
                                selected.insert(name.clone(), v.clone());
                            }
                        }
                        record.insert(field.alias.clone(), PropValue::Map(selected));
                    }
                    None => {
                        ctx.report_drop(
                            op.clone(),
                            PlasmaError::PlanInvalid(format!(
                                "project op {op} has no properties loaded at {}",
                                field.pvar
                            )),
                        );
                        ok = false;
                        break;
                    }
                }
            }
        }
        if !ok {
            continue;
        }
        let extended = pt.extended(op.clone(), PtSlot::Props(record));
        ctx.metrics.record_emit();
        if out.send(extended).await.is_err() {
            return;
        }
    }
}

/// Resolves the property named `prop` on the node bound at `key`, reading
/// an already-loaded [`PtSlot::Props`] if present or falling back to a
/// graph lookup — used by the aggregate family, which references bare
/// traversal bindings rather than requiring a preceding `property` op.
async fn resolve_prop(
    ctx: &RunContext,
    pt: &PathTuple,
    key: &OpId,
    prop: &str,
) -> crate::error::Result<Option<PropValue>> {
    if let Some(props) = pt.get(key).and_then(PtSlot::as_props) {
        return Ok(props.get(prop).cloned());
    }
    let Some(node_id) = pt.node(key) else {
        return Ok(None);
    };
    let node = ctx.graph.find_node(node_id).await?;
    Ok(node.and_then(|n| n.properties.get(prop).cloned()))
}

/// The `aggregate` family: buffers all PTs, then folds on input close
/// (`§4.D`).
pub async fn run_aggregate(
    op: OpId,
    kind: AggregateKind,
    mut input: PtRx,
    out: PtTx,
    ctx: RunContext,
) {
    let mut buffer = Vec::new();
    while let Some(pt) = input.recv().await {
        buffer.push(pt);
    }
    match kind {
        AggregateKind::Generic => {
            for pt in buffer {
                if out.send(pt).await.is_err() {
                    return;
                }
            }
        }
        AggregateKind::Sort {
            sort_key,
            sort_prop,
            order,
        } => {
            let mut keyed = Vec::with_capacity(buffer.len());
            for pt in buffer {
                let value = resolve_prop(&ctx, &pt, &sort_key, &sort_prop).await.ok().flatten();
                keyed.push((numeric_key(&value), pt));
            }
            keyed.sort_by(|a, b| match order {
                Order::Asc => a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal),
                Order::Desc => b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal),
            });
            for (_, pt) in keyed {
                if out.send(pt).await.is_err() {
                    return;
                }
            }
        }
        AggregateKind::Min { sort_key, sort_prop } => {
            if let Some(pt) = pick_extreme(&ctx, buffer, &sort_key, &sort_prop, false).await {
                let _ = out.send(pt).await;
            }
        }
        AggregateKind::Max { sort_key, sort_prop } => {
            if let Some(pt) = pick_extreme(&ctx, buffer, &sort_key, &sort_prop, true).await {
                let _ = out.send(pt).await;
            }
        }
        AggregateKind::Average { value_key, prop } => {
            let mut total = 0.0_f64;
            let mut count = 0_u64;
            for pt in &buffer {
                if let Some(v) = resolve_prop(&ctx, pt, &value_key, &prop).await.ok().flatten() {
                    if let Some(n) = v.as_scalar().and_then(|s| s.as_f64()) {
                        total += n;
                        count += 1;
                    }
                }
            }
            let avg = if count == 0 { 0.0 } else { total / count as f64 };
            let mut record = BTreeMap::new();
            record.insert("average".to_string(), PropValue::from(avg));
            let result = PathTuple::empty().extended(op.clone(), PtSlot::Props(record));
            let _ = out.send(result).await;
        }
        AggregateKind::Count => {
            let mut record = BTreeMap::new();
            record.insert("count".to_string(), PropValue::from(buffer.len() as i64));
            let result = PathTuple::empty().extended(op.clone(), PtSlot::Props(record));
            let _ = out.send(result).await;
        }
        AggregateKind::Choose { n } => {
            for pt in buffer.into_iter().take(n) {
                if out.send(pt).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn pick_extreme(
    ctx: &RunContext,
    buffer: Vec<PathTuple>,
    sort_key: &OpId,
    sort_prop: &str,
    want_max: bool,
) -> Option<PathTuple> {
    let mut best: Option<(f64, PathTuple)> = None;
    for pt in buffer {
        let value = resolve_prop(ctx, &pt, sort_key, sort_prop).await.ok().flatten();
        let Some(n) = numeric_key(&value) else { continue };
        let keep = match &best {
            None => true,
            Some((b, _)) => {
                if want_max {
                    n > *b
                } else {
                    n < *b
                }
            }
        };
        if keep {
            best = Some((n, pt));
        }
    }
    best.map(|(_, pt)| pt)
}

fn numeric_key(value: &Option<PropValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.as_scalar()).and_then(|s| s.as_f64())
}

/// `limit`: stream-side, emits the first `n` PTs then closes, draining any
/// residual upstream silently so the producer still observes a normal
/// close rather than a broken pipe.
pub async fn run_limit(_op: OpId, n: usize, mut input: PtRx, out: PtTx, ctx: RunContext) {
    let mut emitted = 0;
    while let Some(pt) = input.recv().await {
        if emitted >= n {
            continue; // drain silently, §4.F "draining residual upstream silently"
        }
        ctx.metrics.record_emit();
        if out.send(pt).await.is_err() {
            break;
        }
        emitted += 1;
    }
}

/// `receive`: merges the dependency's output with the dynamic set of
/// remote tuple streams that proxy crossings contribute during this query
/// (`§4.F`, `§9`). The `remote_rx` side closes automatically once every
/// `traverse` task and every spawned remote-crossing task has dropped its
/// clone of the shared sender — which happens only after each has fully
/// drained its own input, giving the "closes after every remote channel
/// has also closed" guarantee without an explicit stream-of-streams type.
pub async fn run_receive(mut left: PtRx, mut remote_rx: PtRx, out: PtTx) {
    let mut left_open = true;
    let mut remote_open = true;
    while left_open || remote_open {
        tokio::select! {
            v = left.recv(), if left_open => match v {
                Some(pt) => { if out.send(pt).await.is_err() { return; } }
                None => left_open = false,
            },
            v = remote_rx.recv(), if remote_open => match v {
                Some(pt) => { if out.send(pt).await.is_err() { return; } }
                None => remote_open = false,
            },
        }
    }
}

/// `send`: forwards the input onto a network-facing outbound channel,
/// closing it when input closes (`§4.D`). Used by the peer facade's
/// `sub-query` handler to stream results onto the RPC response.
pub async fn run_send(mut input: PtRx, dest: PtTx) {
    while let Some(pt) = input.recv().await {
        if dest.send(pt).await.is_err() {
            return;
        }
    }
}
