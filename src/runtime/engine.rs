//! The operator runtime (`§4.F`): wires a [`Plan`]'s DAG into a network of
//! cooperative `tokio` tasks connected by bounded channels, one task per
//! operator instance (`§5` "Scheduling model").

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::model::NodeId;
use crate::plan::{OpId, OpKind, Plan, ResultRecord};
use crate::pt::{PathTuple, PtSlot};

use super::context::{EngineEvent, RunContext};
use super::ops;

type PtTx = mpsc::Sender<PathTuple>;
type PtRx = mpsc::Receiver<PathTuple>;

/// The channels produced by wiring and running a plan.
pub struct EngineOutput {
    /// The plan's terminal result stream.
    pub results: PtRx,
    /// Side-channel of per-PT/per-channel errors (`§7`).
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    /// Any named `send` destinations the plan produced, keyed by channel
    /// name (`§4.D`'s `send` operator).
    pub sends: HashMap<String, PtRx>,
}

/// Executes plans against a [`RunContext`] (`§4.F`).
#[derive(Clone)]
pub struct Engine {
    ctx: RunContext,
}

impl Engine {
    /// Builds an engine bound to the given execution context.
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    /// Wires and spawns every operator task for `plan`, seeded with
    /// `seeds` (path-variable name to the node id list its `parameter` op
    /// should emit), and returns the resulting channels immediately
    /// (`§5`: a query is a forest of concurrent tasks communicating only
    /// via channels).
    pub fn execute(&self, plan: Plan, seeds: BTreeMap<String, Vec<NodeId>>) -> EngineOutput {
        let plan = Arc::new(plan);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let ctx = RunContext {
            events: event_tx,
            ..self.ctx.clone()
        };

        // `join` is pure channel plumbing (`§4.F`): alias its id to its
        // `right` dependency's channel, and redirect `right`'s input to
        // `left`'s output instead of whatever `right.deps` says.
        let mut alias: HashMap<OpId, OpId> = HashMap::new();
        let mut input_override: HashMap<OpId, OpId> = HashMap::new();
        for node in plan.ops.values() {
            if let OpKind::Join { left, right } = &node.kind {
                alias.insert(node.id.clone(), right.clone());
                input_override.insert(right.clone(), left.clone());
            }
        }
        let producer = |mut id: OpId| -> OpId {
            let mut guard = 0;
            while let Some(next) = alias.get(&id) {
                id = next.clone();
                guard += 1;
                if guard > plan.ops.len() {
                    break;
                }
            }
            id
        };

        let mut txs: HashMap<OpId, PtTx> = HashMap::new();
        let mut rxs: HashMap<OpId, PtRx> = HashMap::new();
        for node in plan.ops.values() {
            if matches!(node.kind, OpKind::Join { .. }) {
                continue;
            }
            let (tx, rx) = mpsc::channel(ctx.channel_capacity);
            txs.insert(node.id.clone(), tx);
            rxs.insert(node.id.clone(), rx);
        }

        // The per-query fan-in for proxy crossings (`§9` dynamic `remotes`
        // channel): every `traverse` task holds a clone, dropped once its
        // input drains, so `remote_rx` closes exactly when every traverse
        // op and every remote crossing it spawned has finished.
        let (remote_tx, remote_rx) = mpsc::channel::<PathTuple>(ctx.channel_capacity);
        let mut remote_rx = Some(remote_rx);

        let remote_timeout_ms = receive_timeout_ms(&plan);
        let mut sends = HashMap::new();

        for node in plan.ops.values() {
            let id = node.id.clone();
            match &node.kind {
                OpKind::Parameter { name, literal } => {
                    let seed_values = match literal {
                        Some(seed) => vec![seed.clone()],
                        None => seeds.get(name).cloned().unwrap_or_default(),
                    };
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_parameter(id, seed_values, out, ctx.clone()));
                }
                OpKind::Traverse { src_key, predicate } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("traverse input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_traverse(
                        id,
                        src_key.clone(),
                        predicate.clone(),
                        Arc::clone(&plan),
                        remote_timeout_ms,
                        input,
                        out,
                        remote_tx.clone(),
                        ctx.clone(),
                    ));
                }
                OpKind::Join { .. } => {
                    // No task: wiring above already redirects `right`'s
                    // input and aliases this id to `right`'s channel.
                }
                OpKind::Property { pt_key, props } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("property input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_property(
                        id,
                        pt_key.clone(),
                        props.clone(),
                        plan.root.clone(),
                        input,
                        out,
                        ctx.clone(),
                    ));
                }
                OpKind::Select { predicate } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("select input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_select(id, predicate.clone(), plan.root.clone(), input, out, ctx.clone()));
                }
                OpKind::Expression { expr } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("expression input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_expression(id, expr.clone(), plan.root.clone(), input, out, ctx.clone()));
                }
                OpKind::Project { fields } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("project input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_project(id, fields.clone(), plan.root.clone(), input, out, ctx.clone()));
                }
                OpKind::Aggregate { kind } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("aggregate input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_aggregate(id, kind.clone(), input, out, ctx.clone()));
                }
                OpKind::Limit { n } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("limit input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    tokio::spawn(ops::run_limit(id, *n, input, out, ctx.clone()));
                }
                OpKind::Send { dest } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let input = rxs.remove(&producer(dep)).expect("send input wired");
                    txs.remove(&id); // nothing else reads this op's own slot
                    let (dest_tx, dest_rx) = mpsc::channel(ctx.channel_capacity);
                    tokio::spawn(ops::run_send(input, dest_tx));
                    sends.insert(dest.clone(), dest_rx);
                }
                OpKind::Receive { .. } => {
                    let dep = input_override.get(&id).cloned().unwrap_or_else(|| node.deps[0].clone());
                    let left = rxs.remove(&producer(dep)).expect("receive input wired");
                    let out = txs.remove(&id).expect("channel wired");
                    let remote = remote_rx.take().expect("only one receive op per plan");
                    tokio::spawn(ops::run_receive(left, remote, out));
                }
            }
        }
        // Drop the engine's own handle; only clones held by traverse tasks
        // (and crossings they spawn) keep `remote_rx` open from here on.
        drop(remote_tx);

        let results = rxs.remove(&producer(plan.root.clone())).expect("root channel wired");
        EngineOutput {
            results,
            events: event_rx,
            sends,
        }
    }

    /// Runs a plan to completion, collecting its result records
    /// (`§4.H`'s `query`). `wall_timeout` bounds the whole call; on expiry
    /// the root channel is dropped and whatever records arrived before
    /// then are returned (`§5` "Cancellation & timeouts").
    pub async fn query(
        &self,
        plan: Plan,
        seeds: BTreeMap<String, Vec<NodeId>>,
        wall_timeout: Option<Duration>,
    ) -> Vec<ResultRecord> {
        let root = plan.root.clone();
        let pbind = plan.pbind.clone();
        // A trailing `sort`/`limit`/`choose` forwards each PT unchanged
        // rather than rebinding its own id (`§4.F`), so once one of those
        // follows a `project` step, `plan.root` no longer names a slot the
        // PT carries. `extract_record` tries `root` first and falls back
        // to the `project` op's id, covering both cases.
        let record_key = project_op_id(&plan);
        let mut output = self.execute(plan, seeds);
        let mut records = Vec::new();
        let sleep = async {
            match wall_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut sleep => break,
                maybe_pt = output.results.recv() => match maybe_pt {
                    Some(pt) => records.push(extract_record(&pt, &root, record_key.as_ref(), &pbind)),
                    None => break,
                },
            }
        }
        records
    }

    /// Runs a plan to completion, collecting the raw node id bound at
    /// `plan.root` from each result PT rather than a projected record. Used
    /// by [`crate::iter_query`]'s drivers, whose plans deliberately carry no
    /// projection so each round's output can be fed straight back in as the
    /// next round's `ROOT-ID` seed (`§4.I`).
    pub async fn query_raw_ids(
        &self,
        plan: Plan,
        seeds: BTreeMap<String, Vec<NodeId>>,
        wall_timeout: Option<Duration>,
    ) -> Vec<NodeId> {
        let root = plan.root.clone();
        let mut output = self.execute(plan, seeds);
        let mut ids = Vec::new();
        let sleep = async {
            match wall_timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut sleep => break,
                maybe_pt = output.results.recv() => match maybe_pt {
                    Some(pt) => {
                        if let Some(id) = pt.node(&root) {
                            ids.push(id.clone());
                        }
                    }
                    None => break,
                },
            }
        }
        ids
    }
}

fn extract_record(pt: &PathTuple, root: &OpId, project_key: Option<&OpId>, pbind: &BTreeMap<String, OpId>) -> ResultRecord {
    if let Some(props) = pt.get(root).and_then(PtSlot::as_props) {
        return props.clone();
    }
    if let Some(key) = project_key {
        if let Some(props) = pt.get(key).and_then(PtSlot::as_props) {
            return props.clone();
        }
    }
    let mut record = BTreeMap::new();
    for (var, op) in pbind {
        if let Some(id) = pt.node(op) {
            record.insert(var.clone(), crate::model::PropValue::from(id.as_str()));
        }
    }
    record
}

/// The id of the plan's `project` operator, if it has one. A trailing
/// `sort`/`limit`/`choose` forwards PTs unchanged rather than rebinding its
/// own id, so `project`'s slot is still the right place to read projected
/// fields from even when it isn't the plan's terminal op.
fn project_op_id(plan: &Plan) -> Option<OpId> {
    plan.ops
        .values()
        .find(|node| matches!(node.kind, OpKind::Project { .. }))
        .map(|node| node.id.clone())
}

fn receive_timeout_ms(plan: &Plan) -> u64 {
    plan.ops
        .values()
        .find_map(|n| match &n.kind {
            OpKind::Receive { timeout_ms } => Some(*timeout_ms),
            _ => None,
        })
        .unwrap_or(5_000)
}
