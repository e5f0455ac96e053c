//! Human-readable explain tree for a [`Plan`](super::Plan).
//!
//! Not part of `§4.D`'s wire format — additive tooling for the CLI's
//! `explain` subcommand, in the spirit of `sombra`'s `PlanExplain`/
//! `ExplainNode`.

use std::collections::BTreeSet;

use super::{OpId, OpNode, Plan};

/// One node of the explain tree.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    /// Operator id.
    pub id: OpId,
    /// Operator kind name, e.g. `"traverse"`.
    pub op: String,
    /// Upstream explain nodes.
    pub inputs: Vec<ExplainNode>,
}

/// Builds a human-readable tree rooted at `plan.root`, following `deps`
/// edges. Operators reachable more than once (e.g. shared subexpressions)
/// are only expanded the first time they are visited.
pub fn explain(plan: &Plan) -> ExplainNode {
    let mut visited = BTreeSet::new();
    build(plan, &plan.root, &mut visited)
}

fn build(plan: &Plan, id: &OpId, visited: &mut BTreeSet<OpId>) -> ExplainNode {
    let node: &OpNode = match plan.op(id) {
        Some(n) => n,
        None => {
            return ExplainNode {
                id: id.clone(),
                op: "<missing>".into(),
                inputs: vec![],
            }
        }
    };
    if !visited.insert(id.clone()) {
        return ExplainNode {
            id: id.clone(),
            op: format!("{} (repeated)", node.kind.name()),
            inputs: vec![],
        };
    }
    let inputs = node
        .deps
        .iter()
        .map(|dep| build(plan, dep, visited))
        .collect();
    ExplainNode {
        id: id.clone(),
        op: node.kind.name().to_string(),
        inputs,
    }
}

/// Renders an explain tree as indented text.
pub fn render(node: &ExplainNode) -> String {
    let mut out = String::new();
    render_into(node, 0, &mut out);
    out
}

fn render_into(node: &ExplainNode, depth: usize, out: &mut String) {
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!("{} [{}]\n", node.op, node.id));
    for input in &node.inputs {
        render_into(input, depth + 1, out);
    }
}
