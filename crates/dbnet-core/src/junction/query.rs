//! Queries over a calibrated forest.

use rustc_hash::FxHashSet;

use crate::engine::errors::{InferenceError, QueryStateError, Result};
use crate::engine::factor::Factor;
use crate::junction::tree::{Forest, NodeRef};
use crate::model::transient::TransientGraph;
use crate::model::TransientId;

/// Posterior marginal of every non-evidence variable, taken from the first
/// clique (in pre-order from the root) that holds it.
pub fn all_marginals(
    forest: &Forest,
    graph: &TransientGraph,
) -> Result<Vec<(TransientId, Factor)>> {
    let mut assigned: FxHashSet<TransientId> = FxHashSet::default();
    let mut out = Vec::new();
    for node in forest.pre_order() {
        let pending: Vec<TransientId> = forest
            .clique(node)
            .members
            .iter()
            .copied()
            .filter(|v| !assigned.contains(v) && !graph.get(*v).is_evidence())
            .collect();
        if pending.is_empty() {
            continue;
        }
        let joint = forest.joint(node)?;
        for v in pending {
            if !joint.contains(v) {
                continue;
            }
            let marginal = joint.marginalize_onto(&[v])?.normalized()?;
            assigned.insert(v);
            out.push((v, marginal));
        }
    }
    Ok(out)
}

/// Joint posterior over every query-tagged variable in the forest's horizon.
///
/// Only the subtree spanning the cliques that hold query variables takes
/// part: the joint of its top clique is combined with the complements below
/// it, and variables no later step needs are integrated out on the way.
pub fn joint_query(forest: &Forest, graph: &TransientGraph) -> Result<Factor> {
    let queries: Vec<TransientId> = graph
        .iter()
        .filter(|v| v.is_query() && v.time() < forest.len())
        .map(|v| v.id())
        .collect();
    if queries.is_empty() {
        return Err(InferenceError::Query(QueryStateError::NoQueryVariables));
    }

    let order = forest.pre_order();
    let mut paths = Vec::with_capacity(queries.len());
    for q in &queries {
        // cliques holding q form a subtree; pre-order meets its top first
        let holder = order
            .iter()
            .copied()
            .find(|n| forest.clique(*n).members.contains(q))
            .ok_or_else(|| InferenceError::Internal(format!("no clique holds query {}", q)))?;
        let mut path = forest.path_to_root(holder);
        path.reverse();
        paths.push(path);
    }
    let shared = |i: usize| paths.iter().all(|p| p.len() > i && p[i] == paths[0][i]);
    let mut common = 0;
    while shared(common) {
        common += 1;
    }
    let top = paths[0][common - 1];
    let mut subtree: FxHashSet<NodeRef> = FxHashSet::default();
    for path in &paths {
        subtree.extend(path[common..].iter().copied());
    }
    let below: Vec<NodeRef> = order.into_iter().filter(|n| subtree.contains(n)).collect();

    let mut joint = forest.joint(top)?;
    for (i, node) in below.iter().enumerate() {
        joint = joint.combine(&forest.clique(*node).factor)?;
        let mut needed = queries.clone();
        for later in &below[i + 1..] {
            if let Some(sep) = forest.parent_separator(*later) {
                needed.extend(sep.members.iter().copied());
            }
        }
        joint = prune(&joint, &needed)?;
    }
    let mut result = joint.marginalize_onto(&queries)?;
    result.normalize()?;
    Ok(result)
}

/// Integrates out continuous variables not in `needed`; discrete ones go only
/// once no needed continuous variable depends on them.
fn prune(joint: &Factor, needed: &[TransientId]) -> Result<Factor> {
    let heads_remain = joint.head().iter().any(|h| needed.contains(h));
    let mut keep: Vec<TransientId> = joint
        .head()
        .iter()
        .copied()
        .filter(|h| needed.contains(h))
        .collect();
    keep.extend(joint.tail().iter().copied());
    keep.extend(
        joint
            .discrete()
            .iter()
            .map(|d| d.var)
            .filter(|v| heads_remain || needed.contains(v)),
    );
    joint.marginalize_onto(&keep)
}
