//! Two-pass calibration of the linked slice trees.
//!
//! Collect runs from the last slice back to slice 0, sending each clique's
//! marginal over its parent separator upward and keeping the complement
//! behind. Continuous evidence that could not be entered because its clique
//! still conditions on other continuous variables is then pushed to the
//! root. Distribute recomputes every separator from the root down.

use std::time::Instant;

use crate::distribution::Value;
use crate::engine::errors::{InferenceError, Result};
use crate::engine::factor::Factor;
use crate::inference::progress::{check_cancelled, CancellationToken, ProgressSink};
use crate::junction::clique::CliqueGraph;
use crate::junction::tree::{Forest, JunctionTree, NodeRef};
use crate::model::events::ModelEvent;
use crate::model::network::DynamicNetwork;
use crate::model::transient::TransientGraph;
use crate::model::TransientId;

/// Continuous evidence whose host clique factor still has a tail.
#[derive(Debug, Clone, Copy)]
struct Deferred {
    host: NodeRef,
    var: TransientId,
    value: Value,
}

/// Calibrates `network` over `slices` slices unless it already is, and
/// returns `ln P(evidence)`.
///
/// On failure the template stays uncalibrated, so the next run starts over.
pub fn calibrate(
    network: &mut DynamicNetwork,
    slices: usize,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancellationToken>,
) -> Result<f64> {
    let template = network.junction_tree_template();
    if template.is_calibrated() && !template.is_stale() && template.forest().len() == slices {
        if let Some(log_evidence) = template.log_evidence() {
            return Ok(log_evidence);
        }
    }
    network.junction_tree_template_mut().invalidate();
    network.solve_structure()?;
    network.unroll(slices)?;

    let start = Instant::now();
    progress.line(&format!("calibrating {} slice(s)", slices));
    let graphs = network.junction_tree_template().graphs();
    let result = match network.transient_graph() {
        Some(graph) => run(graphs, graph, slices, progress, cancel),
        None => Err(InferenceError::Internal("transient graph missing after unroll".into())),
    };
    match result {
        Ok((forest, log_evidence)) => {
            progress.line(&format!(
                "calibrated in {:.3} ms, ln P(e) = {:.6}",
                start.elapsed().as_secs_f64() * 1e3,
                log_evidence
            ));
            tracing::info!("calibrated {} slices, ln P(e) = {}", slices, log_evidence);
            network
                .junction_tree_template_mut()
                .set_calibrated(forest, log_evidence);
            network.notify(ModelEvent::Calibrated { slices });
            Ok(log_evidence)
        }
        Err(e) => {
            tracing::error!("calibration aborted: {}", e);
            progress.line(&format!("calibration aborted: {}", e));
            Err(e)
        }
    }
}

fn run(
    graphs: &[CliqueGraph],
    graph: &TransientGraph,
    slices: usize,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancellationToken>,
) -> Result<(Forest, f64)> {
    let mut forest = build_forest(graphs, graph, slices)?;
    let deferred = initialize(&mut forest, graph)?;

    for t in (0..slices).rev() {
        check_cancelled(cancel)?;
        collect_slice(&mut forest, t)?;
        progress.line(&format!("collect: slice {}", t));
    }
    for d in deferred {
        push_evidence(&mut forest, d)?;
    }

    let root = forest
        .root()
        .ok_or_else(|| InferenceError::Internal("empty forest".into()))?;
    let log_evidence = forest.clique_mut(root).factor.normalize()?;
    if !log_evidence.is_finite() {
        return Err(InferenceError::Numerical(format!(
            "evidence has zero probability (root {})",
            forest.clique(root).factor
        )));
    }

    for t in 0..slices {
        check_cancelled(cancel)?;
        distribute_slice(&mut forest, t)?;
        progress.line(&format!("distribute: slice {}", t));
    }
    Ok((forest, log_evidence))
}

/// One tree per slice, each rooted and grafted below the forward interface
/// of the slice before it.
fn build_forest(graphs: &[CliqueGraph], graph: &TransientGraph, slices: usize) -> Result<Forest> {
    if graphs.is_empty() {
        return Err(InferenceError::Internal("no clique templates".into()));
    }
    let template_for = |t: usize| &graphs[t.min(graphs.len() - 1)];
    let mut trees = Vec::with_capacity(slices);
    for t in 0..slices {
        let mut tree = JunctionTree::build(template_for(t), graph, t)?;
        tree.select_root(graph);
        trees.push(tree);
    }
    let mut forest = Forest::new(trees);

    for t in 1..slices {
        let incoming = &template_for(t).incoming;
        let previous = &forest.trees()[t - 1];
        let donor = match previous.forward_interface() {
            Some(c) => c,
            None if incoming.is_empty() => previous.root(),
            None => {
                return Err(InferenceError::Structural(format!(
                    "slice {} has no forward interface clique",
                    t - 1
                )));
            }
        };
        let members = incoming
            .iter()
            .map(|g| {
                graph.lookup(g.variable, t - g.lag).ok_or_else(|| {
                    InferenceError::Internal(format!("interface variable {} missing at t={}", g, t))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let tree = &mut forest.trees_mut()[t];
        tree.link_interface(donor, members);
        let root = tree.root();
        forest.attach(NodeRef::new(t - 1, donor), NodeRef::new(t, root));
    }
    Ok(forest)
}

/// Builds every clique factor from its assigned CPDs and enters evidence.
/// Discrete evidence and substitutions into tails go in per CPD; evidence
/// on a continuous head goes in once the clique factor has no tail left, or
/// is deferred.
fn initialize(forest: &mut Forest, graph: &TransientGraph) -> Result<Vec<Deferred>> {
    let mut deferred = Vec::new();
    for t in 0..forest.len() {
        for c in 0..forest.trees()[t].cliques().len() {
            let node = NodeRef::new(t, c);
            let mut factor = Factor::unit();
            for &id in &forest.clique(node).assigned {
                let cpd = graph.get(id).cpd_factor()?;
                let observed: Vec<(TransientId, Value)> = cpd
                    .variables()
                    .filter(|v| !cpd.head().contains(v))
                    .filter_map(|v| graph.get(v).evidence().map(|x| (v, x)))
                    .collect();
                factor = factor.combine(&cpd.set_evidence_all(&observed)?)?;
            }
            let heads: Vec<TransientId> = factor.head().to_vec();
            for h in heads {
                let Some(value) = graph.get(h).evidence() else {
                    continue;
                };
                if factor.tail().is_empty() {
                    factor = factor.set_evidence(h, value)?;
                } else {
                    tracing::debug!("deferring evidence on {} in clique {:?}", h, node);
                    deferred.push(Deferred {
                        host: node,
                        var: h,
                        value,
                    });
                }
            }
            forest.clique_mut(node).factor = factor;
        }
    }
    Ok(deferred)
}

/// Sends the message of `node` to its parent, keeping the complement.
fn send_up(forest: &mut Forest, node: NodeRef) -> Result<()> {
    let Some(parent) = forest.parent(node) else {
        return Ok(());
    };
    let members = forest
        .parent_separator(node)
        .map(|s| s.members.clone())
        .unwrap_or_default();
    let child = &forest.clique(node).factor;
    let message = child.marginalize_onto(&members)?;
    let complement = child.complement(&message)?;
    forest.clique_mut(node).factor = complement;
    let combined = forest.clique(parent).factor.combine(&message)?;
    forest.clique_mut(parent).factor = combined;
    Ok(())
}

fn collect_slice(forest: &mut Forest, t: usize) -> Result<()> {
    let order = forest.trees()[t].pre_order();
    for &c in order.iter().rev() {
        send_up(forest, NodeRef::new(t, c))?;
    }
    Ok(())
}

/// Moves a deferred continuous observation toward the root, together with
/// the discrete variables of each clique it passes, until a factor with no
/// tail holds it; then substitutes the value everywhere it is conditioned on.
fn push_evidence(forest: &mut Forest, deferred: Deferred) -> Result<()> {
    let Deferred { host, var, value } = deferred;
    let mut node = host;
    loop {
        let factor = &forest.clique(node).factor;
        if !factor.head().contains(&var) {
            return Err(InferenceError::Internal(format!(
                "deferred evidence on {} lost at clique {:?}: {}",
                var, node, factor
            )));
        }
        let Some(parent) = forest.parent(node) else {
            let observed = factor.set_evidence(var, value)?;
            forest.clique_mut(node).factor = observed;
            break;
        };
        let separator = forest
            .parent_separator(node)
            .map(|s| s.members.clone())
            .unwrap_or_default();
        let mut keep: Vec<TransientId> = separator
            .iter()
            .copied()
            .filter(|v| factor.contains(*v))
            .collect();
        let mut carried = vec![var];
        carried.extend(factor.discrete().iter().map(|d| d.var));
        for v in &carried {
            if !keep.contains(v) {
                keep.push(*v);
            }
        }
        let message = factor.marginalize_onto(&keep)?;
        let complement = factor.complement(&message)?;
        forest.clique_mut(node).factor = complement;
        let combined = forest.clique(parent).factor.combine(&message)?;
        forest.clique_mut(parent).factor = combined;

        if let Some(sep) = forest.parent_separator_mut(node) {
            for v in &carried {
                if !sep.members.contains(v) {
                    sep.members.push(*v);
                }
            }
        }
        let members = &mut forest.clique_mut(parent).members;
        for v in &carried {
            if !members.contains(v) {
                members.push(*v);
            }
        }
        tracing::debug!("pushed evidence on {} from {:?} to {:?}", var, node, parent);
        node = parent;
    }

    for t in 0..forest.len() {
        for clique in forest.trees_mut()[t].cliques_mut() {
            if clique.factor.tail().contains(&var) {
                clique.factor = clique.factor.set_evidence(var, value)?;
            }
        }
    }
    Ok(())
}

fn distribute_slice(forest: &mut Forest, t: usize) -> Result<()> {
    for c in forest.trees()[t].pre_order() {
        let node = NodeRef::new(t, c);
        let Some(parent) = forest.parent(node) else {
            continue;
        };
        let members = forest
            .parent_separator(node)
            .map(|s| s.members.clone())
            .unwrap_or_default();
        let mut message = forest.joint(parent)?.marginalize_onto(&members)?;
        message.normalize()?;
        if let Some(sep) = forest.parent_separator_mut(node) {
            sep.factor = Some(message);
        }
    }
    Ok(())
}
