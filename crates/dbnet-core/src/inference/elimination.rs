//! Variable elimination directly on the unrolled graph.
//!
//! Transient ids are handed out slice by slice in topological order, so
//! descending id order runs leaves to roots. Continuous variables are
//! eliminated before discrete ones. Evidence on a continuous variable that
//! still conditions on unobserved continuous parents waits until elimination
//! has folded those parents into its factor.

use rustc_hash::FxHashSet;

use crate::distribution::Value;
use crate::engine::errors::{InferenceError, QueryStateError, Result};
use crate::engine::factor::Factor;
use crate::inference::config::InferenceProperties;
use crate::inference::progress::{check_cancelled, ProgressSink};
use crate::inference::InferenceAlgorithm;
use crate::model::network::DynamicNetwork;
use crate::model::transient::{NodeKind, TransientGraph};
use crate::model::TransientId;

#[derive(Debug, Clone, Copy, Default)]
pub struct VariableElimination;

impl InferenceAlgorithm for VariableElimination {
    fn name(&self) -> &'static str {
        "variable-elimination"
    }

    fn execute(
        &self,
        network: &mut DynamicNetwork,
        all_marginals: bool,
        properties: &InferenceProperties,
        progress: &mut dyn ProgressSink,
    ) -> Result<Option<Factor>> {
        properties.validate()?;
        network.validate()?;
        let slices = properties.slices(network.max_slices());
        network.unroll(slices)?;
        network.clear_transient_marginals();

        let snapshot = network.store_state();
        let result = run(network, slices, all_marginals, properties, progress);
        network.restore_state(&snapshot);
        result
    }
}

fn run(
    network: &mut DynamicNetwork,
    slices: usize,
    all_marginals: bool,
    properties: &InferenceProperties,
    progress: &mut dyn ProgressSink,
) -> Result<Option<Factor>> {
    let graph = network
        .transient_graph_mut()
        .ok_or_else(|| InferenceError::Internal("transient graph missing".into()))?;
    let horizon: Vec<TransientId> = graph
        .iter()
        .filter(|v| v.time() < slices)
        .map(|v| v.id())
        .collect();
    let queries: Vec<TransientId> = horizon
        .iter()
        .copied()
        .filter(|v| graph.get(*v).is_query())
        .collect();

    if all_marginals {
        let hidden: Vec<TransientId> = horizon
            .iter()
            .copied()
            .filter(|v| !graph.get(*v).is_evidence())
            .collect();
        for &q in &queries {
            graph.set_node_kind(q, NodeKind::Hidden);
        }
        for &v in &hidden {
            check_cancelled(properties.cancellation())?;
            graph.set_node_kind(v, NodeKind::Query);
            let marginal = eliminate(graph, &horizon, &[v]);
            graph.set_node_kind(v, NodeKind::Hidden);
            graph.set_marginal(v, marginal?);
        }
        for &q in &queries {
            graph.set_node_kind(q, NodeKind::Query);
        }
        progress.line(&format!("{} marginal(s) computed", hidden.len()));
    }

    if queries.is_empty() {
        return if all_marginals {
            Ok(None)
        } else {
            Err(InferenceError::Query(QueryStateError::NoQueryVariables))
        };
    }
    let joint = eliminate(graph, &horizon, &queries)?;
    progress.line(&format!("joint over {} query variable(s)", queries.len()));
    Ok(Some(joint))
}

/// Posterior joint over `targets` given all evidence in `horizon`.
pub fn eliminate(
    graph: &TransientGraph,
    horizon: &[TransientId],
    targets: &[TransientId],
) -> Result<Factor> {
    let relevant = relevant(graph, horizon, targets);

    let mut pending: Vec<(TransientId, f64)> = Vec::new();
    let mut factors = Vec::with_capacity(relevant.len());
    for &id in &relevant {
        let var = graph.get(id);
        let cpd = var.cpd_factor()?;
        let observed: Vec<(TransientId, Value)> = cpd
            .variables()
            .filter(|v| !cpd.head().contains(v))
            .filter_map(|v| graph.get(v).evidence().map(|x| (v, x)))
            .collect();
        factors.push(cpd.set_evidence_all(&observed)?);
        if let Some(Value::Real(x)) = var.evidence() {
            pending.push((id, x));
        }
    }

    let is_target = |v: &TransientId| targets.contains(v);
    let (continuous, discrete): (Vec<TransientId>, Vec<TransientId>) = relevant
        .iter()
        .rev()
        .copied()
        .filter(|v| !is_target(v) && !graph.get(*v).is_evidence())
        .partition(|v| !graph.get(*v).is_discrete());

    for v in continuous {
        let mut product = take_bucket(&mut factors, v)?;
        product = observe_ready(product, &mut pending)?;
        factors.push(product.marginalize(v)?);
    }
    for i in 0..factors.len() {
        let f = std::mem::replace(&mut factors[i], Factor::unit());
        factors[i] = observe_ready(f, &mut pending)?;
    }
    for v in discrete {
        let product = observe_ready(take_bucket(&mut factors, v)?, &mut pending)?;
        // summing out a discrete variable under continuous heads would
        // collapse the mixture; leave it for the final marginal
        if product.head().is_empty() {
            factors.push(product.marginalize(v)?);
        } else {
            factors.push(product);
        }
    }

    let mut joint = Factor::unit();
    for f in &factors {
        joint = joint.combine(f)?;
    }
    joint = observe_ready(joint, &mut pending)?;
    if let Some((v, _)) = pending.first() {
        return Err(InferenceError::Structural(format!(
            "evidence on {} could not be entered: {}",
            v, joint
        )));
    }
    let mut result = joint.marginalize_onto(targets)?;
    result.normalize()?;
    Ok(result)
}

/// Targets, evidence and all their ancestors, ascending by id. Everything
/// else is barren and sums to one.
fn relevant(
    graph: &TransientGraph,
    horizon: &[TransientId],
    targets: &[TransientId],
) -> Vec<TransientId> {
    let mut stack: Vec<TransientId> = horizon
        .iter()
        .copied()
        .filter(|v| targets.contains(v) || graph.get(*v).is_evidence())
        .collect();
    let mut seen: FxHashSet<TransientId> = FxHashSet::default();
    while let Some(v) = stack.pop() {
        if seen.insert(v) {
            stack.extend(graph.get(v).parents().iter().copied());
        }
    }
    let mut out: Vec<TransientId> = seen.into_iter().collect();
    out.sort_unstable();
    out
}

/// Removes and multiplies every factor mentioning `v`.
fn take_bucket(factors: &mut Vec<Factor>, v: TransientId) -> Result<Factor> {
    let mut product = Factor::unit();
    let mut i = 0;
    while i < factors.len() {
        if factors[i].contains(v) {
            let f = factors.swap_remove(i);
            product = product.combine(&f)?;
        } else {
            i += 1;
        }
    }
    Ok(product)
}

/// Enters every pending continuous observation whose variable is a head of
/// `factor` while the factor has no tail.
fn observe_ready(mut factor: Factor, pending: &mut Vec<(TransientId, f64)>) -> Result<Factor> {
    if !factor.tail().is_empty() {
        return Ok(factor);
    }
    let mut i = 0;
    while i < pending.len() {
        let (v, x) = pending[i];
        if factor.head().contains(&v) {
            factor = factor.set_evidence(v, Value::Real(x))?;
            pending.swap_remove(i);
        } else {
            i += 1;
        }
    }
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{ConditionalTable, Gaussian, LinearGaussian};
    use crate::inference::progress::NullProgress;
    use crate::model::template::VariableKind;

    #[test]
    fn discrete_chain_posterior() {
        let mut net = DynamicNetwork::new(1);
        let x = net.add_variable("x", VariableKind::BINARY).expect("x");
        let y = net.add_variable("y", VariableKind::BINARY).expect("y");
        net.add_parent(y, x, 0).expect("edge");
        let px = ConditionalTable::new(vec![], vec![vec![0.3, 0.7]]).expect("px");
        let py = ConditionalTable::new(vec![2], vec![vec![0.9, 0.1], vec![0.2, 0.8]]).expect("py");
        net.set_cpd(x, 0, px).expect("x cpd");
        net.set_cpd(y, 0, py).expect("y cpd");
        net.set_evidence(y, 0, Value::State(1)).expect("evidence");
        net.set_query(x, 0, true).expect("query");
        let props = InferenceProperties::default();
        let joint = VariableElimination
            .execute(&mut net, false, &props, &mut NullProgress)
            .expect("run")
            .expect("joint");
        let t = joint.table().expect("discrete");
        assert!((t.values()[0] - 0.03 / 0.59).abs() < 1e-12);
        assert!((t.values()[1] - 0.56 / 0.59).abs() < 1e-12);
    }

    #[test]
    fn continuous_evidence_waits_for_its_parents() {
        let mut net = DynamicNetwork::new(1);
        let x = net.add_variable("x", VariableKind::Continuous).expect("x");
        let y = net.add_variable("y", VariableKind::Continuous).expect("y");
        net.add_parent(y, x, 0).expect("edge");
        let px = Gaussian::univariate(0.0, 1.0).expect("px");
        let py = LinearGaussian::univariate(0.0, vec![1.0], 1.0).expect("py");
        net.set_cpd(x, 0, px).expect("x cpd");
        net.set_cpd(y, 0, py).expect("y cpd");
        net.set_evidence(y, 0, Value::Real(2.0)).expect("evidence");
        net.set_query(x, 0, true).expect("query");
        let props = InferenceProperties::default();
        let joint = VariableElimination
            .execute(&mut net, true, &props, &mut NullProgress)
            .expect("run")
            .expect("joint");
        // x | y=2 ~ N(1, 0.5)
        let mean = joint.value().expected_value().expect("mean")[0];
        assert!((mean - 1.0).abs() < 1e-12);
        let var = joint.value().covariance().expect("cov")[0];
        assert!((var - 0.5).abs() < 1e-12);
        assert!(net.marginal(x, 0).is_ok());
        assert!(net.is_query(x, 0));
    }

    #[test]
    fn missing_queries_are_reported() {
        let mut net = DynamicNetwork::new(1);
        net.add_variable("x", VariableKind::BINARY).expect("x");
        let props = InferenceProperties::default();
        let err = VariableElimination
            .execute(&mut net, false, &props, &mut NullProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Query(QueryStateError::NoQueryVariables)
        ));
    }
}
