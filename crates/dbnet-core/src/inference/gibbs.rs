//! Gibbs sampling over the unrolled graph.
//!
//! Each iteration resamples one uniformly chosen non-evidence variable from
//! its full conditional. Discrete variables are sampled exactly by
//! enumeration. Continuous variables are drawn from the Gaussian formed by
//! their own CPD and their continuous children; soft-max children are folded
//! in with a Metropolis correction.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::distribution::{
    index, Distribution, Gaussian, LinearGaussian, Mixture, MixtureOf, Table, Value,
};
use crate::engine::errors::{InferenceError, QueryStateError, Result};
use crate::engine::factor::{Dim, Factor};
use crate::inference::config::{GibbsConfig, InferenceProperties, MIN_GIBBS_SAMPLES};
use crate::inference::progress::{check_cancelled, ProgressSink};
use crate::inference::InferenceAlgorithm;
use crate::model::network::DynamicNetwork;
use crate::model::transient::TransientGraph;
use crate::model::TransientId;

const MIN_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default)]
pub struct GibbsSampler;

impl InferenceAlgorithm for GibbsSampler {
    fn name(&self) -> &'static str {
        "gibbs"
    }

    fn execute(
        &self,
        network: &mut DynamicNetwork,
        all_marginals: bool,
        properties: &InferenceProperties,
        progress: &mut dyn ProgressSink,
    ) -> Result<Option<Factor>> {
        properties.validate()?;
        properties.gibbs.validate()?;
        network.validate()?;
        let slices = properties.slices(network.max_slices());
        network.unroll(slices)?;
        network.clear_transient_marginals();

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
        if queries.is_empty() && !all_marginals {
            return Err(InferenceError::Query(QueryStateError::NoQueryVariables));
        }

        let mut chain = Chain::new(graph, &horizon, slices, &properties.gibbs)?;
        chain.run(&properties.gibbs, properties, progress)?;
        let Chain { free, draws, .. } = chain;

        for (k, &id) in free.iter().enumerate() {
            for &value in &draws[k] {
                graph.push_sample(id, value);
            }
        }
        if all_marginals {
            for (k, &id) in free.iter().enumerate() {
                let marginal = empirical(graph, &[id], &[draws[k].as_slice()])?;
                graph.set_marginal(id, marginal);
            }
        }
        if queries.is_empty() {
            return Ok(None);
        }
        let columns = queries
            .iter()
            .map(|q| {
                free.iter()
                    .position(|f| f == q)
                    .map(|k| draws[k].as_slice())
                    .ok_or_else(|| InferenceError::Internal(format!("query {} not sampled", q)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(empirical(graph, &queries, &columns)?))
    }
}

struct Chain<'g> {
    graph: &'g TransientGraph,
    slices: usize,
    state: Vec<Value>,
    free: Vec<TransientId>,
    draws: Vec<Vec<Value>>,
    rng: StdRng,
}

impl<'g> Chain<'g> {
    /// Ancestral sample of the whole horizon, evidence clamped.
    fn new(
        graph: &'g TransientGraph,
        horizon: &[TransientId],
        slices: usize,
        config: &GibbsConfig,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut state = vec![Value::State(0); graph.len()];
        let mut free = Vec::new();
        for &id in horizon {
            let var = graph.get(id);
            let value = match var.evidence() {
                Some(x) => x,
                None => {
                    free.push(id);
                    let (discrete, continuous) = parent_values(graph, &state, id)?;
                    var.cpd().sample_cpd(&discrete, &continuous, &mut rng)?
                }
            };
            state[id.index()] = value;
        }
        let draws = vec![Vec::new(); free.len()];
        Ok(Self {
            graph,
            slices,
            state,
            free,
            draws,
            rng,
        })
    }

    fn run(
        &mut self,
        config: &GibbsConfig,
        properties: &InferenceProperties,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        if self.free.is_empty() {
            return Ok(());
        }
        let report_every = (config.max_samples / 10).max(1);
        let mut skipped = 0usize;
        for i in 0..config.max_samples {
            check_cancelled(properties.cancellation())?;
            let pick = self.free[self.rng.gen_range(0..self.free.len())];
            if let Err(e) = self.resample(pick) {
                skipped += 1;
                tracing::warn!("gibbs iteration {} skipped at {}: {}", i, pick, e);
            }
            if i >= config.burn_in {
                for (k, &id) in self.free.iter().enumerate() {
                    self.draws[k].push(self.state[id.index()]);
                }
            }
            if (i + 1) % report_every == 0 {
                progress.line(&format!("gibbs: {}/{} iterations", i + 1, config.max_samples));
            }
        }
        progress.line(&format!(
            "gibbs: {} draws kept, {} iteration(s) skipped",
            config.max_samples - config.burn_in,
            skipped
        ));
        Ok(())
    }

    fn children(&self, id: TransientId) -> Vec<TransientId> {
        self.graph
            .get(id)
            .children()
            .iter()
            .copied()
            .filter(|c| self.graph.get(*c).time() < self.slices)
            .collect()
    }

    /// Log-probability of `id`'s own value under its CPD given the current state.
    fn log_cpd(&self, id: TransientId) -> Result<f64> {
        let var = self.graph.get(id);
        let (mut discrete, tails) = parent_values(self.graph, &self.state, id)?;
        let value = self.state[id.index()];
        let heads = match value {
            Value::State(s) => {
                discrete.push(s);
                Vec::new()
            }
            Value::Real(x) => vec![x],
        };
        var.cpd().log_probability(&discrete, &heads, &tails)
    }

    /// Sum of the log-probabilities of `id`'s CPD and its children's CPDs.
    fn log_blanket(&self, id: TransientId, children: &[TransientId]) -> Result<f64> {
        let mut total = self.log_cpd(id)?;
        for &c in children {
            total += self.log_cpd(c)?;
        }
        Ok(total)
    }

    fn resample(&mut self, id: TransientId) -> Result<()> {
        let children = self.children(id);
        match self.graph.get(id).states() {
            Some(states) => self.resample_discrete(id, states, &children),
            None => self.resample_continuous(id, &children),
        }
    }

    fn resample_discrete(
        &mut self,
        id: TransientId,
        states: usize,
        children: &[TransientId],
    ) -> Result<()> {
        let previous = self.state[id.index()];
        let mut log_p = Vec::with_capacity(states);
        for s in 0..states {
            self.state[id.index()] = Value::State(s);
            match self.log_blanket(id, children) {
                Ok(lp) => log_p.push(lp),
                Err(e) => {
                    self.state[id.index()] = previous;
                    return Err(e);
                }
            }
        }
        self.state[id.index()] = previous;
        let max = log_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(InferenceError::Numerical(format!(
                "full conditional of {} has no mass",
                id
            )));
        }
        let weights: Vec<f64> = log_p.iter().map(|lp| (lp - max).exp()).collect();
        let table = Table::new(vec![states], weights)?.normalized();
        let s = table.sample(&mut self.rng)?;
        self.state[id.index()] = Value::State(s);
        Ok(())
    }

    fn resample_continuous(&mut self, id: TransientId, children: &[TransientId]) -> Result<()> {
        let proposal = self.gaussian_conditional(id, children)?;
        let x = proposal
            .sample(&[], &mut self.rng)?
            .first()
            .copied()
            .ok_or_else(|| InferenceError::Internal("empty continuous draw".into()))?;
        let soft: Vec<TransientId> = children
            .iter()
            .copied()
            .filter(|c| self.graph.get(*c).is_discrete())
            .collect();
        if soft.is_empty() {
            self.state[id.index()] = Value::Real(x);
            return Ok(());
        }
        let previous = self.state[id.index()];
        let before: f64 = soft.iter().map(|&c| self.log_cpd(c)).sum::<Result<f64>>()?;
        self.state[id.index()] = Value::Real(x);
        let after = soft.iter().map(|&c| self.log_cpd(c)).sum::<Result<f64>>();
        let accept = match after {
            Ok(after) => self.rng.gen::<f64>().ln() < after - before,
            Err(e) => {
                self.state[id.index()] = previous;
                return Err(e);
            }
        };
        if !accept {
            self.state[id.index()] = previous;
        }
        Ok(())
    }

    /// Gaussian over `id` from its own CPD and its continuous children, with
    /// every other variable fixed at its current value.
    fn gaussian_conditional(
        &self,
        id: TransientId,
        children: &[TransientId],
    ) -> Result<LinearGaussian> {
        let var = self.graph.get(id);
        let assign = |ids: &[TransientId]| -> Vec<(TransientId, Value)> {
            ids.iter()
                .copied()
                .filter(|p| *p != id)
                .map(|p| (p, self.state[p.index()]))
                .collect()
        };
        let mut f = var.cpd_factor()?.set_evidence_all(&assign(var.parents()))?;
        for &c in children {
            let child = self.graph.get(c);
            if child.is_discrete() {
                continue;
            }
            let cpd = child.cpd_factor()?;
            let g = cpd.set_evidence_all(&assign(child.parents()))?;
            f = f.combine(&g)?.set_evidence(c, self.state[c.index()])?;
        }
        f.branches()
            .and_then(|m| m.single_branch().cloned())
            .filter(|b| b.heads() == 1 && b.tails() == 0)
            .ok_or_else(|| {
                InferenceError::Numerical(format!(
                    "conditional of {} is not a single Gaussian: {}",
                    id, f
                ))
            })
    }
}

/// Current values of `id`'s parents: discrete states in CPD layout order,
/// continuous values in tail order.
fn parent_values(
    graph: &TransientGraph,
    state: &[Value],
    id: TransientId,
) -> Result<(Vec<usize>, Vec<f64>)> {
    let var = graph.get(id);
    let discrete = var
        .discrete_parents()
        .iter()
        .map(|d| {
            state[d.var.index()]
                .as_state()
                .ok_or_else(|| InferenceError::Internal(format!("{} holds a real value", d.var)))
        })
        .collect::<Result<Vec<_>>>()?;
    let continuous = var
        .continuous_parents()
        .iter()
        .map(|p| {
            state[p.index()]
                .as_real()
                .ok_or_else(|| InferenceError::Internal(format!("{} holds a discrete state", p)))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((discrete, continuous))
}

/// Empirical joint over `vars` from aligned draw columns: a table over the
/// discrete ones, with per-configuration sample moments of the continuous
/// ones (pooled moments where a configuration has too few draws).
fn empirical(graph: &TransientGraph, vars: &[TransientId], columns: &[&[Value]]) -> Result<Factor> {
    let n = columns.first().map_or(0, |c| c.len());
    if n < MIN_GIBBS_SAMPLES {
        return Err(InferenceError::Configuration(format!(
            "gibbs: {} draws, at least {} needed",
            n, MIN_GIBBS_SAMPLES
        )));
    }
    let mut discrete = Vec::new();
    let mut discrete_cols = Vec::new();
    let mut head = Vec::new();
    let mut head_cols = Vec::new();
    for (&v, &col) in vars.iter().zip(columns) {
        match graph.get(v).states() {
            Some(states) => {
                discrete.push(Dim::new(v, states));
                discrete_cols.push(col);
            }
            None => {
                head.push(v);
                head_cols.push(col);
            }
        }
    }
    let dims: Vec<usize> = discrete.iter().map(|d| d.card).collect();
    let configs = index::cardinality(&dims);
    let mut config_of = Vec::with_capacity(n);
    let mut counts = vec![0.0; configs];
    for i in 0..n {
        let states = discrete_cols
            .iter()
            .map(|c| c[i].as_state().unwrap_or(0))
            .collect::<Vec<_>>();
        let flat = index::flat_index(&states, &dims);
        counts[flat] += 1.0;
        config_of.push(flat);
    }
    let weights = Table::new(dims.clone(), counts.iter().map(|c| c / n as f64).collect())?;
    if head.is_empty() {
        return Factor::from_table(discrete, weights);
    }

    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            head_cols
                .iter()
                .map(|c| c[i].as_real().unwrap_or(0.0))
                .collect()
        })
        .collect();
    let pooled = moments(rows.iter().map(Vec::as_slice), head.len())?;
    let value = if discrete.is_empty() {
        Distribution::Gaussian(pooled)
    } else {
        let branches = (0..configs)
            .map(|k| {
                if counts[k] < MIN_GIBBS_SAMPLES as f64 {
                    return Ok(pooled.clone());
                }
                moments(
                    rows.iter()
                        .zip(&config_of)
                        .filter(|(_, c)| **c == k)
                        .map(|(r, _)| r.as_slice()),
                    head.len(),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Distribution::Mixture(Mixture::GaussianMix(MixtureOf::new(dims, branches, Some(weights))?))
    };
    Factor::new(discrete, head, Vec::new(), value)
}

/// Sample mean and (unbiased) covariance; the diagonal is floored so the
/// result stays positive definite.
fn moments<'a>(rows: impl Iterator<Item = &'a [f64]> + Clone, dim: usize) -> Result<Gaussian> {
    let n = rows.clone().count() as f64;
    let mut mean = vec![0.0; dim];
    for r in rows.clone() {
        for j in 0..dim {
            mean[j] += r[j] / n;
        }
    }
    let mut cov = vec![0.0; dim * dim];
    for r in rows {
        for a in 0..dim {
            for b in 0..dim {
                cov[a * dim + b] += (r[a] - mean[a]) * (r[b] - mean[b]) / (n - 1.0);
            }
        }
    }
    for a in 0..dim {
        cov[a * dim + a] = cov[a * dim + a].max(MIN_VARIANCE);
    }
    Gaussian::new(mean, cov)
}
