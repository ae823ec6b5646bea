//! Mixture forms: one branch distribution per configuration of the discrete
//! parents, plus an optional discrete mixing distribution over those parents.
//!
//! `MixtureOf<LinearGaussian>` with explicit mixing weights is also the
//! working form for all hybrid factor algebra; the positional operations
//! below fan each step out over the branch array and, separately, over the
//! mixing table.

use std::fmt;

use smallvec::smallvec;

use crate::distribution::gaussian::Gaussian;
use crate::distribution::index::{self, Projection, States};
use crate::distribution::linear_gaussian::{LinearGaussian, TailSource};
use crate::distribution::sigmoid::Sigmoid;
use crate::distribution::table::Table;
use crate::engine::errors::{InferenceError, Result};

/// Tolerance under which two branches are treated as identical.
const BRANCH_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct MixtureOf<D> {
    parent_dims: Vec<usize>,
    branches: Vec<D>,
    mixing: Option<Table>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mixture {
    GaussianMix(MixtureOf<Gaussian>),
    LinearGaussianMix(MixtureOf<LinearGaussian>),
    MultinomialSigmoidMix(MixtureOf<Sigmoid>),
}

impl<D> MixtureOf<D> {
    pub fn new(parent_dims: Vec<usize>, branches: Vec<D>, mixing: Option<Table>) -> Result<Self> {
        let expected = index::cardinality(&parent_dims);
        if branches.len() != expected {
            return Err(InferenceError::Configuration(format!(
                "mixture over parents {:?} needs {} branches, got {}",
                parent_dims,
                expected,
                branches.len()
            )));
        }
        if let Some(m) = &mixing {
            if m.dims() != parent_dims.as_slice() {
                return Err(InferenceError::Configuration(format!(
                    "mixing distribution over {:?} does not match parents {:?}",
                    m.dims(),
                    parent_dims
                )));
            }
        }
        Ok(Self {
            parent_dims,
            branches,
            mixing,
        })
    }

    pub(crate) fn from_parts(
        parent_dims: Vec<usize>,
        branches: Vec<D>,
        mixing: Option<Table>,
    ) -> Self {
        debug_assert_eq!(branches.len(), index::cardinality(&parent_dims));
        Self {
            parent_dims,
            branches,
            mixing,
        }
    }

    pub fn parent_dims(&self) -> &[usize] {
        &self.parent_dims
    }

    pub fn branches(&self) -> &[D] {
        &self.branches
    }

    pub fn mixing(&self) -> Option<&Table> {
        self.mixing.as_ref()
    }

    pub fn branch(&self, parent_states: &[usize]) -> &D {
        &self.branches[index::flat_index(parent_states, &self.parent_dims)]
    }

    /// Mixing weight of a flat configuration (1 when there is no mixing table).
    pub fn weight(&self, flat: usize) -> f64 {
        self.mixing.as_ref().map_or(1.0, |m| m.values()[flat])
    }

    /// The mixing table, materialized as ones when absent.
    pub fn weights(&self) -> Table {
        self.mixing
            .clone()
            .unwrap_or_else(|| Table::ones(self.parent_dims.clone()))
    }

    pub(crate) fn into_parts(self) -> (Vec<usize>, Vec<D>, Option<Table>) {
        (self.parent_dims, self.branches, self.mixing)
    }

    pub(crate) fn map<E>(&self, f: impl FnMut(&D) -> E) -> MixtureOf<E> {
        MixtureOf {
            parent_dims: self.parent_dims.clone(),
            branches: self.branches.iter().map(f).collect(),
            mixing: self.mixing.clone(),
        }
    }

    /// Keeps the branches whose configuration has `states[dim] == state`.
    pub(crate) fn select(&self, dim: usize, state: usize) -> Result<MixtureOf<D>>
    where
        D: Clone,
    {
        let card = *self.parent_dims.get(dim).ok_or_else(|| {
            InferenceError::Internal(format!("evidence on missing mixture dimension {}", dim))
        })?;
        if state >= card {
            return Err(InferenceError::Configuration(format!(
                "evidence state {} out of range for dimension of size {}",
                state, card
            )));
        }
        let mut dims = self.parent_dims.clone();
        dims.remove(dim);
        let mut branches = Vec::with_capacity(index::cardinality(&dims));
        let mut states: States = smallvec![0; self.parent_dims.len()];
        for b in &self.branches {
            if states[dim] == state {
                branches.push(b.clone());
            }
            index::advance(&mut states, &self.parent_dims);
        }
        let mixing = match &self.mixing {
            Some(m) => Some(m.set_evidence(dim, state)?),
            None => None,
        };
        Ok(MixtureOf {
            parent_dims: dims,
            branches,
            mixing,
        })
    }

    /// Appends a trailing discrete dimension the branches do not depend on.
    pub(crate) fn extend(&self, card: usize) -> MixtureOf<D>
    where
        D: Clone,
    {
        let mut dims = self.parent_dims.clone();
        dims.push(card);
        let branches = self
            .branches
            .iter()
            .flat_map(|b| std::iter::repeat(b).take(card).cloned())
            .collect();
        MixtureOf {
            parent_dims: dims,
            branches,
            mixing: self.mixing.as_ref().map(|m| m.extend(card)),
        }
    }
}

impl MixtureOf<Gaussian> {
    /// Overall mean `Σ w_i μ_i` with normalized mixing weights.
    pub fn expected_value(&self) -> Vec<f64> {
        let (weights, total) = self.normalized_weights();
        let dim = self.branches.first().map_or(0, Gaussian::dim);
        let mut mean = vec![0.0; dim];
        for (w, b) in weights.iter().zip(&self.branches) {
            for (m, v) in mean.iter_mut().zip(b.mean().iter()) {
                *m += w / total * v;
            }
        }
        mean
    }

    /// Overall covariance `Σ w_i (Σ_i + (μ_i − μ)(μ_i − μ)ᵀ)`, row-major.
    pub fn covariance(&self) -> Vec<f64> {
        let refs: Vec<(f64, LinearGaussian)> = self
            .normalized_weights()
            .0
            .into_iter()
            .zip(&self.branches)
            .map(|(w, b)| (w, LinearGaussian::from(b.clone())))
            .collect();
        let pairs: Vec<(f64, &LinearGaussian)> = refs.iter().map(|(w, b)| (*w, b)).collect();
        match LinearGaussian::collapse(&pairs) {
            Ok(c) => c.covariance().transpose().iter().copied().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn normalized_weights(&self) -> (Vec<f64>, f64) {
        let weights: Vec<f64> = (0..self.branches.len()).map(|i| self.weight(i)).collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            (weights, total)
        } else {
            (vec![1.0; self.branches.len()], self.branches.len() as f64)
        }
    }
}

/// Hybrid working-form operations. Discrete layout is `parent_dims`; head and
/// tail positions are those of every branch.
impl MixtureOf<LinearGaussian> {
    pub fn heads(&self) -> usize {
        self.branches.first().map_or(0, LinearGaussian::heads)
    }

    pub fn tails(&self) -> usize {
        self.branches.first().map_or(0, LinearGaussian::tails)
    }

    /// Branch-wise product over the union discrete layout `out_dims`.
    ///
    /// `up`'s branches must already live in the result tail space; `down`'s
    /// tail columns are resolved through `sources`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn compose(
        up: &MixtureOf<LinearGaussian>,
        down: &MixtureOf<LinearGaussian>,
        up_positions: &[usize],
        down_positions: &[usize],
        out_dims: &[usize],
        sources: &[TailSource],
        width: usize,
    ) -> MixtureOf<LinearGaussian> {
        let weights = up
            .weights()
            .combine(&down.weights(), up_positions, down_positions, out_dims);
        let left = Projection::new(up_positions, &up.parent_dims);
        let right = Projection::new(down_positions, &down.parent_dims);
        let mut branches = Vec::with_capacity(weights.len());
        let mut states: States = smallvec![0; out_dims.len()];
        loop {
            let u = &up.branches[left.index(&states)];
            let d = &down.branches[right.index(&states)];
            branches.push(LinearGaussian::compose(u, d, sources, width));
            if !index::advance(&mut states, out_dims) {
                break;
            }
        }
        MixtureOf {
            parent_dims: out_dims.to_vec(),
            branches,
            mixing: Some(weights),
        }
    }

    /// Multiplies in a purely discrete potential, widening the layout to `out_dims`.
    pub(crate) fn scale(
        &self,
        table: &Table,
        self_positions: &[usize],
        table_positions: &[usize],
        out_dims: &[usize],
    ) -> MixtureOf<LinearGaussian> {
        let weights = self
            .weights()
            .combine(table, self_positions, table_positions, out_dims);
        let proj = Projection::new(self_positions, &self.parent_dims);
        let mut branches = Vec::with_capacity(weights.len());
        let mut states: States = smallvec![0; out_dims.len()];
        loop {
            branches.push(self.branches[proj.index(&states)].clone());
            if !index::advance(&mut states, out_dims) {
                break;
            }
        }
        MixtureOf {
            parent_dims: out_dims.to_vec(),
            branches,
            mixing: Some(weights),
        }
    }

    /// Sums out discrete dimension `dim`.
    ///
    /// Branches that differ across the summed states are collapsed by moment
    /// matching; the returned flag reports whether that happened.
    pub(crate) fn marginalize_discrete(
        &self,
        dim: usize,
    ) -> Result<(MixtureOf<LinearGaussian>, bool)> {
        let weights = self.weights();
        let card = self.parent_dims[dim];
        let mut out_dims = self.parent_dims.clone();
        out_dims.remove(dim);
        let out_len = index::cardinality(&out_dims);

        let mut out_weights = Vec::with_capacity(out_len);
        let mut branches = Vec::with_capacity(out_len);
        let mut weak = false;
        let mut out_states: States = smallvec![0; out_dims.len()];
        let mut full: States = smallvec![0; self.parent_dims.len()];
        loop {
            for (i, s) in out_states.iter().enumerate() {
                full[if i < dim { i } else { i + 1 }] = *s;
            }
            let mut group = Vec::with_capacity(card);
            for s in 0..card {
                full[dim] = s;
                let flat = index::flat_index(&full, &self.parent_dims);
                group.push((weights.values()[flat], &self.branches[flat]));
            }
            out_weights.push(group.iter().map(|(w, _)| w).sum::<f64>());
            let first = group[0].1;
            if group
                .iter()
                .all(|(_, b)| b.approx_eq(first, BRANCH_TOLERANCE))
            {
                branches.push(first.clone());
            } else {
                weak = true;
                branches.push(LinearGaussian::collapse(&group)?);
            }
            if !index::advance(&mut out_states, &out_dims) {
                break;
            }
        }
        Ok((
            MixtureOf {
                mixing: Some(Table::from_parts_unchecked(out_dims.clone(), out_weights)),
                parent_dims: out_dims,
                branches,
            },
            weak,
        ))
    }

    /// Keeps only the listed heads in every branch.
    pub(crate) fn select_heads(&self, keep: &[usize]) -> MixtureOf<LinearGaussian> {
        self.map(|b| b.select_heads(keep))
    }

    /// Re-expresses every branch in a wider tail space.
    pub(crate) fn embed_tail(
        &self,
        positions: &[usize],
        width: usize,
    ) -> MixtureOf<LinearGaussian> {
        self.map(|b| b.embed_tail(positions, width))
    }

    pub(crate) fn observe_tail(&self, col: usize, value: f64) -> MixtureOf<LinearGaussian> {
        self.map(|b| b.observe_tail(col, value))
    }

    /// Observes a head in every branch. Branch likelihoods go into the
    /// mixing weights relative to the largest one, which is returned in log
    /// space so the caller can keep it as an overall scale.
    pub(crate) fn observe_head(
        &self,
        head: usize,
        value: f64,
    ) -> Result<(MixtureOf<LinearGaussian>, f64)> {
        let mut branches = Vec::with_capacity(self.branches.len());
        let mut log_liks = Vec::with_capacity(self.branches.len());
        for b in &self.branches {
            let (reduced, ll) = b.observe_head(head, value)?;
            branches.push(reduced);
            log_liks.push(ll);
        }
        let max = log_liks.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            return Err(InferenceError::Numerical(format!(
                "observation {} has zero density under every branch",
                value
            )));
        }
        let mut weights = self.weights();
        for (w, ll) in weights.values_mut().iter_mut().zip(&log_liks) {
            *w *= (ll - max).exp();
        }
        Ok((
            MixtureOf {
                parent_dims: self.parent_dims.clone(),
                branches,
                mixing: Some(weights),
            },
            max,
        ))
    }

    /// Divides by a marginal over discrete dimensions `marginal_positions` and
    /// the heads `given` (positions in `self`), leaving the conditional of the
    /// remaining heads with `given` appended to the tail.
    pub(crate) fn complement(
        &self,
        marginal_weights: &Table,
        marginal_positions: &[usize],
        given: &[usize],
    ) -> Result<MixtureOf<LinearGaussian>> {
        let own = self.weights();
        let weights = own.complement(marginal_weights, marginal_positions);
        let branches = if given.is_empty() {
            self.branches.clone()
        } else {
            self.branches
                .iter()
                .map(|b| b.condition_on(given))
                .collect::<Result<_>>()?
        };
        Ok(MixtureOf {
            parent_dims: self.parent_dims.clone(),
            branches,
            mixing: Some(weights),
        })
    }

    /// Collapses a mixture whose branches carry no discrete layout any more
    /// into a single regression, if every branch agrees.
    pub(crate) fn single_branch(&self) -> Option<&LinearGaussian> {
        let first = self.branches.first()?;
        self.branches
            .iter()
            .all(|b| b.approx_eq(first, BRANCH_TOLERANCE))
            .then_some(first)
    }
}

impl MixtureOf<Sigmoid> {
    pub fn states(&self) -> usize {
        self.branches.first().map_or(0, Sigmoid::states)
    }

    pub fn continuous_parents(&self) -> usize {
        self.branches.first().map_or(0, Sigmoid::parents)
    }

    pub(crate) fn observe_parent(&self, col: usize, value: f64) -> MixtureOf<Sigmoid> {
        self.map(|b| b.observe_parent(col, value))
    }

    /// Joint table over the discrete parents followed by the child, once all
    /// continuous parents are observed.
    pub fn to_table(&self) -> Result<Table> {
        let mut dims = self.parent_dims.clone();
        dims.push(self.states());
        let mut values = Vec::with_capacity(index::cardinality(&dims));
        for (i, b) in self.branches.iter().enumerate() {
            let w = self.weight(i);
            values.extend(b.to_table()?.values().iter().map(|p| p * w));
        }
        Ok(Table::from_parts_unchecked(dims, values))
    }
}

impl Mixture {
    pub fn parent_dims(&self) -> &[usize] {
        match self {
            Mixture::GaussianMix(m) => m.parent_dims(),
            Mixture::LinearGaussianMix(m) => m.parent_dims(),
            Mixture::MultinomialSigmoidMix(m) => m.parent_dims(),
        }
    }

    pub fn branch_count(&self) -> usize {
        match self {
            Mixture::GaussianMix(m) => m.branches().len(),
            Mixture::LinearGaussianMix(m) => m.branches().len(),
            Mixture::MultinomialSigmoidMix(m) => m.branches().len(),
        }
    }

    pub fn mixing(&self) -> Option<&Table> {
        match self {
            Mixture::GaussianMix(m) => m.mixing(),
            Mixture::LinearGaussianMix(m) => m.mixing(),
            Mixture::MultinomialSigmoidMix(m) => m.mixing(),
        }
    }
}

impl fmt::Display for Mixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mixture::GaussianMix(m) => {
                write!(f, "GaussianMix{:?}[", m.parent_dims())?;
                for (i, b) in m.branches().iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{:.6}*{}", m.weight(i), b)?;
                }
                write!(f, "]")
            }
            Mixture::LinearGaussianMix(m) => {
                write!(f, "LinearGaussianMix{:?}[", m.parent_dims())?;
                for (i, b) in m.branches().iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{:.6}*{}", m.weight(i), b)?;
                }
                write!(f, "]")
            }
            Mixture::MultinomialSigmoidMix(m) => {
                write!(
                    f,
                    "MultinomialSigmoidMix{:?}[{} states]",
                    m.parent_dims(),
                    m.states()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lg(mean: f64, var: f64) -> LinearGaussian {
        LinearGaussian::from(Gaussian::univariate(mean, var).expect("gaussian"))
    }

    #[test]
    fn new_checks_branch_count_and_mixing_layout() {
        assert!(MixtureOf::new(vec![2], vec![lg(0.0, 1.0)], None).is_err());
        let bad_mixing = Table::uniform(vec![3]);
        let branches = vec![lg(0.0, 1.0), lg(1.0, 1.0)];
        assert!(MixtureOf::new(vec![2], branches, Some(bad_mixing)).is_err());
    }

    #[test]
    fn marginalizing_identical_branches_is_exact() {
        let mix = MixtureOf::new(
            vec![2],
            vec![lg(1.0, 2.0), lg(1.0, 2.0)],
            Some(Table::new(vec![2], vec![0.25, 0.75]).expect("table")),
        )
        .expect("mixture");
        let (out, weak) = mix.marginalize_discrete(0).expect("marginalize");
        assert!(!weak);
        assert!((out.weight(0) - 1.0).abs() < 1e-12);
        assert!(out.branches()[0].approx_eq(&lg(1.0, 2.0), 1e-12));
    }

    #[test]
    fn marginalizing_distinct_branches_matches_moments() {
        let mix = MixtureOf::new(
            vec![2],
            vec![lg(0.0, 1.0), lg(4.0, 1.0)],
            Some(Table::new(vec![2], vec![0.5, 0.5]).expect("table")),
        )
        .expect("mixture");
        let (out, weak) = mix.marginalize_discrete(0).expect("marginalize");
        assert!(weak);
        let b = &out.branches()[0];
        assert!((b.offset()[0] - 2.0).abs() < 1e-12);
        assert!((b.covariance()[(0, 0)] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn observing_a_head_reweights_branches() {
        let mix = MixtureOf::new(vec![2], vec![lg(0.0, 1.0), lg(3.0, 1.0)], None).expect("mixture");
        let (out, log_scale) = mix.observe_head(0, 0.0).expect("observe");
        assert_eq!(out.heads(), 0);
        // branch 0 is the most likely: weight 1, the other exp(-4.5)
        assert!((out.weight(0) - 1.0).abs() < 1e-12);
        assert!((out.weight(1) - (-4.5f64).exp()).abs() < 1e-12);
        assert!((log_scale + 0.5 * (2.0 * std::f64::consts::PI).ln()).abs() < 1e-12);
    }

    #[test]
    fn gaussian_mix_moments() {
        let mix = MixtureOf::new(
            vec![2],
            vec![
                Gaussian::univariate(0.0, 1.0).expect("g"),
                Gaussian::univariate(2.0, 1.0).expect("g"),
            ],
            None,
        )
        .expect("mixture");
        assert!((mix.expected_value()[0] - 1.0).abs() < 1e-12);
        assert!((mix.covariance()[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_mix_flattens_with_child_last() {
        let mix = MixtureOf::new(
            vec![2],
            vec![
                Sigmoid::uniform(2, 0),
                Sigmoid::new(vec![0.0, 1.0], vec![], 0).expect("s"),
            ],
            None,
        )
        .expect("mixture");
        let t = mix.to_table().expect("table");
        assert_eq!(t.dims(), &[2, 2]);
        assert!((t.get(&[0, 1]) - 0.5).abs() < 1e-12);
        let e = 1.0f64.exp();
        assert!((t.get(&[1, 1]) - e / (1.0 + e)).abs() < 1e-12);
    }
}
