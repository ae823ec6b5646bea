//! Factor (potential) algebra over transient variables.
//!
//! A factor partitions its variables into discrete dimensions, continuous
//! head dimensions and continuous tail (conditioning) dimensions, and is
//! backed by one [`Distribution`] value whose layout follows that partition.
//! Operations map variables to positions and dispatch to the distribution
//! algebra.

use std::fmt;

use crate::distribution::linear_gaussian::TailSource;
use crate::distribution::mixture::{Mixture, MixtureOf};
use crate::distribution::{Distribution, LinearGaussian, Table, Value, Working};
use crate::engine::errors::{InferenceError, Result};
use crate::model::TransientId;

/// A discrete dimension: the variable and its number of states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim {
    pub var: TransientId,
    pub card: usize,
}

impl Dim {
    pub fn new(var: TransientId, card: usize) -> Self {
        Self { var, card }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factor {
    discrete: Vec<Dim>,
    head: Vec<TransientId>,
    tail: Vec<TransientId>,
    value: Distribution,
    /// Scale carried outside the value, in log space.
    log_weight: f64,
}

impl Factor {
    pub fn new(
        discrete: Vec<Dim>,
        head: Vec<TransientId>,
        tail: Vec<TransientId>,
        value: Distribution,
    ) -> Result<Self> {
        let cards: Vec<usize> = discrete.iter().map(|d| d.card).collect();
        if value.discrete_dims() != cards {
            return Err(InferenceError::Configuration(format!(
                "distribution layout {:?} does not match discrete dimensions {:?}",
                value.discrete_dims(),
                cards
            )));
        }
        if value.heads() != head.len() || value.tails() != tail.len() {
            return Err(InferenceError::Configuration(format!(
                "distribution has {} heads / {} tails, factor declares {} / {}",
                value.heads(),
                value.tails(),
                head.len(),
                tail.len()
            )));
        }
        let mut seen: Vec<TransientId> = discrete.iter().map(|d| d.var).collect();
        seen.extend(head.iter().copied());
        seen.extend(tail.iter().copied());
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != total {
            return Err(InferenceError::Configuration(
                "a variable appears twice in one factor".into(),
            ));
        }
        Ok(Self {
            discrete,
            head,
            tail,
            value,
            log_weight: 0.0,
        })
    }

    /// The neutral factor: an empty scalar table with value 1.
    pub fn unit() -> Self {
        Self {
            discrete: Vec::new(),
            head: Vec::new(),
            tail: Vec::new(),
            value: Distribution::Table(Table::scalar(1.0)),
            log_weight: 0.0,
        }
    }

    pub fn from_table(discrete: Vec<Dim>, table: Table) -> Result<Self> {
        Self::new(discrete, Vec::new(), Vec::new(), Distribution::Table(table))
    }

    /// Factor of a conditional distribution: discrete parents followed by the
    /// child if discrete; a continuous child is the single head and the
    /// continuous parents are the tail.
    pub fn from_cpd(
        child: TransientId,
        child_states: Option<usize>,
        discrete_parents: &[Dim],
        continuous_parents: &[TransientId],
        cpd: &Distribution,
    ) -> Result<Self> {
        let mut discrete = discrete_parents.to_vec();
        let head = match child_states {
            Some(states) => {
                discrete.push(Dim::new(child, states));
                Vec::new()
            }
            None => vec![child],
        };
        Self::new(discrete, head, continuous_parents.to_vec(), cpd.clone())
    }

    pub fn discrete(&self) -> &[Dim] {
        &self.discrete
    }

    pub fn head(&self) -> &[TransientId] {
        &self.head
    }

    pub fn tail(&self) -> &[TransientId] {
        &self.tail
    }

    pub fn value(&self) -> &Distribution {
        &self.value
    }

    pub fn log_weight(&self) -> f64 {
        self.log_weight
    }

    pub fn is_discrete(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }

    /// Every variable of the factor: discrete, then heads, then tails.
    pub fn variables(&self) -> impl Iterator<Item = TransientId> + '_ {
        self.discrete
            .iter()
            .map(|d| d.var)
            .chain(self.head.iter().copied())
            .chain(self.tail.iter().copied())
    }

    pub fn contains(&self, var: TransientId) -> bool {
        self.variables().any(|v| v == var)
    }

    fn discrete_position(&self, var: TransientId) -> Option<usize> {
        self.discrete.iter().position(|d| d.var == var)
    }

    fn working(&self) -> Result<Working> {
        self.value.to_working().map_err(|e| match e {
            InferenceError::Unsupported(msg) => {
                InferenceError::Unsupported(format!("{} in factor {}", msg, self))
            }
            other => other,
        })
    }

    /// Rebuilds a factor from a working value, dropping the tail once no head
    /// remains (a normalized regression integrates to its weight).
    fn rebuild(
        discrete: Vec<Dim>,
        head: Vec<TransientId>,
        tail: Vec<TransientId>,
        working: Working,
        log_weight: f64,
    ) -> Factor {
        let (head, tail, working) = match working {
            Working::Hybrid(m) if head.is_empty() => {
                (Vec::new(), Vec::new(), Working::Discrete(m.weights()))
            }
            other => (head, tail, other),
        };
        let (value, log_scale) = Distribution::from_working(working);
        Factor {
            discrete,
            head,
            tail,
            value,
            log_weight: log_weight + log_scale,
        }
    }

    /// Pointwise product. The result's discrete dimensions are `self`'s
    /// followed by `other`'s new ones.
    pub fn combine(&self, other: &Factor) -> Result<Factor> {
        let mut discrete = self.discrete.clone();
        let mut other_positions = Vec::with_capacity(other.discrete.len());
        for d in &other.discrete {
            match discrete.iter().position(|e| e.var == d.var) {
                Some(p) => {
                    if discrete[p].card != d.card {
                        return Err(InferenceError::Internal(format!(
                            "variable {} has cardinality {} and {}",
                            d.var, discrete[p].card, d.card
                        )));
                    }
                    other_positions.push(p);
                }
                None => {
                    other_positions.push(discrete.len());
                    discrete.push(*d);
                }
            }
        }
        let self_positions: Vec<usize> = (0..self.discrete.len()).collect();
        let out_dims: Vec<usize> = discrete.iter().map(|d| d.card).collect();
        let log_weight = self.log_weight + other.log_weight;

        if self.head.iter().any(|h| other.head.contains(h)) {
            return Err(InferenceError::Structural(format!(
                "cannot combine factors sharing a continuous head: {} and {}",
                self, other
            )));
        }
        let self_feeds_other = self.head.iter().any(|h| other.tail.contains(h));
        let other_feeds_self = other.head.iter().any(|h| self.tail.contains(h));
        if self_feeds_other && other_feeds_self {
            return Err(InferenceError::Structural(format!(
                "combining {} and {} would create a continuous cycle",
                self, other
            )));
        }

        match (self.working()?, other.working()?) {
            (Working::Discrete(a), Working::Discrete(b)) => {
                let t = a.combine(&b, &self_positions, &other_positions, &out_dims);
                Ok(Factor {
                    discrete,
                    head: Vec::new(),
                    tail: Vec::new(),
                    value: Distribution::Table(t),
                    log_weight,
                })
            }
            (Working::Hybrid(m), Working::Discrete(t)) => {
                let out = m.scale(&t, &self_positions, &other_positions, &out_dims);
                Ok(Self::rebuild(
                    discrete,
                    self.head.clone(),
                    self.tail.clone(),
                    Working::Hybrid(out),
                    log_weight,
                ))
            }
            (Working::Discrete(t), Working::Hybrid(m)) => {
                let out = m.scale(&t, &other_positions, &self_positions, &out_dims);
                Ok(Self::rebuild(
                    discrete,
                    other.head.clone(),
                    other.tail.clone(),
                    Working::Hybrid(out),
                    log_weight,
                ))
            }
            (Working::Hybrid(a), Working::Hybrid(b)) => {
                let (up, up_mix, up_pos, down, down_mix, down_pos) = if other_feeds_self {
                    (other, b, other_positions, self, a, self_positions)
                } else {
                    (self, a, self_positions, other, b, other_positions)
                };
                let mut tail = up.tail.clone();
                for t in &down.tail {
                    if !up.head.contains(t) && !tail.contains(t) {
                        tail.push(*t);
                    }
                }
                let width = tail.len();
                let up_cols: Vec<usize> = (0..up.tail.len()).collect();
                let up_mix = up_mix.embed_tail(&up_cols, width);
                let sources = down
                    .tail
                    .iter()
                    .map(|t| match up.head.iter().position(|h| h == t) {
                        Some(i) => Ok(TailSource::Head(i)),
                        None => position_of(&tail, *t, "tail").map(TailSource::Tail),
                    })
                    .collect::<Result<Vec<_>>>()?;
                let out = MixtureOf::<LinearGaussian>::compose(
                    &up_mix,
                    &down_mix,
                    &up_pos,
                    &down_pos,
                    &out_dims,
                    &sources,
                    width,
                );
                let mut head = up.head.clone();
                head.extend(down.head.iter().copied());
                Ok(Self::rebuild(discrete, head, tail, Working::Hybrid(out), log_weight))
            }
        }
    }

    /// Sums or integrates out one variable. A variable the factor does not
    /// mention leaves it unchanged.
    pub fn marginalize(&self, var: TransientId) -> Result<Factor> {
        if let Some(p) = self.discrete_position(var) {
            let mut discrete = self.discrete.clone();
            discrete.remove(p);
            return match self.working()? {
                Working::Discrete(t) => Ok(Factor {
                    discrete,
                    head: Vec::new(),
                    tail: Vec::new(),
                    value: Distribution::Table(t.marginalize(p)),
                    log_weight: self.log_weight,
                }),
                Working::Hybrid(m) => {
                    let (out, weak) = m.marginalize_discrete(p)?;
                    if weak {
                        tracing::warn!("weak marginalization of {} merged unequal branches", var);
                    }
                    Ok(Self::rebuild(
                        discrete,
                        self.head.clone(),
                        self.tail.clone(),
                        Working::Hybrid(out),
                        self.log_weight,
                    ))
                }
            };
        }
        if self.head.contains(&var) {
            return self.drop_heads(&[var]);
        }
        if self.tail.contains(&var) {
            return Err(InferenceError::Structural(format!(
                "cannot integrate out conditioning variable {} of {}",
                var, self
            )));
        }
        Ok(self.clone())
    }

    fn drop_heads(&self, drop: &[TransientId]) -> Result<Factor> {
        let keep: Vec<usize> = (0..self.head.len())
            .filter(|&i| !drop.contains(&self.head[i]))
            .collect();
        if keep.len() == self.head.len() {
            return Ok(self.clone());
        }
        let head: Vec<TransientId> = keep.iter().map(|&i| self.head[i]).collect();
        match self.working()? {
            Working::Hybrid(m) => Ok(Self::rebuild(
                self.discrete.clone(),
                head,
                self.tail.clone(),
                Working::Hybrid(m.select_heads(&keep)),
                self.log_weight,
            )),
            Working::Discrete(_) => Err(InferenceError::Internal(format!(
                "factor {} lists heads but holds a discrete value",
                self
            ))),
        }
    }

    /// Marginal onto `keep`: continuous heads are integrated first, then
    /// discrete variables summed. Tail variables must be kept.
    pub fn marginalize_onto(&self, keep: &[TransientId]) -> Result<Factor> {
        if let Some(t) = self.tail.iter().find(|t| !keep.contains(t)) {
            return Err(InferenceError::Structural(format!(
                "marginal would integrate out conditioning variable {} of {}",
                t, self
            )));
        }
        let drop_heads: Vec<TransientId> = self
            .head
            .iter()
            .copied()
            .filter(|h| !keep.contains(h))
            .collect();
        let mut out = self.drop_heads(&drop_heads)?;
        let drop_discrete: Vec<TransientId> = self
            .discrete
            .iter()
            .map(|d| d.var)
            .filter(|v| !keep.contains(v))
            .collect();
        if out.is_discrete() && !drop_discrete.is_empty() {
            if let Working::Discrete(t) = out.working()? {
                let positions: Vec<usize> = (0..out.discrete.len())
                    .filter(|&i| keep.contains(&out.discrete[i].var))
                    .collect();
                let discrete = positions.iter().map(|&i| out.discrete[i]).collect();
                return Ok(Factor {
                    discrete,
                    head: Vec::new(),
                    tail: Vec::new(),
                    value: Distribution::Table(t.marginalize_onto(&positions)),
                    log_weight: out.log_weight,
                });
            }
        }
        for v in drop_discrete {
            out = out.marginalize(v)?;
        }
        Ok(out)
    }

    /// `self ÷ marginal`, where `marginal` is a marginal of `self`.
    ///
    /// Continuous heads of the marginal become tail variables of the result.
    pub fn complement(&self, marginal: &Factor) -> Result<Factor> {
        let mut positions = Vec::with_capacity(marginal.discrete.len());
        for d in &marginal.discrete {
            positions.push(self.discrete_position(d.var).ok_or_else(|| {
                InferenceError::Internal(format!(
                    "complement: {} is not a dimension of {}",
                    d.var, self
                ))
            })?);
        }
        let mut given = Vec::with_capacity(marginal.head.len());
        for h in &marginal.head {
            given.push(self.head.iter().position(|x| x == h).ok_or_else(|| {
                InferenceError::Internal(format!("complement: {} is not a head of {}", h, self))
            })?);
        }
        let log_weight = self.log_weight - marginal.log_weight;
        let marginal_weights = match marginal.working()? {
            Working::Discrete(t) => t,
            Working::Hybrid(m) => m.weights(),
        };
        match self.working()? {
            Working::Discrete(t) => Ok(Factor {
                discrete: self.discrete.clone(),
                head: Vec::new(),
                tail: Vec::new(),
                value: Distribution::Table(t.complement(&marginal_weights, &positions)),
                log_weight,
            }),
            Working::Hybrid(m) => {
                let out = m.complement(&marginal_weights, &positions, &given)?;
                let head: Vec<TransientId> = self
                    .head
                    .iter()
                    .copied()
                    .filter(|h| !marginal.head.contains(h))
                    .collect();
                let mut tail = self.tail.clone();
                tail.extend(marginal.head.iter().copied());
                Ok(Self::rebuild(
                    self.discrete.clone(),
                    head,
                    tail,
                    Working::Hybrid(out),
                    log_weight,
                ))
            }
        }
    }

    /// Folds an observation of `var` into the factor.
    ///
    /// Discrete evidence slices the layout. Continuous evidence on a tail
    /// variable is substituted; on a head variable it requires an empty tail
    /// and its likelihood is accumulated into the weight.
    pub fn set_evidence(&self, var: TransientId, value: Value) -> Result<Factor> {
        if let Some(p) = self.discrete_position(var) {
            let state = value.as_state().ok_or_else(|| {
                InferenceError::Configuration(format!(
                    "discrete variable {} observed with continuous value {}",
                    var, value
                ))
            })?;
            return self.set_discrete_evidence(p, state);
        }
        let is_tail = self.tail.contains(&var);
        let is_head = self.head.contains(&var);
        if !is_tail && !is_head {
            return Ok(self.clone());
        }
        let x = value.as_real().ok_or_else(|| {
            InferenceError::Configuration(format!(
                "continuous variable {} observed with discrete value {}",
                var, value
            ))
        })?;
        if is_tail {
            self.observe_tail(var, x)
        } else {
            self.observe_head(var, x)
        }
    }

    /// Applies several observations: tail substitutions first, then discrete
    /// slicing, then head observations.
    pub fn set_evidence_all(&self, evidence: &[(TransientId, Value)]) -> Result<Factor> {
        let mut out = self.clone();
        for (v, x) in evidence.iter().filter(|(v, _)| self.tail.contains(v)) {
            out = out.set_evidence(*v, *x)?;
        }
        let is_discrete = |v: &TransientId| self.discrete_position(*v).is_some();
        for (v, x) in evidence.iter().filter(|(v, _)| is_discrete(v)) {
            out = out.set_evidence(*v, *x)?;
        }
        for (v, x) in evidence.iter().filter(|(v, _)| self.head.contains(v)) {
            out = out.set_evidence(*v, *x)?;
        }
        Ok(out)
    }

    fn set_discrete_evidence(&self, p: usize, state: usize) -> Result<Factor> {
        let mut discrete = self.discrete.clone();
        discrete.remove(p);
        if let Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) = &self.value {
            if self.value.has_open_sigmoid() {
                if p + 1 == self.discrete.len() {
                    return Err(InferenceError::Unsupported(format!(
                        "observing the child of soft-max {} before its continuous parents",
                        self
                    )));
                }
                let selected = m.select(p, state)?;
                return Ok(Factor {
                    discrete,
                    head: Vec::new(),
                    tail: self.tail.clone(),
                    value: Distribution::Mixture(Mixture::MultinomialSigmoidMix(selected)),
                    log_weight: self.log_weight,
                });
            }
        }
        match self.working()? {
            Working::Discrete(t) => Ok(Factor {
                discrete,
                head: Vec::new(),
                tail: Vec::new(),
                value: Distribution::Table(t.set_evidence(p, state)?),
                log_weight: self.log_weight,
            }),
            Working::Hybrid(m) => Ok(Self::rebuild(
                discrete,
                self.head.clone(),
                self.tail.clone(),
                Working::Hybrid(m.select(p, state)?),
                self.log_weight,
            )),
        }
    }

    fn observe_tail(&self, var: TransientId, x: f64) -> Result<Factor> {
        let col = position_of(&self.tail, var, "tail")?;
        let mut tail = self.tail.clone();
        tail.remove(col);
        let value = match &self.value {
            Distribution::Sigmoid(s) => {
                let reduced = s.observe_parent(col, x);
                if reduced.parents() == 0 {
                    Distribution::Table(reduced.to_table()?)
                } else {
                    Distribution::Sigmoid(reduced)
                }
            }
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => {
                let reduced = m.observe_parent(col, x);
                if reduced.continuous_parents() == 0 {
                    Distribution::Table(reduced.to_table()?)
                } else {
                    Distribution::Mixture(Mixture::MultinomialSigmoidMix(reduced))
                }
            }
            _ => {
                let m = match self.working()? {
                    Working::Hybrid(m) => m,
                    Working::Discrete(_) => {
                        return Err(InferenceError::Internal(format!(
                            "factor {} lists a tail but holds a discrete value",
                            self
                        )));
                    }
                };
                return Ok(Self::rebuild(
                    self.discrete.clone(),
                    self.head.clone(),
                    tail,
                    Working::Hybrid(m.observe_tail(col, x)),
                    self.log_weight,
                ));
            }
        };
        Ok(Factor {
            discrete: self.discrete.clone(),
            head: self.head.clone(),
            tail,
            value,
            log_weight: self.log_weight,
        })
    }

    fn observe_head(&self, var: TransientId, x: f64) -> Result<Factor> {
        if !self.tail.is_empty() {
            return Err(InferenceError::Structural(format!(
                "evidence on {} needs an empty tail, {} still conditions on {:?}",
                var, self, self.tail
            )));
        }
        let h = position_of(&self.head, var, "head")?;
        let m = match self.working()? {
            Working::Hybrid(m) => m,
            Working::Discrete(_) => {
                return Err(InferenceError::Internal(format!(
                    "factor {} lists heads but holds a discrete value",
                    self
                )));
            }
        };
        let (out, log_scale) = m.observe_head(h, x)?;
        let mut head = self.head.clone();
        head.remove(h);
        Ok(Self::rebuild(
            self.discrete.clone(),
            head,
            Vec::new(),
            Working::Hybrid(out),
            self.log_weight + log_scale,
        ))
    }

    /// Appends a discrete dimension the factor does not depend on.
    pub fn extend(&self, dim: Dim) -> Result<Factor> {
        if self.contains(dim.var) {
            return Err(InferenceError::Internal(format!(
                "extend: {} already in {}",
                dim.var, self
            )));
        }
        let mut discrete = self.discrete.clone();
        discrete.push(dim);
        match self.working()? {
            Working::Discrete(t) => Ok(Factor {
                discrete,
                head: Vec::new(),
                tail: Vec::new(),
                value: Distribution::Table(t.extend(dim.card)),
                log_weight: self.log_weight,
            }),
            Working::Hybrid(m) => Ok(Self::rebuild(
                discrete,
                self.head.clone(),
                self.tail.clone(),
                Working::Hybrid(m.extend(dim.card)),
                self.log_weight,
            )),
        }
    }

    /// Log of the total mass, including the carried weight.
    pub fn log_mass(&self) -> Result<f64> {
        let sum = match self.working()? {
            Working::Discrete(t) => t.sum(),
            Working::Hybrid(m) => m.weights().sum(),
        };
        Ok(sum.ln() + self.log_weight)
    }

    /// Rescales the discrete mass to 1 and returns the previous log mass.
    /// An all-zero factor becomes uniform.
    pub fn normalize(&mut self) -> Result<f64> {
        let log_mass = self.log_mass()?;
        let working = match self.working()? {
            Working::Discrete(t) => Working::Discrete(t.normalized()),
            Working::Hybrid(m) => {
                let weights = m.weights().normalized();
                let (dims, branches, _) = m.into_parts();
                Working::Hybrid(MixtureOf::from_parts(dims, branches, Some(weights)))
            }
        };
        let (value, log_scale) = Distribution::from_working(working);
        self.value = value;
        self.log_weight = log_scale;
        Ok(log_mass)
    }

    pub fn normalized(&self) -> Result<Factor> {
        let mut out = self.clone();
        out.normalize()?;
        Ok(out)
    }

    /// The discrete value as a table, if the factor is purely discrete.
    pub fn table(&self) -> Option<Table> {
        match self.working() {
            Ok(Working::Discrete(t)) if self.is_discrete() => Some(t),
            _ => None,
        }
    }

    /// Mixing weights and per-configuration regressions of a hybrid factor.
    pub fn branches(&self) -> Option<MixtureOf<LinearGaussian>> {
        match self.working() {
            Ok(Working::Hybrid(m)) => Some(m),
            _ => None,
        }
    }
}

/// Position of `var` in a head or tail list.
fn position_of(vars: &[TransientId], var: TransientId, role: &str) -> Result<usize> {
    vars.iter()
        .position(|v| *v == var)
        .ok_or_else(|| InferenceError::Internal(format!("{} is not a {} variable", var, role)))
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Factor(d=[")?;
        for (i, d) in self.discrete.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", d.var, d.card)?;
        }
        write!(f, "], h={:?}, t={:?}) {}", self.head, self.tail, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{ConditionalTable, Gaussian};

    fn id(n: u32) -> TransientId {
        TransientId(n)
    }

    fn cpt(child: u32, parents: &[Dim], rows: Vec<Vec<f64>>) -> Factor {
        let dims: Vec<usize> = parents.iter().map(|d| d.card).collect();
        let states = rows[0].len();
        let c = ConditionalTable::new(dims, rows).expect("cpt");
        let cpd = Distribution::from(c);
        Factor::from_cpd(id(child), Some(states), parents, &[], &cpd).expect("factor")
    }

    #[test]
    fn combine_and_marginalize_discrete_chain() {
        let x = cpt(0, &[], vec![vec![0.3, 0.7]]);
        let rows = vec![vec![0.9, 0.1], vec![0.2, 0.8]];
        let y = cpt(1, &[Dim::new(id(0), 2)], rows);
        let joint = x.combine(&y).expect("combine");
        assert_eq!(joint.discrete().len(), 2);
        let py = joint.marginalize(id(0)).expect("marginalize");
        let t = py.table().expect("table");
        assert!((t.values()[0] - (0.27 + 0.14)).abs() < 1e-12);
    }

    #[test]
    fn evidence_then_normalize_gives_posterior() {
        let x = cpt(0, &[], vec![vec![0.3, 0.7]]);
        let rows = vec![vec![0.9, 0.1], vec![0.2, 0.8]];
        let y = cpt(1, &[Dim::new(id(0), 2)], rows);
        let mut post = x
            .combine(&y)
            .and_then(|j| j.set_evidence(id(1), Value::State(1)))
            .expect("evidence");
        let log_mass = post.normalize().expect("normalize");
        assert!((log_mass - 0.59f64.ln()).abs() < 1e-12);
        let t = post.table().expect("table");
        assert!((t.values()[0] - 0.03 / 0.59).abs() < 1e-12);
    }

    #[test]
    fn continuous_chain_composes_and_conditions() {
        let x = Factor::from_cpd(
            id(0),
            None,
            &[],
            &[],
            &Distribution::from(Gaussian::univariate(1.0, 2.0).expect("g")),
        )
        .expect("x");
        let y = Factor::from_cpd(
            id(1),
            None,
            &[],
            &[id(0)],
            &Distribution::from(LinearGaussian::univariate(3.0, vec![0.5], 1.0).expect("lg")),
        )
        .expect("y");
        assert!(matches!(
            y.set_evidence(id(1), Value::Real(4.5)),
            Err(InferenceError::Structural(_))
        ));
        let joint = y.combine(&x).expect("combine");
        assert_eq!(joint.head(), &[id(0), id(1)]);
        assert!(joint.tail().is_empty());
        let post = joint
            .set_evidence(id(1), Value::Real(4.5))
            .expect("evidence");
        let mean = post.value().expected_value().expect("mean");
        assert!((mean[0] - (1.0 + 1.0 / 1.5)).abs() < 1e-12);
    }

    #[test]
    fn complement_recombines_to_original() {
        let x = Factor::from_cpd(
            id(0),
            None,
            &[],
            &[],
            &Distribution::from(Gaussian::univariate(1.0, 2.0).expect("g")),
        )
        .expect("x");
        let y = Factor::from_cpd(
            id(1),
            None,
            &[],
            &[id(0)],
            &Distribution::from(LinearGaussian::univariate(3.0, vec![0.5], 1.0).expect("lg")),
        )
        .expect("y");
        let joint = x.combine(&y).expect("joint");
        let marginal = joint.marginalize_onto(&[id(1)]).expect("marginal");
        let residual = joint.complement(&marginal).expect("complement");
        assert_eq!(residual.tail(), &[id(1)]);
        let back = marginal.combine(&residual).expect("recombine");
        let a = back.branches().expect("hybrid");
        let b = joint.branches().expect("hybrid");
        // heads come back as [y, x]; compare the x/y blocks by position
        let ba = &a.branches()[0];
        let bb = &b.branches()[0];
        assert!((ba.offset()[0] - bb.offset()[1]).abs() < 1e-12);
        assert!((ba.covariance()[(0, 1)] - bb.covariance()[(0, 1)]).abs() < 1e-12);
        assert!((ba.covariance()[(1, 1)] - bb.covariance()[(0, 0)]).abs() < 1e-12);
    }

    #[test]
    fn hybrid_marginal_of_discrete_parent() {
        let d = cpt(0, &[], vec![vec![0.5, 0.5]]);
        let branches = MixtureOf::new(
            vec![2],
            vec![
                Gaussian::univariate(0.0, 1.0).expect("g"),
                Gaussian::univariate(2.0, 1.0).expect("g"),
            ],
            None,
        )
        .expect("mix");
        let x = Factor::from_cpd(
            id(1),
            None,
            &[Dim::new(id(0), 2)],
            &[],
            &Distribution::Mixture(Mixture::GaussianMix(branches)),
        )
        .expect("x");
        let joint = d.combine(&x).expect("joint");
        let pd = joint
            .set_evidence(id(1), Value::Real(2.0))
            .and_then(|f| f.normalized())
            .expect("posterior");
        let t = pd.table().expect("table");
        let expected = 1.0 / (1.0 + (-2.0f64).exp());
        assert!((t.values()[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn observing_an_absent_continuous_variable_is_an_internal_error() {
        let y = Factor::from_cpd(
            id(1),
            None,
            &[],
            &[id(0)],
            &Distribution::from(LinearGaussian::univariate(3.0, vec![0.5], 1.0).expect("lg")),
        )
        .expect("y");
        assert!(matches!(y.observe_tail(id(7), 1.0), Err(InferenceError::Internal(_))));
        let x = Factor::from_cpd(
            id(0),
            None,
            &[],
            &[],
            &Distribution::from(Gaussian::univariate(1.0, 2.0).expect("g")),
        )
        .expect("x");
        assert!(matches!(x.observe_head(id(7), 1.0), Err(InferenceError::Internal(_))));
        assert!(matches!(
            position_of(&[id(0), id(1)], id(2), "tail"),
            Err(InferenceError::Internal(_))
        ));
        assert_eq!(position_of(&[id(0), id(1)], id(1), "head").ok(), Some(1));
    }

    #[test]
    fn rejects_combining_shared_heads() {
        let g = Distribution::from(Gaussian::univariate(0.0, 1.0).expect("g"));
        let a = Factor::from_cpd(id(0), None, &[], &[], &g).expect("a");
        assert!(matches!(a.combine(&a), Err(InferenceError::Structural(_))));
    }
}
