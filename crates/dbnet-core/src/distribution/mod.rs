//! Distribution values and their algebra.
//!
//! [`Distribution`] is a closed tagged variant; every operation dispatches on
//! it with an exhaustive `match`, so adding a form is a compile-checked change.
//! Discrete layouts are row-major (see [`index`]).

pub mod conditional;
pub mod factory;
pub mod gaussian;
pub mod index;
pub mod linear_gaussian;
pub mod mixture;
pub mod sigmoid;
pub mod table;

use std::fmt;

use rand::Rng;

pub use conditional::ConditionalTable;
pub use factory::DistributionFactory;
pub use gaussian::Gaussian;
pub use linear_gaussian::{LinearGaussian, TailSource};
pub use mixture::{Mixture, MixtureOf};
pub use sigmoid::Sigmoid;
pub use table::Table;

use crate::engine::errors::{InferenceError, Result};

/// An observed or sampled value of a single variable.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    State(usize),
    Real(f64),
}

impl Value {
    pub fn as_state(&self) -> Option<usize> {
        match *self {
            Value::State(s) => Some(s),
            Value::Real(_) => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match *self {
            Value::Real(v) => Some(v),
            Value::State(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::State(s) => write!(f, "state {}", s),
            Value::Real(v) => write!(f, "{}", v),
        }
    }
}

/// A distribution value. Conceptually immutable: operations return new values.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Table(Table),
    Gaussian(Gaussian),
    Sigmoid(Sigmoid),
    ConditionalTable(ConditionalTable),
    LinearGaussian(LinearGaussian),
    Mixture(Mixture),
}

/// Working form used by the factor algebra.
#[derive(Debug, Clone)]
pub(crate) enum Working {
    Discrete(Table),
    /// Mixing weights are always materialized.
    Hybrid(MixtureOf<LinearGaussian>),
}

impl Distribution {
    /// Discrete layout of the value as a potential.
    pub fn discrete_dims(&self) -> Vec<usize> {
        match self {
            Distribution::Table(t) => t.dims().to_vec(),
            Distribution::ConditionalTable(c) => c.dims(),
            Distribution::Gaussian(_) | Distribution::LinearGaussian(_) => Vec::new(),
            Distribution::Sigmoid(s) => vec![s.states()],
            Distribution::Mixture(Mixture::GaussianMix(m)) => m.parent_dims().to_vec(),
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => m.parent_dims().to_vec(),
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => {
                let mut dims = m.parent_dims().to_vec();
                dims.push(m.states());
                dims
            }
        }
    }

    /// Number of continuous head dimensions.
    pub fn heads(&self) -> usize {
        match self {
            Distribution::Table(_)
            | Distribution::ConditionalTable(_)
            | Distribution::Sigmoid(_)
            | Distribution::Mixture(Mixture::MultinomialSigmoidMix(_)) => 0,
            Distribution::Gaussian(g) => g.dim(),
            Distribution::LinearGaussian(l) => l.heads(),
            Distribution::Mixture(Mixture::GaussianMix(m)) => {
                m.branches().first().map_or(0, Gaussian::dim)
            }
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => m.heads(),
        }
    }

    /// Number of continuous conditioning (tail) dimensions.
    pub fn tails(&self) -> usize {
        match self {
            Distribution::Table(_)
            | Distribution::ConditionalTable(_)
            | Distribution::Gaussian(_)
            | Distribution::Mixture(Mixture::GaussianMix(_)) => 0,
            Distribution::LinearGaussian(l) => l.tails(),
            Distribution::Sigmoid(s) => s.parents(),
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => m.tails(),
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => m.continuous_parents(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        self.heads() == 0 && self.tails() == 0
    }

    /// Soft-max forms whose continuous parents are still unobserved.
    pub fn has_open_sigmoid(&self) -> bool {
        match self {
            Distribution::Sigmoid(s) => s.parents() > 0,
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => m.continuous_parents() > 0,
            _ => false,
        }
    }

    /// Promotes to the working form of the factor algebra.
    pub(crate) fn to_working(&self) -> Result<Working> {
        Ok(match self {
            Distribution::Table(t) => Working::Discrete(t.clone()),
            Distribution::ConditionalTable(c) => Working::Discrete(c.to_table()),
            Distribution::Sigmoid(s) => Working::Discrete(s.to_table()?),
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => {
                Working::Discrete(m.to_table()?)
            }
            Distribution::Gaussian(g) => Working::Hybrid(MixtureOf::from_parts(
                Vec::new(),
                vec![LinearGaussian::from(g.clone())],
                Some(Table::scalar(1.0)),
            )),
            Distribution::LinearGaussian(l) => Working::Hybrid(MixtureOf::from_parts(
                Vec::new(),
                vec![l.clone()],
                Some(Table::scalar(1.0)),
            )),
            Distribution::Mixture(Mixture::GaussianMix(m)) => {
                let lg = m.map(|g| LinearGaussian::from(g.clone()));
                let weights = lg.weights();
                let (dims, branches, _) = lg.into_parts();
                Working::Hybrid(MixtureOf::from_parts(dims, branches, Some(weights)))
            }
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => {
                let weights = m.weights();
                Working::Hybrid(MixtureOf::from_parts(
                    m.parent_dims().to_vec(),
                    m.branches().to_vec(),
                    Some(weights),
                ))
            }
        })
    }

    /// Demotes a working value to its simplest form. A scalar weight that a
    /// plain form cannot carry is returned in log space.
    pub(crate) fn from_working(working: Working) -> (Distribution, f64) {
        match working {
            Working::Discrete(t) => (Distribution::Table(t), 0.0),
            Working::Hybrid(m) => {
                if m.parent_dims().is_empty() {
                    let w = m.weight(0);
                    let log_scale = if w > 0.0 { w.ln() } else { f64::NEG_INFINITY };
                    let (_, mut branches, _) = m.into_parts();
                    let branch = branches.pop().unwrap_or_else(|| LinearGaussian::empty(0));
                    let dist = match branch.to_gaussian() {
                        Some(g) => Distribution::Gaussian(g),
                        None => Distribution::LinearGaussian(branch),
                    };
                    return (dist, log_scale);
                }
                if m.tails() == 0 {
                    let gm = m.map(|b| {
                        Gaussian::from_parts(b.offset().clone(), b.covariance().clone())
                    });
                    (Distribution::Mixture(Mixture::GaussianMix(gm)), 0.0)
                } else {
                    (Distribution::Mixture(Mixture::LinearGaussianMix(m)), 0.0)
                }
            }
        }
    }

    /// Log of the potential at a full assignment: discrete states in layout
    /// order, head values, and tail values.
    pub fn log_probability(&self, discrete: &[usize], heads: &[f64], tails: &[f64]) -> Result<f64> {
        let dims = self.discrete_dims();
        if discrete.len() != dims.len() || discrete.iter().zip(&dims).any(|(s, d)| s >= d) {
            return Err(InferenceError::Internal(format!(
                "discrete assignment {:?} does not fit layout {:?}",
                discrete, dims
            )));
        }
        match self {
            Distribution::Table(t) => Ok(t.get(discrete).ln()),
            Distribution::ConditionalTable(c) => {
                let (child, parents) = split_child(discrete)?;
                Ok(c.probability(parents, child).ln())
            }
            Distribution::Gaussian(g) => g.log_density(heads),
            Distribution::LinearGaussian(l) => l.log_density(heads, tails),
            Distribution::Sigmoid(s) => s.log_probability(discrete[0], tails),
            Distribution::Mixture(Mixture::GaussianMix(m)) => {
                let flat = index::flat_index(discrete, m.parent_dims());
                Ok(m.weight(flat).ln() + m.branches()[flat].log_density(heads)?)
            }
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => {
                let flat = index::flat_index(discrete, m.parent_dims());
                Ok(m.weight(flat).ln() + m.branches()[flat].log_density(heads, tails)?)
            }
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => {
                let (child, parents) = split_child(discrete)?;
                let flat = index::flat_index(parents, m.parent_dims());
                Ok(m.weight(flat).ln() + m.branches()[flat].log_probability(child, tails)?)
            }
        }
    }

    /// Draws the child of a CPD given its parents' values.
    ///
    /// `discrete_parents` follows the CPD's discrete parent layout and
    /// `continuous_parents` its tail order.
    pub fn sample_cpd<R: Rng + ?Sized>(
        &self,
        discrete_parents: &[usize],
        continuous_parents: &[f64],
        rng: &mut R,
    ) -> Result<Value> {
        match self {
            Distribution::Table(t) => {
                let mut row = t.clone();
                for &s in discrete_parents {
                    row = row.set_evidence(0, s)?;
                }
                Ok(Value::State(row.sample(rng)?))
            }
            Distribution::ConditionalTable(c) => {
                Ok(Value::State(c.row(discrete_parents).sample(rng)?))
            }
            Distribution::Gaussian(g) => Ok(Value::Real(first(g.sample(rng)?)?)),
            Distribution::LinearGaussian(l) => {
                Ok(Value::Real(first(l.sample(continuous_parents, rng)?)?))
            }
            Distribution::Sigmoid(s) => Ok(Value::State(s.sample(continuous_parents, rng)?)),
            Distribution::Mixture(Mixture::GaussianMix(m)) => {
                Ok(Value::Real(first(m.branch(discrete_parents).sample(rng)?)?))
            }
            Distribution::Mixture(Mixture::LinearGaussianMix(m)) => Ok(Value::Real(first(
                m.branch(discrete_parents).sample(continuous_parents, rng)?,
            )?)),
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(m)) => Ok(Value::State(
                m.branch(discrete_parents).sample(continuous_parents, rng)?,
            )),
        }
    }

    /// Mean of a continuous value with no open tail.
    pub fn expected_value(&self) -> Result<Vec<f64>> {
        match self {
            Distribution::Gaussian(g) => Ok(g.expected_value()),
            Distribution::LinearGaussian(l) if l.tails() == 0 => {
                Ok(l.offset().iter().copied().collect())
            }
            Distribution::Mixture(Mixture::GaussianMix(m)) => Ok(m.expected_value()),
            other => Err(InferenceError::Unsupported(format!("expected value of {}", other))),
        }
    }

    /// Row-major covariance of a continuous value with no open tail.
    pub fn covariance(&self) -> Result<Vec<f64>> {
        match self {
            Distribution::Gaussian(g) => Ok(g.covariance().transpose().iter().copied().collect()),
            Distribution::LinearGaussian(l) if l.tails() == 0 => {
                Ok(l.covariance().transpose().iter().copied().collect())
            }
            Distribution::Mixture(Mixture::GaussianMix(m)) => Ok(m.covariance()),
            other => Err(InferenceError::Unsupported(format!("covariance of {}", other))),
        }
    }
}

fn split_child(discrete: &[usize]) -> Result<(usize, &[usize])> {
    discrete
        .split_last()
        .map(|(c, p)| (*c, p))
        .ok_or_else(|| InferenceError::Internal("conditional table without child state".into()))
}

fn first(values: Vec<f64>) -> Result<f64> {
    values
        .first()
        .copied()
        .ok_or_else(|| InferenceError::Internal("empty continuous sample".into()))
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Table(t) => fmt::Display::fmt(t, f),
            Distribution::Gaussian(g) => fmt::Display::fmt(g, f),
            Distribution::Sigmoid(s) => fmt::Display::fmt(s, f),
            Distribution::ConditionalTable(c) => fmt::Display::fmt(c, f),
            Distribution::LinearGaussian(l) => fmt::Display::fmt(l, f),
            Distribution::Mixture(m) => fmt::Display::fmt(m, f),
        }
    }
}

impl From<Table> for Distribution {
    fn from(t: Table) -> Self {
        Distribution::Table(t)
    }
}

impl From<Gaussian> for Distribution {
    fn from(g: Gaussian) -> Self {
        Distribution::Gaussian(g)
    }
}

impl From<ConditionalTable> for Distribution {
    fn from(c: ConditionalTable) -> Self {
        Distribution::ConditionalTable(c)
    }
}

impl From<LinearGaussian> for Distribution {
    fn from(l: LinearGaussian) -> Self {
        Distribution::LinearGaussian(l)
    }
}

impl From<Sigmoid> for Distribution {
    fn from(s: Sigmoid) -> Self {
        Distribution::Sigmoid(s)
    }
}

impl From<Mixture> for Distribution {
    fn from(m: Mixture) -> Self {
        Distribution::Mixture(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_follow_variant() {
        let cpt = ConditionalTable::uniform(vec![2, 3], 2);
        let d = Distribution::from(cpt);
        assert_eq!(d.discrete_dims(), vec![2, 3, 2]);
        assert!(d.is_discrete());

        let lg = LinearGaussian::univariate(0.0, vec![1.0, 2.0], 1.0).expect("lg");
        let d = Distribution::from(lg);
        assert_eq!((d.heads(), d.tails()), (1, 2));

        let s = Distribution::from(Sigmoid::uniform(3, 1));
        assert_eq!(d.discrete_dims(), Vec::<usize>::new());
        assert_eq!(s.discrete_dims(), vec![3]);
        assert!(s.has_open_sigmoid());
    }

    #[test]
    fn working_form_round_trips_plain_gaussian() {
        let g = Gaussian::univariate(2.0, 3.0).expect("gaussian");
        let w = Distribution::from(g.clone()).to_working().expect("working");
        let (back, log_scale) = Distribution::from_working(w);
        assert_eq!(log_scale, 0.0);
        assert_eq!(back, Distribution::Gaussian(g));
    }

    #[test]
    fn open_sigmoid_has_no_working_form() {
        let s = Distribution::from(Sigmoid::uniform(2, 1));
        assert!(matches!(s.to_working(), Err(InferenceError::Unsupported(_))));
    }

    #[test]
    fn log_probability_of_conditional_table() {
        let cpt = ConditionalTable::new(vec![2], vec![vec![0.9, 0.1], vec![0.2, 0.8]])
            .expect("cpt");
        let d = Distribution::from(cpt);
        let lp = d.log_probability(&[1, 1], &[], &[]).expect("lp");
        assert!((lp - 0.8f64.ln()).abs() < 1e-12);
        assert!(d.log_probability(&[2, 0], &[], &[]).is_err());
    }

    #[test]
    fn gaussian_mix_expected_value_uses_mixing() {
        let m = MixtureOf::new(
            vec![2],
            vec![
                Gaussian::univariate(0.0, 1.0).expect("g"),
                Gaussian::univariate(10.0, 1.0).expect("g"),
            ],
            Some(Table::new(vec![2], vec![0.9, 0.1]).expect("t")),
        )
        .expect("mix");
        let d = Distribution::from(Mixture::GaussianMix(m));
        let mean = d.expected_value().expect("mean");
        assert!((mean[0] - 1.0).abs() < 1e-12);
        let table = Distribution::from(Table::uniform(vec![2]));
        assert!(table.expected_value().is_err());
    }
}
