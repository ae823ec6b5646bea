//! Constructor service for CPDs: defaults for a variable's parent signature,
//! and moving between plain forms and their mixture supersets.

use crate::distribution::conditional::ConditionalTable;
use crate::distribution::gaussian::Gaussian;
use crate::distribution::index;
use crate::distribution::linear_gaussian::LinearGaussian;
use crate::distribution::mixture::{Mixture, MixtureOf};
use crate::distribution::sigmoid::Sigmoid;
use crate::distribution::table::Table;
use crate::distribution::Distribution;
use crate::engine::errors::{InferenceError, Result};

/// Parent signature of a CPD: discrete parent cardinalities (canonical order)
/// and the number of continuous parents.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParentSignature {
    pub discrete: Vec<usize>,
    pub continuous: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DistributionFactory;

impl DistributionFactory {
    /// Default CPD for a child (`Some(states)` if discrete, `None` if
    /// continuous): uniform tables, zero-weight soft-max, standard normals.
    pub fn default_cpd(
        &self,
        child_states: Option<usize>,
        parents: &ParentSignature,
    ) -> Result<Distribution> {
        let configs = index::cardinality(&parents.discrete);
        let dims = parents.discrete.clone();
        Ok(match (child_states, parents.continuous) {
            (Some(states), 0) => {
                Distribution::ConditionalTable(ConditionalTable::uniform(dims, states))
            }
            (Some(states), m) if dims.is_empty() => {
                Distribution::Sigmoid(Sigmoid::uniform(states, m))
            }
            (Some(states), m) => {
                let branches = vec![Sigmoid::uniform(states, m); configs];
                let mix = MixtureOf::new(dims, branches, None)?;
                Distribution::Mixture(Mixture::MultinomialSigmoidMix(mix))
            }
            (None, 0) if dims.is_empty() => Distribution::Gaussian(Gaussian::univariate(0.0, 1.0)?),
            (None, 0) => {
                let branches = vec![Gaussian::univariate(0.0, 1.0)?; configs];
                let mix = MixtureOf::new(dims, branches, None)?;
                Distribution::Mixture(Mixture::GaussianMix(mix))
            }
            (None, m) if dims.is_empty() => {
                Distribution::LinearGaussian(LinearGaussian::univariate(0.0, vec![0.0; m], 1.0)?)
            }
            (None, m) => {
                let branches = vec![LinearGaussian::univariate(0.0, vec![0.0; m], 1.0)?; configs];
                let mix = MixtureOf::new(dims, branches, None)?;
                Distribution::Mixture(Mixture::LinearGaussianMix(mix))
            }
        })
    }

    /// Lifts a plain CPD to the mixture form over `parent_dims`, replicating
    /// it for every discrete parent configuration.
    pub fn upgrade(&self, dist: &Distribution, parent_dims: &[usize]) -> Result<Distribution> {
        let configs = index::cardinality(parent_dims);
        let dims = parent_dims.to_vec();
        Ok(match dist {
            Distribution::Gaussian(g) => {
                let mix = MixtureOf::new(dims, vec![g.clone(); configs], None)?;
                Distribution::Mixture(Mixture::GaussianMix(mix))
            }
            Distribution::LinearGaussian(l) => {
                let mix = MixtureOf::new(dims, vec![l.clone(); configs], None)?;
                Distribution::Mixture(Mixture::LinearGaussianMix(mix))
            }
            Distribution::Sigmoid(s) => {
                let mix = MixtureOf::new(dims, vec![s.clone(); configs], None)?;
                Distribution::Mixture(Mixture::MultinomialSigmoidMix(mix))
            }
            Distribution::ConditionalTable(c) if c.parent_dims().is_empty() => {
                let row: Vec<f64> = c.rows()[0].values().to_vec();
                Distribution::ConditionalTable(ConditionalTable::new(dims, vec![row; configs])?)
            }
            Distribution::Table(t) if t.dims().len() == 1 => {
                let row = t.normalized().values().to_vec();
                Distribution::ConditionalTable(ConditionalTable::new(dims, vec![row; configs])?)
            }
            Distribution::Mixture(_)
            | Distribution::ConditionalTable(_)
            | Distribution::Table(_) => {
                return Err(InferenceError::Configuration(format!(
                    "{} already has discrete parents and cannot be upgraded",
                    dist
                )));
            }
        })
    }

    /// Reduces a mixture with a single branch back to its plain form; other
    /// values are returned unchanged.
    pub fn downgrade(&self, dist: &Distribution) -> Distribution {
        match dist {
            Distribution::Mixture(m) if is_single_unweighted(m) => match m {
                Mixture::GaussianMix(g) => Distribution::Gaussian(g.branches()[0].clone()),
                Mixture::LinearGaussianMix(l) => {
                    let b = &l.branches()[0];
                    match b.to_gaussian() {
                        Some(g) => Distribution::Gaussian(g),
                        None => Distribution::LinearGaussian(b.clone()),
                    }
                }
                Mixture::MultinomialSigmoidMix(s) => Distribution::Sigmoid(s.branches()[0].clone()),
            },
            Distribution::ConditionalTable(c)
                if !c.parent_dims().is_empty() && c.parent_dims().iter().all(|&d| d == 1) =>
            {
                let row = c.rows()[0].values().to_vec();
                ConditionalTable::new(Vec::new(), vec![row])
                    .map(Distribution::ConditionalTable)
                    .unwrap_or_else(|_| dist.clone())
            }
            other => other.clone(),
        }
    }
}

fn is_single_unweighted(m: &Mixture) -> bool {
    m.branch_count() == 1 && m.mixing().map_or(true, is_unit)
}

fn is_unit(t: &Table) -> bool {
    t.values().iter().all(|v| (v - 1.0).abs() < 1e-12)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_cpd_picks_form_from_parent_signature() {
        let f = DistributionFactory;
        let sig = |discrete: Vec<usize>, continuous| ParentSignature {
            discrete,
            continuous,
        };
        assert!(matches!(
            f.default_cpd(Some(2), &sig(vec![3], 0)).expect("cpd"),
            Distribution::ConditionalTable(_)
        ));
        assert!(matches!(
            f.default_cpd(Some(2), &sig(vec![], 1)).expect("cpd"),
            Distribution::Sigmoid(_)
        ));
        assert!(matches!(
            f.default_cpd(Some(2), &sig(vec![2], 1)).expect("cpd"),
            Distribution::Mixture(Mixture::MultinomialSigmoidMix(_))
        ));
        assert!(matches!(
            f.default_cpd(None, &sig(vec![], 0)).expect("cpd"),
            Distribution::Gaussian(_)
        ));
        assert!(matches!(
            f.default_cpd(None, &sig(vec![2], 0)).expect("cpd"),
            Distribution::Mixture(Mixture::GaussianMix(_))
        ));
        assert!(matches!(
            f.default_cpd(None, &sig(vec![], 2)).expect("cpd"),
            Distribution::LinearGaussian(_)
        ));
        assert!(matches!(
            f.default_cpd(None, &sig(vec![2], 2)).expect("cpd"),
            Distribution::Mixture(Mixture::LinearGaussianMix(_))
        ));
    }

    #[test]
    fn upgrade_then_downgrade_restores_plain_form() {
        let f = DistributionFactory;
        let g = Distribution::Gaussian(Gaussian::univariate(1.0, 2.0).expect("g"));
        let up = f.upgrade(&g, &[3]).expect("upgrade");
        assert_eq!(up.discrete_dims(), vec![3]);
        assert_eq!(f.downgrade(&up), up);
        let single = f.upgrade(&g, &[]).expect("upgrade");
        assert_eq!(f.downgrade(&single), g);
    }

    #[test]
    fn upgrading_a_mixture_is_rejected() {
        let f = DistributionFactory;
        let g = Distribution::Gaussian(Gaussian::univariate(1.0, 2.0).expect("g"));
        let up = f.upgrade(&g, &[2]).expect("upgrade");
        assert!(f.upgrade(&up, &[2]).is_err());
    }
}
