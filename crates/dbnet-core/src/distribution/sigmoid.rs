//! Soft-max ("multinomial sigmoid") distribution of a discrete child over
//! continuous parents: `P(child = s | x) ∝ exp(bias_s + weights_s · x)`.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::distribution::table::Table;
use crate::engine::errors::{InferenceError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Sigmoid {
    bias: DVector<f64>,
    weights: DMatrix<f64>,
}

impl Sigmoid {
    /// `weights` is row-major `states × parents`.
    pub fn new(bias: Vec<f64>, weights: Vec<f64>, parents: usize) -> Result<Self> {
        let states = bias.len();
        if states < 2 {
            return Err(InferenceError::Configuration(
                "a sigmoid needs at least two child states".into(),
            ));
        }
        if weights.len() != states * parents {
            return Err(InferenceError::Configuration(format!(
                "sigmoid with {} states over {} parents needs {} weights, got {}",
                states,
                parents,
                states * parents,
                weights.len()
            )));
        }
        if bias.iter().chain(weights.iter()).any(|w| !w.is_finite()) {
            return Err(InferenceError::Configuration("sigmoid parameters must be finite".into()));
        }
        Ok(Self {
            bias: DVector::from_vec(bias),
            weights: DMatrix::from_row_slice(states, parents, &weights),
        })
    }

    /// Uniform over `states`, ignoring its `parents`.
    pub fn uniform(states: usize, parents: usize) -> Self {
        Self {
            bias: DVector::zeros(states),
            weights: DMatrix::zeros(states, parents),
        }
    }

    pub fn states(&self) -> usize {
        self.bias.len()
    }

    pub fn parents(&self) -> usize {
        self.weights.ncols()
    }

    pub fn bias(&self) -> &DVector<f64> {
        &self.bias
    }

    pub fn weights(&self) -> &DMatrix<f64> {
        &self.weights
    }

    /// Child-state probabilities for the given parent values.
    pub fn probabilities(&self, parents: &[f64]) -> Result<Vec<f64>> {
        if parents.len() != self.parents() {
            return Err(InferenceError::Internal(format!(
                "sigmoid expects {} parent values, got {}",
                self.parents(),
                parents.len()
            )));
        }
        let x = DVector::from_column_slice(parents);
        let logits = &self.bias + &self.weights * x;
        let max = logits.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let z: f64 = exp.iter().sum();
        Ok(exp.into_iter().map(|e| e / z).collect())
    }

    pub fn log_probability(&self, state: usize, parents: &[f64]) -> Result<f64> {
        let p = self.probabilities(parents)?;
        p.get(state).map(|v| v.ln()).ok_or_else(|| {
            InferenceError::Internal(format!("sigmoid state {} out of range", state))
        })
    }

    pub fn sample<R: Rng + ?Sized>(&self, parents: &[f64], rng: &mut R) -> Result<usize> {
        let probs = Table::from_parts_unchecked(vec![self.states()], self.probabilities(parents)?);
        probs.sample(rng)
    }

    /// Substitutes an observed value for parent column `col`.
    pub fn observe_parent(&self, col: usize, value: f64) -> Sigmoid {
        let bias = &self.bias + self.weights.column(col) * value;
        let keep: Vec<usize> = (0..self.parents()).filter(|&c| c != col).collect();
        let weights =
            DMatrix::from_fn(self.states(), keep.len(), |i, j| self.weights[(i, keep[j])]);
        Sigmoid { bias, weights }
    }

    /// The child distribution once every parent has been observed.
    pub fn to_table(&self) -> Result<Table> {
        if self.parents() != 0 {
            return Err(InferenceError::Unsupported(format!(
                "soft-max over {} unobserved continuous parents has no exact table form",
                self.parents()
            )));
        }
        Ok(Table::from_parts_unchecked(vec![self.states()], self.probabilities(&[])?))
    }
}

impl fmt::Display for Sigmoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sigmoid[{} states, {} parents]",
            self.states(),
            self.parents()
        )
    }
}
