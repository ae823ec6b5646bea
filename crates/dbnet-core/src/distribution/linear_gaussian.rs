//! Conditional linear Gaussian `head | tail ~ N(offset + B·tail, Σ)`.
//!
//! This is the working form of all continuous algebra: a plain Gaussian is a
//! linear Gaussian with zero tail columns. Positions here are purely
//! positional; mapping variables to rows/columns is the factor's job.

use std::fmt;

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::distribution::gaussian::{
    self, correlated_noise, gaussian_log_density, max_abs, max_abs_matrix, select_rows,
    spd_inverse, submatrix, Gaussian,
};
use crate::engine::errors::{InferenceError, Result};

/// Tolerance under which two regressions are considered identical.
const COLLAPSE_TOLERANCE: f64 = 1e-9;

/// Where a tail column of the downstream operand of [`LinearGaussian::compose`]
/// comes from in the composed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailSource {
    /// The column refers to head `i` of the upstream operand.
    Head(usize),
    /// The column refers to column `i` of the result's tail.
    Tail(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearGaussian {
    offset: DVector<f64>,
    coefficients: DMatrix<f64>,
    covariance: DMatrix<f64>,
}

impl LinearGaussian {
    /// `coefficients` is row-major `heads × tails`; `covariance` row-major `heads × heads`.
    pub fn new(
        offset: Vec<f64>,
        coefficients: Vec<f64>,
        tails: usize,
        covariance: Vec<f64>,
    ) -> Result<Self> {
        let n = offset.len();
        if coefficients.len() != n * tails {
            return Err(InferenceError::Configuration(format!(
                "linear Gaussian with {} heads and {} tails needs {} coefficients, got {}",
                n,
                tails,
                n * tails,
                coefficients.len()
            )));
        }
        if covariance.len() != n * n {
            return Err(InferenceError::Configuration(format!(
                "linear Gaussian covariance needs {} entries, got {}",
                n * n,
                covariance.len()
            )));
        }
        let covariance = DMatrix::from_row_slice(n, n, &covariance);
        gaussian::check_covariance(&covariance)?;
        Ok(Self {
            offset: DVector::from_vec(offset),
            coefficients: DMatrix::from_row_slice(n, tails, &coefficients),
            covariance,
        })
    }

    /// One head: `x = intercept + Σ weights_i · tail_i + N(0, variance)`.
    pub fn univariate(intercept: f64, weights: Vec<f64>, variance: f64) -> Result<Self> {
        let tails = weights.len();
        Self::new(vec![intercept], weights, tails, vec![variance])
    }

    /// A head-less regression (used for purely discrete mixture branches).
    pub(crate) fn empty(tails: usize) -> Self {
        Self {
            offset: DVector::zeros(0),
            coefficients: DMatrix::zeros(0, tails),
            covariance: DMatrix::zeros(0, 0),
        }
    }

    pub fn heads(&self) -> usize {
        self.offset.len()
    }

    pub fn tails(&self) -> usize {
        self.coefficients.ncols()
    }

    pub fn offset(&self) -> &DVector<f64> {
        &self.offset
    }

    pub fn coefficients(&self) -> &DMatrix<f64> {
        &self.coefficients
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn to_gaussian(&self) -> Option<Gaussian> {
        (self.tails() == 0)
            .then(|| Gaussian::from_parts(self.offset.clone(), self.covariance.clone()))
    }

    pub fn conditional_mean(&self, tail: &[f64]) -> Result<DVector<f64>> {
        if tail.len() != self.tails() {
            return Err(InferenceError::Internal(format!(
                "conditional_mean: expected {} tail values, got {}",
                self.tails(),
                tail.len()
            )));
        }
        let t = DVector::from_column_slice(tail);
        Ok(&self.offset + &self.coefficients * t)
    }

    pub fn log_density(&self, x: &[f64], tail: &[f64]) -> Result<f64> {
        let mean = self.conditional_mean(tail)?;
        if x.len() != self.heads() {
            return Err(InferenceError::Internal(format!(
                "log_density: expected {} head values, got {}",
                self.heads(),
                x.len()
            )));
        }
        let diff = DVector::from_fn(x.len(), |i, _| x[i] - mean[i]);
        gaussian_log_density(&diff, &self.covariance)
    }

    pub fn sample<R: Rng + ?Sized>(&self, tail: &[f64], rng: &mut R) -> Result<Vec<f64>> {
        let mean = self.conditional_mean(tail)?;
        let noise = correlated_noise(&self.covariance, rng)?;
        Ok((0..self.heads()).map(|i| mean[i] + noise[i]).collect())
    }

    /// Keeps only the listed heads (exact marginal over the dropped heads).
    pub fn select_heads(&self, keep: &[usize]) -> LinearGaussian {
        let all_cols: Vec<usize> = (0..self.tails()).collect();
        LinearGaussian {
            offset: select_rows(&self.offset, keep),
            coefficients: submatrix(&self.coefficients, keep, &all_cols),
            covariance: submatrix(&self.covariance, keep, keep),
        }
    }

    /// Re-expresses the tail in a wider tail space: column `j` moves to
    /// `positions[j]` of a tail of `width` columns; new columns are zero.
    pub fn embed_tail(&self, positions: &[usize], width: usize) -> LinearGaussian {
        debug_assert_eq!(positions.len(), self.tails());
        let mut coefficients = DMatrix::zeros(self.heads(), width);
        for (j, &p) in positions.iter().enumerate() {
            for i in 0..self.heads() {
                coefficients[(i, p)] += self.coefficients[(i, j)];
            }
        }
        LinearGaussian {
            offset: self.offset.clone(),
            coefficients,
            covariance: self.covariance.clone(),
        }
    }

    /// Substitutes an observed value for tail column `col`.
    pub fn observe_tail(&self, col: usize, value: f64) -> LinearGaussian {
        let offset = &self.offset + self.coefficients.column(col) * value;
        let keep: Vec<usize> = (0..self.tails()).filter(|&c| c != col).collect();
        let rows: Vec<usize> = (0..self.heads()).collect();
        LinearGaussian {
            offset,
            coefficients: submatrix(&self.coefficients, &rows, &keep),
            covariance: self.covariance.clone(),
        }
    }

    /// Fixes head `head` to `value`, returning the conditional over the other
    /// heads and the log-likelihood of the observation.
    ///
    /// Only defined when the tail is empty; a conditioning tail has to be
    /// eliminated by composition first.
    pub fn observe_head(&self, head: usize, value: f64) -> Result<(LinearGaussian, f64)> {
        if self.tails() != 0 {
            return Err(InferenceError::Structural(
                "evidence on a continuous head requires an empty tail".into(),
            ));
        }
        let var = self.covariance[(head, head)];
        if !(var > 0.0) || !var.is_finite() {
            return Err(InferenceError::Numerical(format!(
                "non-positive variance {} on observed dimension",
                var
            )));
        }
        let residual = value - self.offset[head];
        let log_lik = -0.5 * ((2.0 * std::f64::consts::PI * var).ln() + residual * residual / var);

        let rest: Vec<usize> = (0..self.heads()).filter(|&h| h != head).collect();
        let gain = DVector::from_fn(rest.len(), |i, _| self.covariance[(rest[i], head)] / var);
        let offset = DVector::from_fn(rest.len(), |i, _| self.offset[rest[i]] + gain[i] * residual);
        let covariance = DMatrix::from_fn(rest.len(), rest.len(), |i, j| {
            self.covariance[(rest[i], rest[j])] - gain[i] * self.covariance[(head, rest[j])]
        });
        Ok((
            LinearGaussian {
                offset,
                coefficients: DMatrix::zeros(rest.len(), 0),
                covariance: symmetrize(covariance),
            },
            log_lik,
        ))
    }

    /// Conditional of the remaining heads given heads `given`.
    ///
    /// The result's tail is the previous tail followed by `given` in order:
    /// `rest | tail, given ~ N(a_r − K a_g + (B_r − K B_g)·tail + K·given, Σ_rr − K Σ_gr)`
    /// with `K = Σ_rg Σ_gg⁻¹` (full Schur complement).
    pub fn condition_on(&self, given: &[usize]) -> Result<LinearGaussian> {
        let rest: Vec<usize> = (0..self.heads()).filter(|h| !given.contains(h)).collect();
        let cols: Vec<usize> = (0..self.tails()).collect();
        let sigma_gg = submatrix(&self.covariance, given, given);
        let sigma_rg = submatrix(&self.covariance, &rest, given);
        let sigma_gr = submatrix(&self.covariance, given, &rest);
        let gain = &sigma_rg * spd_inverse(&sigma_gg)?;

        let offset = select_rows(&self.offset, &rest) - &gain * select_rows(&self.offset, given);
        let b_r = submatrix(&self.coefficients, &rest, &cols);
        let b_g = submatrix(&self.coefficients, given, &cols);
        let b_tail = b_r - &gain * b_g;

        let width = self.tails() + given.len();
        let mut coefficients = DMatrix::zeros(rest.len(), width);
        for i in 0..rest.len() {
            for j in 0..self.tails() {
                coefficients[(i, j)] = b_tail[(i, j)];
            }
            for (k, _) in given.iter().enumerate() {
                coefficients[(i, self.tails() + k)] = gain[(i, k)];
            }
        }
        let covariance = submatrix(&self.covariance, &rest, &rest) - &gain * sigma_gr;
        Ok(LinearGaussian {
            offset,
            coefficients,
            covariance: symmetrize(covariance),
        })
    }

    /// Joint of an upstream regression `U | T` and a downstream one whose tail
    /// columns refer to `U` heads or to `T` columns (see [`TailSource`]).
    ///
    /// `up` must already be expressed over the full result tail (`width` columns).
    /// The result's heads are `up` heads followed by `down` heads.
    pub fn compose(
        up: &LinearGaussian,
        down: &LinearGaussian,
        sources: &[TailSource],
        width: usize,
    ) -> LinearGaussian {
        debug_assert_eq!(up.tails(), width);
        debug_assert_eq!(sources.len(), down.tails());
        let nu = up.heads();
        let nd = down.heads();

        let mut b_heads = DMatrix::zeros(nd, nu);
        let mut b_tail = DMatrix::zeros(nd, width);
        for (j, source) in sources.iter().enumerate() {
            for i in 0..nd {
                match *source {
                    TailSource::Head(h) => b_heads[(i, h)] += down.coefficients[(i, j)],
                    TailSource::Tail(c) => b_tail[(i, c)] += down.coefficients[(i, j)],
                }
            }
        }

        let down_offset = &down.offset + &b_heads * &up.offset;
        let down_coeffs = &b_heads * &up.coefficients + b_tail;
        let cross = &b_heads * &up.covariance;
        let down_cov = &cross * b_heads.transpose() + &down.covariance;

        let n = nu + nd;
        let mut offset = DVector::zeros(n);
        let mut coefficients = DMatrix::zeros(n, width);
        let mut covariance = DMatrix::zeros(n, n);
        for i in 0..nu {
            offset[i] = up.offset[i];
            for c in 0..width {
                coefficients[(i, c)] = up.coefficients[(i, c)];
            }
            for j in 0..nu {
                covariance[(i, j)] = up.covariance[(i, j)];
            }
        }
        for i in 0..nd {
            offset[nu + i] = down_offset[i];
            for c in 0..width {
                coefficients[(nu + i, c)] = down_coeffs[(i, c)];
            }
            for j in 0..nu {
                covariance[(nu + i, j)] = cross[(i, j)];
                covariance[(j, nu + i)] = cross[(i, j)];
            }
            for j in 0..nd {
                covariance[(nu + i, nu + j)] = down_cov[(i, j)];
            }
        }
        LinearGaussian {
            offset,
            coefficients,
            covariance: symmetrize(covariance),
        }
    }

    /// Moment-matching collapse of weighted regressions over the same heads.
    ///
    /// Exact in mean and covariance. With a non-empty tail the branches must
    /// share their coefficients, otherwise the mixture has no single
    /// conditional linear form.
    pub fn collapse(branches: &[(f64, &LinearGaussian)]) -> Result<LinearGaussian> {
        let (_, first) = branches.first().ok_or_else(|| {
            InferenceError::Internal("collapse called without branches".into())
        })?;
        let n = first.heads();
        let m = first.tails();
        if branches
            .iter()
            .any(|(_, b)| b.heads() != n || b.tails() != m)
        {
            return Err(InferenceError::Internal("collapse: branches disagree on shape".into()));
        }
        if m > 0
            && branches.iter().any(|(_, b)| {
                max_abs_matrix(&(&b.coefficients - &first.coefficients)) > COLLAPSE_TOLERANCE
            })
        {
            return Err(InferenceError::Structural(
                "cannot collapse a mixture whose branches regress differently on a continuous tail"
                    .into(),
            ));
        }

        let total: f64 = branches.iter().map(|(w, _)| *w).sum();
        let uniform = !(total > 0.0);
        let weight = |w: f64| {
            if uniform {
                1.0 / branches.len() as f64
            } else {
                w / total
            }
        };

        let mut offset = DVector::zeros(n);
        for (w, b) in branches {
            offset += &b.offset * weight(*w);
        }
        let mut covariance = DMatrix::zeros(n, n);
        for (w, b) in branches {
            let d = &b.offset - &offset;
            covariance += (&b.covariance + &d * d.transpose()) * weight(*w);
        }
        Ok(LinearGaussian {
            offset,
            coefficients: first.coefficients.clone(),
            covariance: symmetrize(covariance),
        })
    }

    pub fn approx_eq(&self, other: &LinearGaussian, tol: f64) -> bool {
        self.heads() == other.heads()
            && self.tails() == other.tails()
            && max_abs(&(&self.offset - &other.offset)) <= tol
            && max_abs_matrix(&(&self.coefficients - &other.coefficients)) <= tol
            && max_abs_matrix(&(&self.covariance - &other.covariance)) <= tol
    }
}

impl From<Gaussian> for LinearGaussian {
    fn from(g: Gaussian) -> Self {
        let n = g.dim();
        LinearGaussian {
            offset: g.mean().clone(),
            coefficients: DMatrix::zeros(n, 0),
            covariance: g.covariance().clone(),
        }
    }
}

impl fmt::Display for LinearGaussian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LG[{}|{}](a=[", self.heads(), self.tails())?;
        for (i, v) in self.offset.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", v)?;
        }
        write!(f, "])")
    }
}

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    let t = m.transpose();
    (m + t) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lg(offset: &[f64], coeffs: &[f64], tails: usize, cov: &[f64]) -> LinearGaussian {
        LinearGaussian::new(offset.to_vec(), coeffs.to_vec(), tails, cov.to_vec())
            .expect("valid linear gaussian")
    }

    #[test]
    fn compose_builds_joint_of_chain() {
        // X ~ N(1, 2); Y | X ~ N(3 + 0.5 X, 1)
        let x = lg(&[1.0], &[], 0, &[2.0]);
        let y = lg(&[3.0], &[0.5], 1, &[1.0]);
        let joint = LinearGaussian::compose(&x, &y, &[TailSource::Head(0)], 0);
        assert_eq!(joint.heads(), 2);
        assert!((joint.offset()[1] - 3.5).abs() < 1e-12);
        assert!((joint.covariance()[(1, 1)] - 1.5).abs() < 1e-12);
        assert!((joint.covariance()[(0, 1)] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn condition_on_inverts_compose() {
        let x = lg(&[1.0], &[], 0, &[2.0]);
        let y = lg(&[3.0], &[0.5], 1, &[1.0]);
        let joint = LinearGaussian::compose(&x, &y, &[TailSource::Head(0)], 0);
        let back = joint.condition_on(&[0]).expect("condition");
        assert!(back.approx_eq(&y, 1e-12));
    }

    #[test]
    fn observe_head_conditions_remaining_heads() {
        let x = lg(&[1.0], &[], 0, &[2.0]);
        let y = lg(&[3.0], &[0.5], 1, &[1.0]);
        let joint = LinearGaussian::compose(&x, &y, &[TailSource::Head(0)], 0);
        let (post, log_lik) = joint.observe_head(1, 4.5).expect("observe");
        // posterior of X given Y=4.5: mean 1 + (1/1.5)(4.5 - 3.5), var 2 - 1/1.5
        assert!((post.offset()[0] - (1.0 + 1.0 / 1.5)).abs() < 1e-12);
        assert!((post.covariance()[(0, 0)] - (2.0 - 1.0 / 1.5)).abs() < 1e-12);
        let expected = -0.5 * ((2.0 * std::f64::consts::PI * 1.5).ln() + 1.0 / 1.5);
        assert!((log_lik - expected).abs() < 1e-12);
    }

    #[test]
    fn observe_head_rejects_open_tail() {
        let y = lg(&[3.0], &[0.5], 1, &[1.0]);
        assert!(matches!(y.observe_head(0, 1.0), Err(InferenceError::Structural(_))));
    }

    #[test]
    fn observe_tail_substitutes_value() {
        let y = lg(&[3.0], &[0.5, 2.0], 2, &[1.0]);
        let r = y.observe_tail(1, 1.5);
        assert_eq!(r.tails(), 1);
        assert!((r.offset()[0] - 6.0).abs() < 1e-12);
        assert!((r.coefficients()[(0, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn collapse_matches_mixture_moments() {
        let a = lg(&[0.0], &[], 0, &[1.0]);
        let b = lg(&[2.0], &[], 0, &[1.0]);
        let c = LinearGaussian::collapse(&[(1.0, &a), (1.0, &b)]).expect("collapse");
        assert!((c.offset()[0] - 1.0).abs() < 1e-12);
        assert!((c.covariance()[(0, 0)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn collapse_refuses_differing_regressions() {
        let a = lg(&[0.0], &[1.0], 1, &[1.0]);
        let b = lg(&[0.0], &[2.0], 1, &[1.0]);
        assert!(LinearGaussian::collapse(&[(1.0, &a), (1.0, &b)]).is_err());
    }
}
