//! Multivariate Gaussian in moment form (mean + covariance).
//!
//! Each dimension is one univariate continuous variable. Plain Gaussians never
//! take part in `combine`/`complement` directly; the factor algebra promotes
//! them to [`LinearGaussian`](super::linear_gaussian::LinearGaussian) with an
//! empty tail first.

use std::f64::consts::PI;
use std::fmt;

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::engine::errors::{InferenceError, Result};

/// Relative tolerance used when checking covariance symmetry.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian {
    mean: DVector<f64>,
    covariance: DMatrix<f64>,
}

impl Gaussian {
    /// Builds a Gaussian from a mean vector and a row-major covariance.
    pub fn new(mean: Vec<f64>, covariance: Vec<f64>) -> Result<Self> {
        let n = mean.len();
        if covariance.len() != n * n {
            return Err(InferenceError::Configuration(format!(
                "covariance of a {}-dimensional Gaussian needs {} entries, got {}",
                n,
                n * n,
                covariance.len()
            )));
        }
        let covariance = DMatrix::from_row_slice(n, n, &covariance);
        check_covariance(&covariance)?;
        Ok(Self {
            mean: DVector::from_vec(mean),
            covariance,
        })
    }

    pub fn univariate(mean: f64, variance: f64) -> Result<Self> {
        Self::new(vec![mean], vec![variance])
    }

    pub(crate) fn from_parts(mean: DVector<f64>, covariance: DMatrix<f64>) -> Self {
        Self { mean, covariance }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    /// Expected value of the vector.
    pub fn expected_value(&self) -> Vec<f64> {
        self.mean.iter().copied().collect()
    }

    /// Variance of dimension `dim`.
    pub fn variance(&self, dim: usize) -> f64 {
        self.covariance[(dim, dim)]
    }

    /// Drops dimension `dim` from mean and covariance.
    ///
    /// For a joint moment-form Gaussian this is the exact marginal; no Schur
    /// complement is involved because nothing is being conditioned on.
    pub fn marginalize(&self, dim: usize) -> Gaussian {
        let keep: Vec<usize> = (0..self.dim()).filter(|&d| d != dim).collect();
        Gaussian {
            mean: select_rows(&self.mean, &keep),
            covariance: submatrix(&self.covariance, &keep, &keep),
        }
    }

    pub fn log_density(&self, x: &[f64]) -> Result<f64> {
        if x.len() != self.dim() {
            return Err(InferenceError::Internal(format!(
                "log_density: expected {} values, got {}",
                self.dim(),
                x.len()
            )));
        }
        let diff = DVector::from_fn(self.dim(), |i, _| x[i] - self.mean[i]);
        gaussian_log_density(&diff, &self.covariance)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let noise = correlated_noise(&self.covariance, rng)?;
        Ok((0..self.dim()).map(|i| self.mean[i] + noise[i]).collect())
    }

    pub fn approx_eq(&self, other: &Gaussian, tol: f64) -> bool {
        self.dim() == other.dim()
            && max_abs(&(&self.mean - &other.mean)) <= tol
            && max_abs_matrix(&(&self.covariance - &other.covariance)) <= tol
    }
}

impl fmt::Display for Gaussian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N(mean=[")?;
        for (i, m) in self.mean.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", m)?;
        }
        write!(f, "], var=[")?;
        for i in 0..self.dim() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", self.covariance[(i, i)])?;
        }
        write!(f, "])")
    }
}

pub(crate) fn check_covariance(cov: &DMatrix<f64>) -> Result<()> {
    let n = cov.nrows();
    if cov.ncols() != n {
        return Err(InferenceError::Configuration("covariance matrix must be square".into()));
    }
    for i in 0..n {
        if !(cov[(i, i)] > 0.0) || !cov[(i, i)].is_finite() {
            return Err(InferenceError::Numerical(format!(
                "covariance diagonal entry {} is not positive: {}",
                i,
                cov[(i, i)]
            )));
        }
        for j in 0..i {
            let scale = cov[(i, j)].abs().max(cov[(j, i)].abs()).max(1.0);
            if (cov[(i, j)] - cov[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(InferenceError::Configuration(
                    "covariance matrix must be symmetric".into(),
                ));
            }
        }
    }
    Ok(())
}

/// `m[rows, cols]` as a new matrix.
pub(crate) fn submatrix(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

pub(crate) fn select_rows(v: &DVector<f64>, rows: &[usize]) -> DVector<f64> {
    DVector::from_fn(rows.len(), |i, _| v[rows[i]])
}

/// Inverse of a symmetric positive-definite matrix.
pub(crate) fn spd_inverse(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if m.nrows() == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    m.clone()
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| InferenceError::Numerical("covariance is not positive definite".into()))
}

/// Log density of `diff ~ N(0, cov)`.
pub(crate) fn gaussian_log_density(diff: &DVector<f64>, cov: &DMatrix<f64>) -> Result<f64> {
    let n = diff.len();
    if n == 0 {
        return Ok(0.0);
    }
    let chol = cov
        .clone()
        .cholesky()
        .ok_or_else(|| InferenceError::Numerical("covariance is not positive definite".into()))?;
    let l = chol.l();
    let log_det: f64 = 2.0 * (0..n).map(|i| l[(i, i)].ln()).sum::<f64>();
    let solved = chol.solve(diff);
    let quad = diff.dot(&solved);
    Ok(-0.5 * (n as f64 * (2.0 * PI).ln() + log_det + quad))
}

/// Draws `L z` with `L Lᵀ = cov` and `z` standard normal.
pub(crate) fn correlated_noise<R: Rng + ?Sized>(
    cov: &DMatrix<f64>,
    rng: &mut R,
) -> Result<DVector<f64>> {
    let n = cov.nrows();
    if n == 0 {
        return Ok(DVector::zeros(0));
    }
    let chol = cov
        .clone()
        .cholesky()
        .ok_or_else(|| InferenceError::Numerical("covariance is not positive definite".into()))?;
    let z = DVector::from_fn(n, |_, _| standard_normal(&mut *rng));
    Ok(chol.l() * z)
}

/// Box–Muller draw from N(0, 1).
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

pub(crate) fn max_abs(v: &DVector<f64>) -> f64 {
    v.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

pub(crate) fn max_abs_matrix(m: &DMatrix<f64>) -> f64 {
    m.iter().fold(0.0, |acc, x| acc.max(x.abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn new_validates_shape_and_diagonal() {
        assert!(Gaussian::new(vec![0.0, 0.0], vec![1.0, 0.0, 0.0]).is_err());
        assert!(Gaussian::new(vec![0.0], vec![0.0]).is_err());
        assert!(Gaussian::new(vec![0.0, 0.0], vec![1.0, 0.5, 0.4, 1.0]).is_err());
        assert!(Gaussian::new(vec![0.0, 0.0], vec![1.0, 0.5, 0.5, 1.0]).is_ok());
    }

    #[test]
    fn marginalize_drops_dimension() {
        let g = Gaussian::new(vec![1.0, 2.0], vec![2.0, 0.5, 0.5, 3.0]).expect("gaussian");
        let m = g.marginalize(0);
        assert_eq!(m.dim(), 1);
        assert_eq!(m.mean()[0], 2.0);
        assert_eq!(m.variance(0), 3.0);
    }

    #[test]
    fn univariate_log_density_matches_closed_form() {
        let g = Gaussian::univariate(1.0, 4.0).expect("gaussian");
        let expected = -0.5 * ((2.0 * PI * 4.0).ln() + 0.25);
        let got = g.log_density(&[2.0]).expect("density");
        assert!((got - expected).abs() < 1e-12);
    }

    #[test]
    fn samples_have_expected_moments() {
        let g = Gaussian::univariate(3.0, 0.25).expect("gaussian");
        let mut rng = StdRng::seed_from_u64(11);
        let draws: Vec<f64> = (0..20_000)
            .map(|_| g.sample(&mut rng).expect("sample")[0])
            .collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / draws.len() as f64;
        assert!((mean - 3.0).abs() < 0.02);
        assert!((var - 0.25).abs() < 0.02);
    }
}
