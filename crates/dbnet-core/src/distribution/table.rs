//! Discrete potential table of any dimensionality.

use std::fmt;

use rand::Rng;

use crate::distribution::index::{self, Projection, States};
use crate::engine::errors::{InferenceError, Result};

/// Non-negative potential over a row-major discrete layout.
///
/// The empty layout is a scalar table with exactly one value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Table {
    dims: Vec<usize>,
    values: Vec<f64>,
}

impl Table {
    pub fn new(dims: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        if dims.iter().any(|&d| d == 0) {
            return Err(InferenceError::Configuration(format!(
                "table dimension of size zero in {:?}",
                dims
            )));
        }
        let expected = index::cardinality(&dims);
        if values.len() != expected {
            return Err(InferenceError::Configuration(format!(
                "table over {:?} needs {} values, got {}",
                dims,
                expected,
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(InferenceError::Configuration(
                "table values must be finite and non-negative".into(),
            ));
        }
        Ok(Self { dims, values })
    }

    /// Table filled with ones (the neutral element of `combine`).
    pub fn ones(dims: Vec<usize>) -> Self {
        let len = index::cardinality(&dims);
        Self {
            dims,
            values: vec![1.0; len],
        }
    }

    pub fn uniform(dims: Vec<usize>) -> Self {
        let len = index::cardinality(&dims);
        Self {
            dims,
            values: vec![1.0 / len as f64; len],
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            values: vec![value],
        }
    }

    pub(crate) fn from_parts_unchecked(dims: Vec<usize>, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), index::cardinality(&dims));
        Self { dims, values }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, states: &[usize]) -> f64 {
        self.values[index::flat_index(states, &self.dims)]
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Pointwise product over the union layout `out_dims`.
    ///
    /// `self_positions[i]` / `other_positions[j]` give the out-layout position of
    /// each operand dimension, so operands with different variable orders merge
    /// without disturbing row-major ordering.
    pub fn combine(
        &self,
        other: &Table,
        self_positions: &[usize],
        other_positions: &[usize],
        out_dims: &[usize],
    ) -> Table {
        let left = Projection::new(self_positions, &self.dims);
        let right = Projection::new(other_positions, &other.dims);
        let mut values = Vec::with_capacity(index::cardinality(out_dims));
        let mut states: States = smallvec::smallvec![0; out_dims.len()];
        loop {
            values.push(self.values[left.index(&states)] * other.values[right.index(&states)]);
            if !index::advance(&mut states, out_dims) {
                break;
            }
        }
        Table::from_parts_unchecked(out_dims.to_vec(), values)
    }

    /// Sums out dimension `dim`.
    pub fn marginalize(&self, dim: usize) -> Table {
        let mut dims = self.dims.clone();
        dims.remove(dim);
        let mut values = vec![0.0; index::cardinality(&dims)];
        let positions: Vec<usize> = (0..self.dims.len()).filter(|&d| d != dim).collect();
        let proj = Projection::new(&positions, &dims);
        let mut states: States = smallvec::smallvec![0; self.dims.len()];
        for v in &self.values {
            values[proj.index(&states)] += v;
            index::advance(&mut states, &self.dims);
        }
        Table::from_parts_unchecked(dims, values)
    }

    /// Sums out every dimension not listed in `keep` (result keeps `keep` order).
    pub fn marginalize_onto(&self, keep: &[usize]) -> Table {
        let dims: Vec<usize> = keep.iter().map(|&d| self.dims[d]).collect();
        let mut values = vec![0.0; index::cardinality(&dims)];
        let proj = Projection::new(keep, &dims);
        let mut states: States = smallvec::smallvec![0; self.dims.len()];
        for v in &self.values {
            values[proj.index(&states)] += v;
            index::advance(&mut states, &self.dims);
        }
        Table::from_parts_unchecked(dims, values)
    }

    /// `self ÷ marginal`, where `marginal_positions[j]` is the dimension of `self`
    /// matching the marginal's dimension `j`. Division by zero yields zero.
    pub fn complement(&self, marginal: &Table, marginal_positions: &[usize]) -> Table {
        let proj = Projection::new(marginal_positions, &marginal.dims);
        let mut values = Vec::with_capacity(self.values.len());
        let mut states: States = smallvec::smallvec![0; self.dims.len()];
        for v in &self.values {
            let denom = marginal.values[proj.index(&states)];
            values.push(if denom > 0.0 { v / denom } else { 0.0 });
            index::advance(&mut states, &self.dims);
        }
        Table::from_parts_unchecked(self.dims.clone(), values)
    }

    /// Fixes dimension `dim` to `state`, returning the unnormalized slice.
    pub fn set_evidence(&self, dim: usize, state: usize) -> Result<Table> {
        let card = *self.dims.get(dim).ok_or_else(|| {
            InferenceError::Internal(format!("evidence on missing table dimension {}", dim))
        })?;
        if state >= card {
            return Err(InferenceError::Configuration(format!(
                "evidence state {} out of range for dimension of size {}",
                state, card
            )));
        }
        let mut dims = self.dims.clone();
        dims.remove(dim);
        let mut values = Vec::with_capacity(index::cardinality(&dims));
        let mut states: States = smallvec::smallvec![0; self.dims.len()];
        for v in &self.values {
            if states[dim] == state {
                values.push(*v);
            }
            index::advance(&mut states, &self.dims);
        }
        Ok(Table::from_parts_unchecked(dims, values))
    }

    /// Appends a neutral trailing dimension of size `card`.
    pub fn extend(&self, card: usize) -> Table {
        let mut dims = self.dims.clone();
        dims.push(card);
        let values = self
            .values
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(card))
            .collect();
        Table::from_parts_unchecked(dims, values)
    }

    /// Rescales to sum 1; an all-zero table becomes uniform.
    pub fn normalize(&mut self) {
        let total = self.sum();
        if total > 0.0 && total.is_finite() {
            for v in &mut self.values {
                *v /= total;
            }
        } else {
            let u = 1.0 / self.values.len() as f64;
            self.values.iter_mut().for_each(|v| *v = u);
        }
    }

    pub fn normalized(&self) -> Table {
        let mut out = self.clone();
        out.normalize();
        out
    }

    /// Draws a flat index proportionally to the table values.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<usize> {
        let total = self.sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(InferenceError::Numerical("cannot sample from an all-zero table".into()));
        }
        let mut target = rng.gen::<f64>() * total;
        for (i, v) in self.values.iter().enumerate() {
            if target < *v {
                return Ok(i);
            }
            target -= v;
        }
        // rounding can leave a sliver past the last non-zero entry
        Ok(self
            .values
            .iter()
            .rposition(|v| *v > 0.0)
            .unwrap_or(self.values.len() - 1))
    }

    /// Largest absolute difference to another table of the same layout.
    pub fn max_abs_diff(&self, other: &Table) -> f64 {
        if self.dims != other.dims {
            return f64::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Table{:?}[", self.dims)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.6}", v)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(dims: &[usize], values: &[f64]) -> Table {
        Table::new(dims.to_vec(), values.to_vec()).expect("valid table")
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(Table::new(vec![2, 2], vec![1.0; 3]).is_err());
        assert!(Table::new(vec![2, 0], vec![]).is_err());
    }

    #[test]
    fn combine_with_disjoint_dims_is_outer_product() {
        let a = table(&[2], &[0.2, 0.8]);
        let b = table(&[3], &[1.0, 2.0, 3.0]);
        let c = a.combine(&b, &[0], &[1], &[2, 3]);
        let expected = table(&[2, 3], &[0.2, 0.4, 0.6, 0.8, 1.6, 2.4]);
        assert!(c.max_abs_diff(&expected) < 1e-12, "{:?}", c.values());
    }

    #[test]
    fn combine_respects_reordered_operands() {
        // a over (X, Y), b over (Y, X): same variables in swapped order
        let a = table(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = table(&[3, 2], &[1.0, 10.0, 100.0, 1000.0, 1e4, 1e5]);
        let c = a.combine(&b, &[0, 1], &[1, 0], &[2, 3]);
        // c[x,y] = a[x,y] * b[y,x]
        assert_eq!(c.get(&[0, 0]), 1.0);
        assert_eq!(c.get(&[1, 0]), 4.0 * 10.0);
        assert_eq!(c.get(&[0, 2]), 3.0 * 1e4);
        assert_eq!(c.get(&[1, 2]), 6.0 * 1e5);
    }

    #[test]
    fn marginalize_sums_dimension() {
        let t = table(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(t.marginalize(1).values(), &[6.0, 15.0]);
        assert_eq!(t.marginalize(0).values(), &[5.0, 7.0, 9.0]);
        assert_eq!(t.marginalize_onto(&[1]).values(), &[5.0, 7.0, 9.0]);
    }

    #[test]
    fn set_evidence_returns_slice() {
        let t = table(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let s = t.set_evidence(0, 1).expect("evidence");
        assert_eq!(s.dims(), &[3]);
        assert_eq!(s.values(), &[4.0, 5.0, 6.0]);
        let s = t.set_evidence(1, 2).expect("evidence");
        assert_eq!(s.values(), &[3.0, 6.0]);
        assert!(t.set_evidence(1, 3).is_err());
    }

    #[test]
    fn complement_divides_by_marginal() {
        let t = table(&[2, 2], &[1.0, 3.0, 2.0, 0.0]);
        let m = t.marginalize(1);
        let c = t.complement(&m, &[0]);
        assert_eq!(c.values(), &[0.25, 0.75, 1.0, 0.0]);
    }

    #[test]
    fn normalize_maps_zero_to_uniform() {
        let mut t = table(&[4], &[0.0; 4]);
        t.normalize();
        assert_eq!(t.values(), &[0.25; 4]);
        let mut t = table(&[2], &[1.0, 3.0]);
        t.normalize();
        assert!((t.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn extend_replicates_values() {
        let t = table(&[2], &[0.4, 0.6]);
        let e = t.extend(2);
        assert_eq!(e.values(), &[0.4, 0.4, 0.6, 0.6]);
    }

    #[test]
    fn sample_never_picks_zero_entries() {
        let t = table(&[3], &[0.0, 1.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(t.sample(&mut rng).expect("sample"), 1);
        }
        assert!(table(&[2], &[0.0, 0.0]).sample(&mut rng).is_err());
    }
}
