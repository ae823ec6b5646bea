//! Flattened-index arithmetic for discrete layouts.
//!
//! A layout `(d_0, .., d_{M-1})` is flattened row-major:
//! `index = Σ state_i · Π_{j>i} d_j`. Every table operation in the crate goes
//! through these helpers so that the ordering is identical everywhere.

use smallvec::SmallVec;

/// Inline state vector; most factors have only a handful of discrete dims.
pub type States = SmallVec<[usize; 8]>;

/// Number of configurations of a layout (1 for the empty layout).
#[inline]
pub fn cardinality(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Row-major strides of a layout.
pub fn strides(dims: &[usize]) -> States {
    let mut out: States = SmallVec::from_elem(0, dims.len());
    let mut acc = 1usize;
    for i in (0..dims.len()).rev() {
        out[i] = acc;
        acc *= dims[i];
    }
    out
}

/// Flattens a per-dimension state vector.
#[inline]
pub fn flat_index(states: &[usize], dims: &[usize]) -> usize {
    debug_assert_eq!(states.len(), dims.len());
    states
        .iter()
        .zip(dims.iter())
        .fold(0usize, |acc, (&s, &d)| acc * d + s)
}

/// Expands a flat index into per-dimension states.
pub fn unflatten(mut index: usize, dims: &[usize]) -> States {
    let mut out: States = SmallVec::from_elem(0, dims.len());
    for i in (0..dims.len()).rev() {
        let d = dims[i].max(1);
        out[i] = index % d;
        index /= d;
    }
    out
}

/// Advances `states` to the next configuration of `dims` (odometer order,
/// last dimension fastest). Returns `false` once all configurations are used.
#[inline]
pub fn advance(states: &mut [usize], dims: &[usize]) -> bool {
    for i in (0..dims.len()).rev() {
        states[i] += 1;
        if states[i] < dims[i] {
            return true;
        }
        states[i] = 0;
    }
    false
}

/// Maps out-layout configurations to the flat index of a sub-layout.
///
/// `positions[i]` is the out-layout position of the sub-layout's dim `i`.
#[derive(Debug, Clone)]
pub struct Projection {
    positions: States,
    strides: States,
}

impl Projection {
    pub fn new(positions: &[usize], sub_dims: &[usize]) -> Self {
        Self {
            positions: positions.iter().copied().collect(),
            strides: strides(sub_dims),
        }
    }

    /// Flat index in the sub-layout for an out-layout state vector.
    #[inline]
    pub fn index(&self, out_states: &[usize]) -> usize {
        self.positions
            .iter()
            .zip(self.strides.iter())
            .map(|(&p, &s)| out_states[p] * s)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_index_is_row_major() {
        let dims = [2, 3, 4];
        assert_eq!(flat_index(&[0, 0, 1], &dims), 1);
        assert_eq!(flat_index(&[0, 1, 0], &dims), 4);
        assert_eq!(flat_index(&[1, 0, 0], &dims), 12);
        assert_eq!(flat_index(&[1, 2, 3], &dims), 23);
    }

    #[test]
    fn unflatten_inverts_flat_index() {
        let dims = [3, 1, 2, 5];
        for idx in 0..cardinality(&dims) {
            let states = unflatten(idx, &dims);
            assert_eq!(flat_index(&states, &dims), idx);
        }
    }

    #[test]
    fn advance_visits_in_flat_order() {
        let dims = [2, 3];
        let mut states = [0usize, 0];
        let mut seen = vec![flat_index(&states, &dims)];
        while advance(&mut states, &dims) {
            seen.push(flat_index(&states, &dims));
        }
        assert_eq!(seen, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn projection_picks_sub_layout() {
        // out layout (a=2, b=3, c=2); sub layout (c, a)
        let proj = Projection::new(&[2, 0], &[2, 2]);
        assert_eq!(proj.index(&[1, 2, 0]), 1);
        assert_eq!(proj.index(&[0, 1, 1]), 2);
    }

    #[test]
    fn empty_layout_has_one_configuration() {
        assert_eq!(cardinality(&[]), 1);
        assert_eq!(flat_index(&[], &[]), 0);
        let mut states: [usize; 0] = [];
        assert!(!advance(&mut states, &[]));
    }
}
