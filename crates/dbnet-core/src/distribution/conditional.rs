//! Conditional probability table of a discrete child: one child distribution
//! per configuration of the discrete parents.

use std::fmt;

use crate::distribution::index;
use crate::distribution::table::Table;
use crate::engine::errors::{InferenceError, Result};

/// Rows that sum to 1 within this tolerance are accepted as distributions.
const ROW_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalTable {
    parent_dims: Vec<usize>,
    states: usize,
    rows: Vec<Table>,
}

impl ConditionalTable {
    /// One row per flattened parent configuration; each row is the child
    /// distribution for that configuration.
    pub fn new(parent_dims: Vec<usize>, rows: Vec<Vec<f64>>) -> Result<Self> {
        let expected = index::cardinality(&parent_dims);
        if rows.len() != expected {
            return Err(InferenceError::Configuration(format!(
                "conditional table over parents {:?} needs {} rows, got {}",
                parent_dims,
                expected,
                rows.len()
            )));
        }
        let states = rows.first().map(Vec::len).unwrap_or(0);
        if states == 0 {
            return Err(InferenceError::Configuration(
                "conditional table rows must not be empty".into(),
            ));
        }
        let mut tables = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != states {
                return Err(InferenceError::Configuration(format!(
                    "conditional table row {} has {} entries, expected {}",
                    i,
                    row.len(),
                    states
                )));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_TOLERANCE {
                return Err(InferenceError::Configuration(format!(
                    "conditional table row {} sums to {}, not 1",
                    i, sum
                )));
            }
            tables.push(Table::new(vec![states], row)?);
        }
        Ok(Self {
            parent_dims,
            states,
            rows: tables,
        })
    }

    /// Uniform child distribution for every parent configuration.
    pub fn uniform(parent_dims: Vec<usize>, states: usize) -> Self {
        let rows = (0..index::cardinality(&parent_dims))
            .map(|_| Table::uniform(vec![states]))
            .collect();
        Self {
            parent_dims,
            states,
            rows,
        }
    }

    pub fn parent_dims(&self) -> &[usize] {
        &self.parent_dims
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn row(&self, parent_states: &[usize]) -> &Table {
        &self.rows[index::flat_index(parent_states, &self.parent_dims)]
    }

    pub fn rows(&self) -> &[Table] {
        &self.rows
    }

    /// Layout of the equivalent joint table: parents, then the child.
    pub fn dims(&self) -> Vec<usize> {
        let mut dims = self.parent_dims.clone();
        dims.push(self.states);
        dims
    }

    pub fn to_table(&self) -> Table {
        let values = self
            .rows
            .iter()
            .flat_map(|r| r.values().iter().copied())
            .collect();
        Table::from_parts_unchecked(self.dims(), values)
    }

    pub fn probability(&self, parent_states: &[usize], state: usize) -> f64 {
        self.row(parent_states).values()[state]
    }
}

impl fmt::Display for ConditionalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPT{:?}->{}", self.parent_dims, self.states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattening_puts_child_last() {
        let cpt = ConditionalTable::new(vec![2], vec![vec![0.9, 0.1], vec![0.2, 0.8]])
            .expect("cpt");
        let t = cpt.to_table();
        assert_eq!(t.dims(), &[2, 2]);
        assert_eq!(t.get(&[1, 0]), 0.2);
        assert_eq!(cpt.probability(&[0], 1), 0.1);
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(ConditionalTable::new(vec![2], vec![vec![0.5, 0.5]]).is_err());
        assert!(ConditionalTable::new(vec![2], vec![vec![0.5, 0.5], vec![0.5]]).is_err());
        assert!(ConditionalTable::new(vec![1], vec![vec![0.5, 0.6]]).is_err());
    }

    #[test]
    fn root_table_has_single_row() {
        let cpt = ConditionalTable::new(vec![], vec![vec![0.3, 0.7]]).expect("cpt");
        assert_eq!(cpt.to_table().dims(), &[2]);
    }
}
