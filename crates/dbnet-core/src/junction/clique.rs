//! Clique templates produced by the structural solver.
//!
//! Members are [`GraphVariable`]s: a template variable at a lag relative to
//! the slice being instantiated, so one template serves every absolute time
//! with the same template offset.

use std::fmt;

use crate::model::VariableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GraphVariable {
    pub variable: VariableId,
    pub lag: usize,
}

impl GraphVariable {
    pub fn new(variable: VariableId, lag: usize) -> Self {
        Self { variable, lag }
    }
}

impl fmt::Display for GraphVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lag == 0 {
            write!(f, "{}", self.variable)
        } else {
            write!(f, "{}[t-{}]", self.variable, self.lag)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clique {
    pub members: Vec<GraphVariable>,
    /// Contains every variable the previous slice hands over.
    pub backward_interface: bool,
    /// Contains every variable the next slice needs.
    pub forward_interface: bool,
}

impl Clique {
    pub fn contains(&self, v: &GraphVariable) -> bool {
        self.members.contains(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliqueSeparator {
    pub a: usize,
    pub b: usize,
    pub members: Vec<GraphVariable>,
}

/// Cliques and separators of one template offset.
#[derive(Debug, Clone, PartialEq)]
pub struct CliqueGraph {
    pub offset: usize,
    pub cliques: Vec<Clique>,
    pub separators: Vec<CliqueSeparator>,
    /// Past variables this offset receives from the previous slice.
    pub incoming: Vec<GraphVariable>,
    /// Variables of this offset the next slice receives (lags relative to this slice).
    pub outgoing: Vec<GraphVariable>,
}

impl CliqueGraph {
    pub fn backward_interface(&self) -> Option<usize> {
        self.cliques.iter().position(|c| c.backward_interface)
    }

    pub fn forward_interface(&self) -> Option<usize> {
        self.cliques.iter().position(|c| c.forward_interface)
    }

    /// Neighbours of clique `c` with the separator index joining them.
    pub fn neighbours(&self, c: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.separators
            .iter()
            .enumerate()
            .filter_map(move |(i, s)| {
                if s.a == c {
                    Some((s.b, i))
                } else if s.b == c {
                    Some((s.a, i))
                } else {
                    None
                }
            })
    }
}
