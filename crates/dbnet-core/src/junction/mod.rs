//! Junction-tree machinery: clique templates, the structural solver,
//! per-slice trees, calibration and queries.

pub mod calibration;
pub mod clique;
pub mod query;
pub mod solver;
pub mod tree;

pub use clique::{Clique, CliqueGraph, CliqueSeparator, GraphVariable};
pub use solver::{StructuralSolver, TriangulationSolver};
pub use tree::{Forest, JunctionTree, NodeRef};

/// Template-level junction-tree state owned by a network: the clique
/// templates per offset and the trees of the last successful calibration.
#[derive(Debug, Clone)]
pub struct JunctionTreeTemplate {
    stale: bool,
    calibrated: bool,
    graphs: Vec<CliqueGraph>,
    forest: Forest,
    log_evidence: Option<f64>,
}

impl Default for JunctionTreeTemplate {
    fn default() -> Self {
        Self {
            stale: true,
            calibrated: false,
            graphs: Vec::new(),
            forest: Forest::default(),
            log_evidence: None,
        }
    }
}

impl JunctionTreeTemplate {
    /// Whether the clique templates must be rebuilt before the next run.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Clique templates, indexed by template offset.
    pub fn graphs(&self) -> &[CliqueGraph] {
        &self.graphs
    }

    /// Clique template used by slice `t`.
    pub fn graph_for_time(&self, t: usize) -> Option<&CliqueGraph> {
        if self.graphs.is_empty() {
            return None;
        }
        self.graphs.get(t.min(self.graphs.len() - 1))
    }

    /// Per-slice trees of the last calibration.
    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    /// `ln P(evidence)` reported by the last calibration.
    pub fn log_evidence(&self) -> Option<f64> {
        self.log_evidence
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
        self.invalidate();
    }

    /// Drops the calibrated trees but keeps the clique templates.
    pub(crate) fn invalidate(&mut self) {
        self.calibrated = false;
        self.forest = Forest::default();
        self.log_evidence = None;
    }

    pub(crate) fn set_graphs(&mut self, graphs: Vec<CliqueGraph>) {
        self.graphs = graphs;
        self.stale = false;
    }

    pub(crate) fn set_calibrated(&mut self, forest: Forest, log_evidence: f64) {
        self.forest = forest;
        self.log_evidence = Some(log_evidence);
        self.calibrated = true;
    }
}
