//! The dynamic network model.
//!
//! Template variables live for the model's lifetime; transient variables
//! (their per-time instantiations) are cached and regenerated wholesale on
//! any structural, CPD or evidence-policy change.

pub mod events;
pub mod network;
pub mod template;
pub mod transient;

use std::fmt;

pub use events::{EventLog, ModelEvent, ModelObserver};
pub use network::{DynamicNetwork, ParameterLearner, SharedNetwork, StateSnapshot};
pub use template::{TemplateVariable, VariableKind};
pub use transient::{NodeKind, TransientGraph, TransientVariable};

/// Stable id of a template variable. Ids are handed out in creation order,
/// which is the canonical order for parent lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VariableId(pub u32);

impl VariableId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Id of a transient variable in the unrolled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransientId(pub u32);

impl TransientId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TransientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
