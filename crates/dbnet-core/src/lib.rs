//! # dbnet Core
//!
//! Inference engine for hybrid (discrete and continuous) dynamic Bayesian
//! networks unrolled across time slices.

pub mod distribution;
pub mod engine;
pub mod inference;
pub mod junction;
pub mod model;

// Re-export commonly used types
pub use distribution::{Distribution, Value};
pub use engine::errors::{InferenceError, QueryStateError, Result};
pub use engine::factor::{Dim, Factor};
pub use inference::{AlgorithmRegistry, InferenceAlgorithm, InferenceProperties, ProgressSink};
pub use model::{DynamicNetwork, TransientId, VariableId, VariableKind};

/// Run the algorithm registered under `name` against `network`.
///
/// This is a convenience wrapper over [`AlgorithmRegistry::with_builtins`];
/// an unknown name is a configuration error.
pub fn infer(
    name: &str,
    network: &mut DynamicNetwork,
    all_marginals: bool,
    properties: &InferenceProperties,
    progress: &mut dyn ProgressSink,
) -> Result<Option<Factor>> {
    let algorithm = AlgorithmRegistry::with_builtins()
        .get(name)
        .ok_or_else(|| InferenceError::Configuration(format!("unknown algorithm '{}'", name)))?;
    tracing::debug!("running {} (all marginals: {})", name, all_marginals);
    algorithm.execute(network, all_marginals, properties, progress)
}
