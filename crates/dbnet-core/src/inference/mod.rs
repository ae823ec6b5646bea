//! Inference algorithms over a [`DynamicNetwork`].
//!
//! Every algorithm takes the network by `&mut`: a run mutates the transient
//! cache (marginals, samples, temporary query tags), so at most one run may
//! be active per network.

pub mod config;
pub mod elimination;
pub mod gibbs;
pub mod junction_query;
pub mod progress;
pub mod registry;

pub use config::{GibbsConfig, InferenceProperties};
pub use elimination::VariableElimination;
pub use gibbs::GibbsSampler;
pub use junction_query::JunctionTreeQuery;
pub use progress::{CancellationToken, NullProgress, ProgressSink, TracingProgress, VecProgress};
pub use registry::AlgorithmRegistry;

use crate::engine::errors::Result;
use crate::engine::factor::Factor;
use crate::model::network::DynamicNetwork;

pub trait InferenceAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs inference on `network`.
    ///
    /// With `all_marginals`, the posterior marginal of every non-evidence
    /// variable is cached on the network (see [`DynamicNetwork::marginal`])
    /// and the joint over query variables is returned if any are tagged.
    /// Without it, the joint over query variables is returned and having
    /// none is a [`QueryStateError`](crate::engine::errors::QueryStateError).
    fn execute(
        &self,
        network: &mut DynamicNetwork,
        all_marginals: bool,
        properties: &InferenceProperties,
        progress: &mut dyn ProgressSink,
    ) -> Result<Option<Factor>>;
}
