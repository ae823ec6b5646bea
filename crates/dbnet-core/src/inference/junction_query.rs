//! Junction-tree query: calibrate, then read marginals and the query joint
//! off the calibrated forest.

use crate::engine::errors::{InferenceError, QueryStateError, Result};
use crate::engine::factor::Factor;
use crate::inference::config::InferenceProperties;
use crate::inference::progress::ProgressSink;
use crate::inference::InferenceAlgorithm;
use crate::junction::calibration::calibrate;
use crate::junction::query::{all_marginals, joint_query};
use crate::model::network::DynamicNetwork;

#[derive(Debug, Clone, Copy, Default)]
pub struct JunctionTreeQuery;

impl JunctionTreeQuery {
    fn answer(
        network: &mut DynamicNetwork,
        marginals: bool,
        progress: &mut dyn ProgressSink,
    ) -> Result<Option<Factor>> {
        let (found, joint) = {
            let forest = network.junction_tree_template().forest();
            let graph = network
                .transient_graph()
                .ok_or_else(|| InferenceError::Internal("transient graph missing".into()))?;
            let found = if marginals {
                all_marginals(forest, graph)?
            } else {
                Vec::new()
            };
            let joint = match joint_query(forest, graph) {
                Ok(f) => Some(f),
                Err(InferenceError::Query(QueryStateError::NoQueryVariables)) if marginals => None,
                Err(e) => return Err(e),
            };
            (found, joint)
        };
        if marginals {
            progress.line(&format!("{} marginal(s) computed", found.len()));
            if let Some(graph) = network.transient_graph_mut() {
                for (id, m) in found {
                    graph.set_marginal(id, m);
                }
            }
        }
        Ok(joint)
    }
}

impl InferenceAlgorithm for JunctionTreeQuery {
    fn name(&self) -> &'static str {
        "junction-tree"
    }

    fn execute(
        &self,
        network: &mut DynamicNetwork,
        all_marginals: bool,
        properties: &InferenceProperties,
        progress: &mut dyn ProgressSink,
    ) -> Result<Option<Factor>> {
        properties.validate()?;
        network.validate()?;
        let slices = properties.slices(network.max_slices());
        calibrate(network, slices, progress, properties.cancellation())?;
        network.clear_transient_marginals();

        let snapshot = network.store_state();
        let result = Self::answer(network, all_marginals, progress);
        network.restore_state(&snapshot);
        result
    }
}
