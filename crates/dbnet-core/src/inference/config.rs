//! Run-time properties shared by the inference algorithms.

use crate::engine::errors::{InferenceError, Result};
use crate::inference::progress::CancellationToken;

/// Minimum number of post-burn-in draws a Gibbs run must keep.
pub const MIN_GIBBS_SAMPLES: usize = 3;

/// Gibbs sampler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GibbsConfig {
    /// Iterations discarded before draws are recorded.
    pub burn_in: usize,
    /// Total iterations, burn-in included.
    pub max_samples: usize,
    /// Seed of the sampler's random stream.
    pub seed: u64,
}

impl Default for GibbsConfig {
    fn default() -> Self {
        Self {
            burn_in: 500,
            max_samples: 5_000,
            seed: 0x5eed,
        }
    }
}

impl GibbsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.burn_in >= self.max_samples {
            return Err(InferenceError::Configuration(format!(
                "gibbs: burn-in ({}) must be smaller than max samples ({})",
                self.burn_in, self.max_samples
            )));
        }
        if self.max_samples - self.burn_in < MIN_GIBBS_SAMPLES {
            return Err(InferenceError::Configuration(format!(
                "gibbs: at least {} samples must follow burn-in",
                MIN_GIBBS_SAMPLES
            )));
        }
        Ok(())
    }
}

/// Properties of one inference run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InferenceProperties {
    pub gibbs: GibbsConfig,
    /// Overrides the network's slice horizon for this run.
    pub max_slices: Option<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub cancellation: Option<CancellationToken>,
}

impl InferenceProperties {
    pub fn validate(&self) -> Result<()> {
        if self.max_slices == Some(0) {
            return Err(InferenceError::Configuration("max_slices must be at least 1".into()));
        }
        Ok(())
    }

    /// Horizon of the run: the override, or the network's own.
    pub fn slices(&self, network_slices: usize) -> usize {
        self.max_slices.unwrap_or(network_slices)
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }
}
