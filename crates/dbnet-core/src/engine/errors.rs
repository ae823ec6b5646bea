//! Error types for dbnet inference.

use thiserror::Error;

/// Query-state errors.
///
/// These are caller-recoverable: they say "there is nothing to answer" rather
/// than "something broke", and the network is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryStateError {
    /// No transient variable is tagged as a query variable.
    #[error("no variable is tagged as a query variable")]
    NoQueryVariables,

    /// The algorithm was asked for per-variable marginals it cannot produce.
    #[error("per-variable marginals were not requested")]
    MarginalsNotRequested,
}

/// Errors that can occur while building, calibrating or querying a network.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// without breaking changes. All public APIs return `Result<T, InferenceError>`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Invalid configuration detected before any work started
    /// (burn-in >= max samples, CPD/parent shape mismatch, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Nothing to query.
    #[error("query error: {0}")]
    Query(#[from] QueryStateError),

    /// Structural failure (missing clique for a family, non-composable factors).
    #[error("structural error: {0}")]
    Structural(String),

    /// Numerical failure (non-positive-definite covariance, degenerate conditional).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// The requested operation is not defined for this distribution form.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The run was cancelled cooperatively.
    #[error("inference cancelled")]
    Cancelled,

    /// Internal invariant violation (programmer error, not user error).
    #[error("internal error: {0}")]
    Internal(String),
}

impl InferenceError {
    /// Whether the caller can recover without fixing the model.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, InferenceError::Query(_) | InferenceError::Cancelled)
    }
}

/// Shorthand used across the crate.
pub type Result<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_state_errors_are_recoverable() {
        let err: InferenceError = QueryStateError::NoQueryVariables.into();
        assert!(err.is_recoverable());
        assert!(!InferenceError::Numerical("x".into()).is_recoverable());
    }

    #[test]
    fn display_includes_kind() {
        let err = InferenceError::Configuration("burn_in must be < max_samples".into());
        assert_eq!(
            err.to_string(),
            "configuration error: burn_in must be < max_samples"
        );
    }
}
