//! Progress reporting and cooperative cancellation.
//!
//! The progress sink is a fire-and-forget line channel for humans; nothing
//! depends on what it receives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::errors::{InferenceError, Result};

pub trait ProgressSink {
    fn line(&mut self, line: &str);
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn line(&mut self, _line: &str) {}
}

/// Keeps every line in memory.
#[derive(Debug, Clone, Default)]
pub struct VecProgress {
    pub lines: Vec<String>,
}

impl ProgressSink for VecProgress {
    fn line(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// Forwards lines to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn line(&mut self, line: &str) {
        tracing::info!(target: "dbnet::progress", "{}", line);
    }
}

/// Shared cancellation flag, checked between slices and iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// `Err(Cancelled)` once `token` has fired.
pub(crate) fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(t) if t.is_cancelled() => Err(InferenceError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(check_cancelled(Some(&token)).is_ok());
        other.cancel();
        let err = check_cancelled(Some(&token)).unwrap_err();
        assert!(matches!(err, InferenceError::Cancelled));
        assert!(check_cancelled(None).is_ok());
    }
}
