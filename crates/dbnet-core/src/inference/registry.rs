//! Name-to-algorithm lookup.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::inference::{GibbsSampler, InferenceAlgorithm, JunctionTreeQuery, VariableElimination};

/// Registry mapping names to inference algorithms.
#[derive(Clone)]
pub struct AlgorithmRegistry {
    inner: FxHashMap<String, Arc<dyn InferenceAlgorithm>>,
}

impl AlgorithmRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            inner: FxHashMap::default(),
        }
    }

    /// The three built-in algorithms under their own names.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(Arc::new(JunctionTreeQuery));
        r.register(Arc::new(VariableElimination));
        r.register(Arc::new(GibbsSampler));
        r
    }

    /// Registers `algorithm` under its name, replacing any previous entry.
    pub fn register(&mut self, algorithm: Arc<dyn InferenceAlgorithm>) {
        self.inner.insert(algorithm.name().to_string(), algorithm);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InferenceAlgorithm>> {
        self.inner.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("algorithms", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered() {
        let r = AlgorithmRegistry::default();
        assert_eq!(
            r.names(),
            vec!["gibbs", "junction-tree", "variable-elimination"]
        );
        assert_eq!(r.get("junction-tree").expect("jt").name(), "junction-tree");
        assert!(r.get("belief-propagation").is_none());
    }

    #[test]
    fn register_replaces_by_name() {
        let mut r = AlgorithmRegistry::new();
        r.register(Arc::new(GibbsSampler));
        r.register(Arc::new(GibbsSampler));
        assert_eq!(r.names().len(), 1);
    }
}
