//! Template variables: per-lag parent sets and per-offset CPDs.

use crate::distribution::factory::ParentSignature;
use crate::distribution::Distribution;
use crate::model::VariableId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VariableKind {
    Discrete { states: usize },
    Continuous,
}

impl VariableKind {
    /// A two-state discrete variable.
    pub const BINARY: VariableKind = VariableKind::Discrete { states: 2 };

    pub fn states(&self) -> Option<usize> {
        match *self {
            VariableKind::Discrete { states } => Some(states),
            VariableKind::Continuous => None,
        }
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self, VariableKind::Discrete { .. })
    }
}

/// A persistent variable definition.
///
/// `parents[lag]` lists the parents at time `t − lag`. The CPD used at time
/// `t` is `cpds[min(t, max_lag)]`; its parents are every lag up to that
/// offset, in canonical order (lag ascending, then creation order).
#[derive(Debug, Clone)]
pub struct TemplateVariable {
    id: VariableId,
    name: String,
    kind: VariableKind,
    parents: Vec<Vec<VariableId>>,
    cpds: Vec<Distribution>,
}

impl TemplateVariable {
    pub(crate) fn new(id: VariableId, name: String, kind: VariableKind, cpd: Distribution) -> Self {
        Self {
            id,
            name,
            kind,
            parents: vec![Vec::new()],
            cpds: vec![cpd],
        }
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn states(&self) -> Option<usize> {
        self.kind.states()
    }

    pub fn is_discrete(&self) -> bool {
        self.kind.is_discrete()
    }

    /// Largest parent lag (0 for a purely intra-slice variable).
    pub fn max_lag(&self) -> usize {
        self.parents.len() - 1
    }

    pub fn parents_at_lag(&self, lag: usize) -> &[VariableId] {
        self.parents.get(lag).map_or(&[], Vec::as_slice)
    }

    /// Template offset whose CPD applies at absolute time `t`.
    pub fn offset_for_time(&self, t: usize) -> usize {
        t.min(self.max_lag())
    }

    /// Canonically ordered `(parent, lag)` pairs of the CPD at `offset`.
    pub fn parents_for_offset(&self, offset: usize) -> Vec<(VariableId, usize)> {
        let mut out = Vec::new();
        for lag in 0..=offset.min(self.max_lag()) {
            let mut at_lag = self.parents[lag].clone();
            at_lag.sort_unstable();
            out.extend(at_lag.into_iter().map(|p| (p, lag)));
        }
        out
    }

    pub fn cpd(&self, offset: usize) -> &Distribution {
        &self.cpds[offset.min(self.cpds.len() - 1)]
    }

    pub fn cpds(&self) -> &[Distribution] {
        &self.cpds
    }

    pub(crate) fn add_parent(&mut self, parent: VariableId, lag: usize) -> bool {
        while self.parents.len() <= lag {
            self.parents.push(Vec::new());
        }
        if self.parents[lag].contains(&parent) {
            return false;
        }
        self.parents[lag].push(parent);
        true
    }

    pub(crate) fn remove_parent(&mut self, parent: VariableId, lag: usize) -> bool {
        let Some(at_lag) = self.parents.get_mut(lag) else {
            return false;
        };
        let before = at_lag.len();
        at_lag.retain(|p| *p != parent);
        let removed = at_lag.len() != before;
        while self.parents.len() > 1 && self.parents.last().map_or(false, Vec::is_empty) {
            self.parents.pop();
        }
        removed
    }

    pub(crate) fn set_cpds(&mut self, cpds: Vec<Distribution>) {
        self.cpds = cpds;
    }

    pub(crate) fn set_cpd(&mut self, offset: usize, cpd: Distribution) {
        self.cpds[offset] = cpd;
    }

    /// Parent signature of the CPD at `offset`, given every variable's kind.
    pub(crate) fn signature(&self, offset: usize, kinds: &[VariableKind]) -> ParentSignature {
        let mut sig = ParentSignature::default();
        for (p, _) in self.parents_for_offset(offset) {
            match kinds[p.index()] {
                VariableKind::Discrete { states } => sig.discrete.push(states),
                VariableKind::Continuous => sig.continuous += 1,
            }
        }
        sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Table;

    #[test]
    fn parents_are_canonical_per_offset() {
        let mut v = TemplateVariable::new(
            VariableId(5),
            "x".into(),
            VariableKind::BINARY,
            Distribution::from(Table::uniform(vec![2])),
        );
        v.add_parent(VariableId(3), 0);
        v.add_parent(VariableId(1), 0);
        v.add_parent(VariableId(5), 1);
        assert_eq!(v.max_lag(), 1);
        assert_eq!(
            v.parents_for_offset(0),
            vec![(VariableId(1), 0), (VariableId(3), 0)]
        );
        assert_eq!(
            v.parents_for_offset(1),
            vec![(VariableId(1), 0), (VariableId(3), 0), (VariableId(5), 1)]
        );
        assert_eq!(v.offset_for_time(7), 1);
    }

    #[test]
    fn removing_last_lagged_parent_shrinks_lags() {
        let mut v = TemplateVariable::new(
            VariableId(0),
            "x".into(),
            VariableKind::Continuous,
            Distribution::from(Table::uniform(vec![2])),
        );
        v.add_parent(VariableId(0), 2);
        assert_eq!(v.max_lag(), 2);
        assert!(v.remove_parent(VariableId(0), 2));
        assert_eq!(v.max_lag(), 0);
    }
}
