//! The unrolled (transient) graph: one instance per (template variable, t),
//! created on demand slice by slice and cached until the model changes.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::distribution::{Distribution, Value};
use crate::engine::errors::{InferenceError, Result};
use crate::engine::factor::{Dim, Factor};
use crate::model::template::{TemplateVariable, VariableKind};
use crate::model::{TransientId, VariableId};

/// How inference treats a transient variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Evidence,
    Query,
    Hidden,
}

#[derive(Debug, Clone)]
pub struct TransientVariable {
    id: TransientId,
    template: VariableId,
    time: usize,
    kind: VariableKind,
    offset: usize,
    parents: Vec<TransientId>,
    discrete_parents: Vec<Dim>,
    continuous_parents: Vec<TransientId>,
    children: Vec<TransientId>,
    cpd: Distribution,
    evidence: Option<Value>,
    node: NodeKind,
    marginal: Option<Factor>,
    samples: Vec<Value>,
}

impl TransientVariable {
    pub fn id(&self) -> TransientId {
        self.id
    }

    pub fn template(&self) -> VariableId {
        self.template
    }

    pub fn time(&self) -> usize {
        self.time
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

    /// Template offset of the CPD this instance uses.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Parents in canonical order.
    pub fn parents(&self) -> &[TransientId] {
        &self.parents
    }

    pub fn discrete_parents(&self) -> &[Dim] {
        &self.discrete_parents
    }

    pub fn continuous_parents(&self) -> &[TransientId] {
        &self.continuous_parents
    }

    /// Children instantiated so far (later slices add theirs when created).
    pub fn children(&self) -> &[TransientId] {
        &self.children
    }

    pub fn cpd(&self) -> &Distribution {
        &self.cpd
    }

    pub fn evidence(&self) -> Option<Value> {
        self.evidence
    }

    pub fn node_kind(&self) -> NodeKind {
        self.node
    }

    pub fn is_evidence(&self) -> bool {
        self.node == NodeKind::Evidence
    }

    pub fn is_query(&self) -> bool {
        self.node == NodeKind::Query
    }

    pub fn marginal(&self) -> Option<&Factor> {
        self.marginal.as_ref()
    }

    pub fn samples(&self) -> &[Value] {
        &self.samples
    }

    /// The CPD as a factor over this variable and its parents.
    pub fn cpd_factor(&self) -> Result<Factor> {
        Factor::from_cpd(
            self.id,
            self.states(),
            &self.discrete_parents,
            &self.continuous_parents,
            &self.cpd,
        )
    }

    /// Every variable of the CPD family.
    pub fn family(&self) -> Vec<TransientId> {
        let mut family = self.parents.clone();
        family.push(self.id);
        family
    }
}

/// Per-variable evidence and node kind, captured by [`TransientGraph::store_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariableState {
    pub evidence: Option<Value>,
    pub node: NodeKind,
}

#[derive(Debug, Clone)]
pub struct TransientGraph {
    vars: Vec<TransientVariable>,
    index: FxHashMap<(VariableId, usize), TransientId>,
    slices: Vec<Vec<TransientId>>,
    /// Template variables in topological order of their lag-0 edges.
    order: Vec<VariableId>,
}

impl TransientGraph {
    pub fn new(templates: &[TemplateVariable]) -> Result<Self> {
        Ok(Self {
            vars: Vec::new(),
            index: FxHashMap::default(),
            slices: Vec::new(),
            order: topological_order(templates)?,
        })
    }

    pub fn template_order(&self) -> &[VariableId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn get(&self, id: TransientId) -> &TransientVariable {
        &self.vars[id.index()]
    }

    pub fn lookup(&self, var: VariableId, t: usize) -> Option<TransientId> {
        self.index.get(&(var, t)).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransientVariable> {
        self.vars.iter()
    }

    /// Instantiated slice `t`, if it exists.
    pub fn slice(&self, t: usize) -> Option<&[TransientId]> {
        self.slices.get(t).map(Vec::as_slice)
    }

    /// Instantiates slices up to and including `t`. Earlier slices are
    /// created first, so every parent resolves to an existing instance.
    pub(crate) fn ensure_slice(
        &mut self,
        t: usize,
        templates: &[TemplateVariable],
        evidence: &FxHashMap<(VariableId, usize), Value>,
        queries: &FxHashSet<(VariableId, usize)>,
    ) -> Result<&[TransientId]> {
        while self.slices.len() <= t {
            let time = self.slices.len();
            let mut slice = Vec::with_capacity(self.order.len());
            for k in 0..self.order.len() {
                let template = &templates[self.order[k].index()];
                let id = self.instantiate(template, time, templates, evidence, queries)?;
                slice.push(id);
            }
            self.slices.push(slice);
        }
        Ok(&self.slices[t])
    }

    fn instantiate(
        &mut self,
        template: &TemplateVariable,
        time: usize,
        templates: &[TemplateVariable],
        evidence: &FxHashMap<(VariableId, usize), Value>,
        queries: &FxHashSet<(VariableId, usize)>,
    ) -> Result<TransientId> {
        let id = TransientId(self.vars.len() as u32);
        let offset = template.offset_for_time(time);
        let mut parents = Vec::new();
        let mut discrete_parents = Vec::new();
        let mut continuous_parents = Vec::new();
        for (p, lag) in template.parents_for_offset(offset) {
            let pid = self.lookup(p, time - lag).ok_or_else(|| {
                InferenceError::Internal(format!(
                    "parent {} of {} at t={} not instantiated",
                    p,
                    template.name(),
                    time - lag
                ))
            })?;
            parents.push(pid);
            match templates[p.index()].kind() {
                VariableKind::Discrete { states } => discrete_parents.push(Dim::new(pid, states)),
                VariableKind::Continuous => continuous_parents.push(pid),
            }
        }
        for &pid in &parents {
            self.vars[pid.index()].children.push(id);
        }
        let key = (template.id(), time);
        let ev = evidence.get(&key).copied();
        let node = if ev.is_some() {
            NodeKind::Evidence
        } else if queries.contains(&key) {
            NodeKind::Query
        } else {
            NodeKind::Hidden
        };
        self.vars.push(TransientVariable {
            id,
            template: template.id(),
            time,
            kind: template.kind(),
            offset,
            parents,
            discrete_parents,
            continuous_parents,
            children: Vec::new(),
            cpd: template.cpd(offset).clone(),
            evidence: ev,
            node,
            marginal: None,
            samples: Vec::new(),
        });
        self.index.insert(key, id);
        Ok(id)
    }

    /// Snapshot of every live variable's evidence and node kind.
    pub fn store_state(&self) -> Vec<VariableState> {
        self.vars
            .iter()
            .map(|v| VariableState {
                evidence: v.evidence,
                node: v.node,
            })
            .collect()
    }

    pub fn restore_state(&mut self, state: &[VariableState]) {
        for (v, s) in self.vars.iter_mut().zip(state) {
            v.evidence = s.evidence;
            v.node = s.node;
        }
    }

    /// Retags a variable without touching the rest of the cache; evidence is
    /// dropped unless the new kind is `Evidence`.
    pub(crate) fn set_node_kind(&mut self, id: TransientId, node: NodeKind) {
        let v = &mut self.vars[id.index()];
        v.node = node;
        if node != NodeKind::Evidence {
            v.evidence = None;
        }
    }

    pub(crate) fn set_marginal(&mut self, id: TransientId, marginal: Factor) {
        self.vars[id.index()].marginal = Some(marginal);
    }

    pub(crate) fn push_sample(&mut self, id: TransientId, value: Value) {
        self.vars[id.index()].samples.push(value);
    }

    pub fn clear_marginals(&mut self) {
        for v in &mut self.vars {
            v.marginal = None;
            v.samples.clear();
        }
    }
}

/// Kahn's algorithm over lag-0 edges; ties resolve by creation order.
fn topological_order(templates: &[TemplateVariable]) -> Result<Vec<VariableId>> {
    let n = templates.len();
    let mut indegree = vec![0usize; n];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for v in templates {
        for p in v.parents_at_lag(0) {
            indegree[v.id().index()] += 1;
            children[p.index()].push(v.id().index());
        }
    }
    let mut ready: std::collections::BTreeSet<usize> =
        (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(VariableId(i as u32));
        for &c in &children[i] {
            indegree[c] -= 1;
            if indegree[c] == 0 {
                ready.insert(c);
            }
        }
    }
    if order.len() != n {
        return Err(InferenceError::Structural(
            "intra-slice parent relation contains a cycle".into(),
        ));
    }
    Ok(order)
}
