//! The model orchestrator: template variables, evidence and query policy,
//! the transient-graph cache and the junction-tree template.

use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::distribution::factory::DistributionFactory;
use crate::distribution::{Distribution, Value};
use crate::engine::errors::{InferenceError, QueryStateError, Result};
use crate::engine::factor::Factor;
use crate::junction::{JunctionTreeTemplate, StructuralSolver, TriangulationSolver};
use crate::model::events::{ModelEvent, ModelObserver};
use crate::model::template::{TemplateVariable, VariableKind};
use crate::model::transient::{TransientGraph, VariableState};
use crate::model::{TransientId, VariableId};

/// Evidence, query tags and per-variable transient state, captured so a
/// sweep can mutate them and put everything back.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    evidence: FxHashMap<(VariableId, usize), Value>,
    queries: FxHashSet<(VariableId, usize)>,
    variables: Vec<VariableState>,
}

/// Produces new CPDs for a network, e.g. from data.
pub trait ParameterLearner {
    /// New CPDs as `(variable, template offset, cpd)`.
    fn learn(&mut self, network: &DynamicNetwork) -> Result<Vec<(VariableId, usize, Distribution)>>;
}

pub struct DynamicNetwork {
    templates: Vec<TemplateVariable>,
    max_slices: usize,
    evidence: FxHashMap<(VariableId, usize), Value>,
    queries: FxHashSet<(VariableId, usize)>,
    transient: Option<TransientGraph>,
    junction: JunctionTreeTemplate,
    factory: DistributionFactory,
    solver: Box<dyn StructuralSolver>,
    observers: Vec<Box<dyn ModelObserver>>,
}

impl std::fmt::Debug for DynamicNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicNetwork")
            .field("templates", &self.templates)
            .field("max_slices", &self.max_slices)
            .field("evidence", &self.evidence)
            .field("queries", &self.queries)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl DynamicNetwork {
    /// An empty network unrolled over `max_slices` time slices.
    pub fn new(max_slices: usize) -> Self {
        Self {
            templates: Vec::new(),
            max_slices: max_slices.max(1),
            evidence: FxHashMap::default(),
            queries: FxHashSet::default(),
            transient: None,
            junction: JunctionTreeTemplate::default(),
            factory: DistributionFactory,
            solver: Box::new(TriangulationSolver),
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ModelObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn StructuralSolver>) -> Self {
        self.solver = solver;
        self.junction.mark_stale();
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    pub fn add_variable(
        &mut self,
        name: impl Into<String>,
        kind: VariableKind,
    ) -> Result<VariableId> {
        let name = name.into();
        if self.templates.iter().any(|v| v.name() == name) {
            return Err(InferenceError::Configuration(format!(
                "variable '{}' already exists",
                name
            )));
        }
        if let VariableKind::Discrete { states } = kind {
            if states == 0 {
                return Err(InferenceError::Configuration(format!(
                    "discrete variable '{}' needs at least one state",
                    name
                )));
            }
        }
        let id = VariableId(self.templates.len() as u32);
        let cpd = self
            .factory
            .default_cpd(kind.states(), &Default::default())?;
        let template = TemplateVariable::new(id, name, kind, cpd);
        self.templates.push(template);
        self.structure_changed(ModelEvent::VariableAdded(id));
        Ok(id)
    }

    /// Adds `parent` at time `t − lag` to `child`'s parents. Every CPD of
    /// `child` is reset to the factory default for its new signature.
    pub fn add_parent(&mut self, child: VariableId, parent: VariableId, lag: usize) -> Result<()> {
        self.check_id(child)?;
        self.check_id(parent)?;
        if lag == 0 && (child == parent || self.reaches(child, parent)) {
            return Err(InferenceError::Structural(format!(
                "intra-slice edge {} -> {} would create a cycle",
                self.templates[parent.index()].name(),
                self.templates[child.index()].name()
            )));
        }
        if !self.templates[child.index()].add_parent(parent, lag) {
            return Ok(());
        }
        self.reset_cpds(child)?;
        self.structure_changed(ModelEvent::StructureChanged(child));
        Ok(())
    }

    pub fn remove_parent(
        &mut self,
        child: VariableId,
        parent: VariableId,
        lag: usize,
    ) -> Result<()> {
        self.check_id(child)?;
        if !self.templates[child.index()].remove_parent(parent, lag) {
            return Ok(());
        }
        self.reset_cpds(child)?;
        self.structure_changed(ModelEvent::StructureChanged(child));
        Ok(())
    }

    /// Replaces the CPD `var` uses at template offset `offset`. The value
    /// must match the parent signature of that offset.
    pub fn set_cpd(
        &mut self,
        var: VariableId,
        offset: usize,
        cpd: impl Into<Distribution>,
    ) -> Result<()> {
        self.check_id(var)?;
        let cpd = cpd.into();
        let template = &self.templates[var.index()];
        if offset > template.max_lag() {
            return Err(InferenceError::Configuration(format!(
                "{} has no template offset {} (max lag {})",
                template.name(),
                offset,
                template.max_lag()
            )));
        }
        self.check_shape(template, offset, &cpd)?;
        self.templates[var.index()].set_cpd(offset, cpd);
        self.junction.mark_stale();
        self.transient = None;
        self.notify(ModelEvent::CpdChanged {
            variable: var,
            offset,
        });
        Ok(())
    }

    /// Checks every CPD against its parent signature.
    pub fn validate(&self) -> Result<()> {
        for v in &self.templates {
            for offset in 0..=v.max_lag() {
                self.check_shape(v, offset, v.cpd(offset))?;
            }
        }
        Ok(())
    }

    fn check_shape(
        &self,
        template: &TemplateVariable,
        offset: usize,
        cpd: &Distribution,
    ) -> Result<()> {
        let sig = template.signature(offset, &self.kinds());
        let mut dims = sig.discrete.clone();
        dims.extend(template.states());
        let heads = usize::from(!template.is_discrete());
        if cpd.discrete_dims() != dims || cpd.heads() != heads || cpd.tails() != sig.continuous {
            return Err(InferenceError::Configuration(format!(
                "CPD of {} at offset {}: layout {:?}, {} heads, {} tails; expected {:?}, {}, {}",
                template.name(),
                offset,
                cpd.discrete_dims(),
                cpd.heads(),
                cpd.tails(),
                dims,
                heads,
                sig.continuous
            )));
        }
        Ok(())
    }

    fn kinds(&self) -> Vec<VariableKind> {
        self.templates.iter().map(TemplateVariable::kind).collect()
    }

    fn reset_cpds(&mut self, var: VariableId) -> Result<()> {
        let kinds = self.kinds();
        let template = &self.templates[var.index()];
        let factory = &self.factory;
        let cpds = (0..=template.max_lag())
            .map(|k| factory.default_cpd(template.states(), &template.signature(k, &kinds)))
            .collect::<Result<Vec<_>>>()?;
        self.templates[var.index()].set_cpds(cpds);
        Ok(())
    }

    /// Whether `to` is reachable from `from` along lag-0 parent edges.
    fn reaches(&self, from: VariableId, to: VariableId) -> bool {
        let mut stack = vec![to];
        let mut seen = FxHashSet::default();
        while let Some(v) = stack.pop() {
            if v == from {
                return true;
            }
            if seen.insert(v) {
                stack.extend(self.templates[v.index()].parents_at_lag(0).iter().copied());
            }
        }
        false
    }

    fn check_id(&self, var: VariableId) -> Result<()> {
        if var.index() < self.templates.len() {
            Ok(())
        } else {
            Err(InferenceError::Configuration(format!("unknown variable {}", var)))
        }
    }

    pub fn templates(&self) -> &[TemplateVariable] {
        &self.templates
    }

    pub fn template(&self, var: VariableId) -> Option<&TemplateVariable> {
        self.templates.get(var.index())
    }

    pub fn variable_by_name(&self, name: &str) -> Option<VariableId> {
        self.templates
            .iter()
            .find(|v| v.name() == name)
            .map(TemplateVariable::id)
    }

    pub fn factory(&self) -> &DistributionFactory {
        &self.factory
    }

    pub fn set_evidence(&mut self, var: VariableId, t: usize, value: Value) -> Result<()> {
        self.check_id(var)?;
        let template = &self.templates[var.index()];
        let ok = match (template.kind(), value) {
            (VariableKind::Discrete { states }, Value::State(s)) => s < states,
            (VariableKind::Continuous, Value::Real(x)) => x.is_finite(),
            _ => false,
        };
        if !ok {
            return Err(InferenceError::Configuration(format!(
                "{} is not a valid observation of {}",
                value,
                template.name()
            )));
        }
        self.evidence.insert((var, t), value);
        self.evidence_changed(ModelEvent::EvidenceChanged {
            variable: var,
            time: t,
        });
        Ok(())
    }

    pub fn clear_evidence(&mut self, var: VariableId, t: usize) {
        if self.evidence.remove(&(var, t)).is_some() {
            self.evidence_changed(ModelEvent::EvidenceChanged {
                variable: var,
                time: t,
            });
        }
    }

    pub fn clear_all_evidence(&mut self) {
        let keys: Vec<_> = self.evidence.keys().copied().collect();
        for (var, t) in keys {
            self.clear_evidence(var, t);
        }
    }

    pub fn evidence(&self, var: VariableId, t: usize) -> Option<Value> {
        self.evidence.get(&(var, t)).copied()
    }

    /// Tags `(var, t)` as a query variable, or untags it.
    pub fn set_query(&mut self, var: VariableId, t: usize, query: bool) -> Result<()> {
        self.check_id(var)?;
        let changed = if query {
            self.queries.insert((var, t))
        } else {
            self.queries.remove(&(var, t))
        };
        if changed {
            self.transient = None;
            self.notify(ModelEvent::QueryChanged {
                variable: var,
                time: t,
            });
        }
        Ok(())
    }

    pub fn is_query(&self, var: VariableId, t: usize) -> bool {
        self.queries.contains(&(var, t))
    }

    pub fn max_slices(&self) -> usize {
        self.max_slices
    }

    pub fn set_max_slices(&mut self, slices: usize) {
        let slices = slices.max(1);
        if slices != self.max_slices {
            self.max_slices = slices;
            self.junction.invalidate();
            self.notify(ModelEvent::HorizonChanged(slices));
        }
    }

    /// Number of distinct template offsets (`max lag + 1`).
    pub fn number_template_slices(&self) -> usize {
        let max_lag = self
            .templates
            .iter()
            .map(TemplateVariable::max_lag)
            .max()
            .unwrap_or(0);
        max_lag + 1
    }

    /// Slice `t`: one transient instance per template variable, in
    /// topological order. Earlier slices are instantiated as needed.
    pub fn get_slice(&mut self, t: usize) -> Result<&[TransientId]> {
        if self.transient.is_none() {
            self.transient = Some(TransientGraph::new(&self.templates)?);
        }
        let Self {
            transient,
            templates,
            evidence,
            queries,
            ..
        } = self;
        let graph = transient
            .as_mut()
            .ok_or_else(|| InferenceError::Internal("transient graph missing".into()))?;
        graph.ensure_slice(t, templates, evidence, queries)
    }

    /// Instantiates slices `0..slices` and returns the transient graph.
    pub fn unroll(&mut self, slices: usize) -> Result<&TransientGraph> {
        if self.templates.is_empty() {
            return Err(InferenceError::Configuration("the network has no variables".into()));
        }
        self.get_slice(slices.max(1) - 1)?;
        self.transient
            .as_ref()
            .ok_or_else(|| InferenceError::Internal("transient graph missing".into()))
    }

    pub fn transient_graph(&self) -> Option<&TransientGraph> {
        self.transient.as_ref()
    }

    pub(crate) fn transient_graph_mut(&mut self) -> Option<&mut TransientGraph> {
        self.transient.as_mut()
    }

    pub fn lookup(&self, var: VariableId, t: usize) -> Option<TransientId> {
        self.transient.as_ref()?.lookup(var, t)
    }

    pub fn junction_tree_template(&self) -> &JunctionTreeTemplate {
        &self.junction
    }

    pub(crate) fn junction_tree_template_mut(&mut self) -> &mut JunctionTreeTemplate {
        &mut self.junction
    }

    /// Reruns the structural solver if the clique templates are stale.
    pub(crate) fn solve_structure(&mut self) -> Result<()> {
        if !self.junction.is_stale() && !self.junction.graphs().is_empty() {
            return Ok(());
        }
        let graphs = self.solver.solve(&self.templates)?;
        tracing::debug!("solver produced {} clique templates", graphs.len());
        self.junction.set_graphs(graphs);
        Ok(())
    }

    pub fn store_state(&self) -> StateSnapshot {
        StateSnapshot {
            evidence: self.evidence.clone(),
            queries: self.queries.clone(),
            variables: self
                .transient
                .as_ref()
                .map(TransientGraph::store_state)
                .unwrap_or_default(),
        }
    }

    pub fn restore_state(&mut self, snapshot: &StateSnapshot) {
        if self.evidence != snapshot.evidence {
            self.junction.invalidate();
        }
        self.evidence = snapshot.evidence.clone();
        self.queries = snapshot.queries.clone();
        match self.transient.as_mut() {
            Some(graph) if graph.len() == snapshot.variables.len() => {
                graph.restore_state(&snapshot.variables)
            }
            _ => self.transient = None,
        }
    }

    pub fn clear_transient_marginals(&mut self) {
        if let Some(graph) = self.transient.as_mut() {
            graph.clear_marginals();
        }
    }

    /// Posterior marginal of `(var, t)` cached by the last all-marginals run.
    pub fn marginal(&self, var: VariableId, t: usize) -> Result<&Factor> {
        self.lookup(var, t)
            .and_then(|id| self.transient.as_ref()?.get(id).marginal())
            .ok_or(InferenceError::Query(QueryStateError::MarginalsNotRequested))
    }

    /// Post-burn-in draws of `(var, t)` from the last Gibbs run.
    pub fn samples(&self, var: VariableId, t: usize) -> &[Value] {
        match (self.transient.as_ref(), self.lookup(var, t)) {
            (Some(graph), Some(id)) => graph.get(id).samples(),
            _ => &[],
        }
    }

    /// Marks the structure stale so the solver reruns on the next query.
    pub fn learning_completed(&mut self) {
        self.junction.mark_stale();
        self.transient = None;
        self.notify(ModelEvent::LearningCompleted);
    }

    pub fn learn_with(&mut self, learner: &mut dyn ParameterLearner) -> Result<()> {
        let updates = learner.learn(self)?;
        for (var, offset, cpd) in updates {
            self.set_cpd(var, offset, cpd)?;
        }
        self.learning_completed();
        Ok(())
    }

    pub(crate) fn notify(&self, event: ModelEvent) {
        for o in &self.observers {
            o.on_event(&event);
        }
    }

    fn structure_changed(&mut self, event: ModelEvent) {
        self.transient = None;
        self.junction.mark_stale();
        self.notify(event);
    }

    fn evidence_changed(&mut self, event: ModelEvent) {
        self.transient = None;
        self.junction.invalidate();
        self.notify(event);
    }
}

/// A network behind a mutex: at most one inference run at a time.
#[derive(Debug, Clone)]
pub struct SharedNetwork(Arc<Mutex<DynamicNetwork>>);

impl SharedNetwork {
    pub fn new(network: DynamicNetwork) -> Self {
        Self(Arc::new(Mutex::new(network)))
    }

    /// Runs `f` with exclusive access to the network.
    pub fn with<R>(&self, f: impl FnOnce(&mut DynamicNetwork) -> Result<R>) -> Result<R> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| InferenceError::Internal("network lock poisoned".into()))?;
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::ConditionalTable;
    use crate::model::events::EventLog;

    fn chain() -> (DynamicNetwork, VariableId, VariableId) {
        let mut net = DynamicNetwork::new(3);
        let x = net.add_variable("x", VariableKind::BINARY).expect("x");
        let y = net.add_variable("y", VariableKind::BINARY).expect("y");
        net.add_parent(y, x, 0).expect("edge");
        (net, x, y)
    }

    #[test]
    fn add_parent_resets_cpd_to_signature() {
        let (net, _, y) = chain();
        let cpd = net.template(y).expect("y").cpd(0);
        assert_eq!(cpd.discrete_dims(), vec![2, 2]);
        net.validate().expect("valid");
    }

    #[test]
    fn intra_slice_cycle_is_rejected() {
        let (mut net, x, y) = chain();
        let err = net.add_parent(x, y, 0).unwrap_err();
        assert!(matches!(err, InferenceError::Structural(_)));
        // the same edge across slices is fine
        net.add_parent(x, y, 1).expect("temporal edge");
        assert_eq!(net.number_template_slices(), 2);
    }

    #[test]
    fn set_cpd_checks_shape() {
        let (mut net, x, y) = chain();
        let bad = ConditionalTable::new(vec![], vec![vec![0.5, 0.5]]).expect("cpt");
        assert!(matches!(
            net.set_cpd(y, 0, bad.clone()),
            Err(InferenceError::Configuration(_))
        ));
        net.set_cpd(x, 0, bad).expect("root prior");
    }

    #[test]
    fn unrolling_resolves_parents_to_earlier_slices() {
        let (mut net, x, y) = chain();
        net.add_parent(x, x, 1).expect("temporal");
        let graph = net.unroll(3).expect("unroll");
        assert_eq!(graph.slice_count(), 3);
        for t in 0..3 {
            let slice = graph.slice(t).expect("slice");
            assert_eq!(slice.len(), 2);
            let xt = graph.get(slice[0]);
            assert_eq!(xt.template(), x);
            assert_eq!(graph.get(slice[1]).template(), y);
            let expected = if t == 0 { 0 } else { 1 };
            assert_eq!(xt.parents().len(), expected);
            for p in xt.parents() {
                assert_eq!(graph.get(*p).time(), t - 1);
            }
        }
    }

    #[test]
    fn observers_see_changes() {
        let log = EventLog::new();
        let mut net = DynamicNetwork::new(2).with_observer(Box::new(log.clone()));
        let x = net.add_variable("x", VariableKind::Continuous).expect("x");
        net.set_evidence(x, 1, Value::Real(0.5)).expect("evidence");
        assert_eq!(
            log.events(),
            vec![
                ModelEvent::VariableAdded(x),
                ModelEvent::EvidenceChanged {
                    variable: x,
                    time: 1,
                },
            ]
        );
    }

    #[test]
    fn evidence_type_is_checked() {
        let (mut net, x, _) = chain();
        assert!(net.set_evidence(x, 0, Value::Real(1.0)).is_err());
        assert!(net.set_evidence(x, 0, Value::State(2)).is_err());
        net.set_evidence(x, 0, Value::State(1)).expect("valid");
    }

    #[test]
    fn marginal_without_sweep_is_a_query_state_error() {
        let (mut net, x, _) = chain();
        net.unroll(1).expect("unroll");
        let err = net.marginal(x, 0).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::Query(QueryStateError::MarginalsNotRequested)
        ));
        assert!(err.is_recoverable());
    }

    #[test]
    fn state_round_trips() {
        let (mut net, x, y) = chain();
        net.set_evidence(y, 0, Value::State(1)).expect("evidence");
        let snapshot = net.store_state();
        net.clear_evidence(y, 0);
        net.set_query(x, 0, true).expect("query");
        net.restore_state(&snapshot);
        assert_eq!(net.evidence(y, 0), Some(Value::State(1)));
        assert!(!net.is_query(x, 0));
    }
}
