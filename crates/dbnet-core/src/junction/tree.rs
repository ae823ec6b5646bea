//! Per-slice junction trees and the forest that links them.
//!
//! Each slice instantiates the clique template of its template offset. The
//! root of slice `t > 0` hangs below the forward-interface clique of slice
//! `t − 1` through a link separator, so all slices form one tree rooted in
//! slice 0. Tree walks use explicit work stacks over arena indices.

use rustc_hash::FxHashSet;

use crate::engine::errors::{InferenceError, Result};
use crate::engine::factor::Factor;
use crate::junction::clique::CliqueGraph;
use crate::model::transient::TransientGraph;
use crate::model::TransientId;

/// A clique in the linked forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub slice: usize,
    pub clique: usize,
}

impl NodeRef {
    pub fn new(slice: usize, clique: usize) -> Self {
        Self { slice, clique }
    }
}

/// Separator towards a clique's parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SepRef {
    Local(usize),
    /// The link separator of the clique's slice (slice roots only).
    Link,
}

#[derive(Debug, Clone)]
pub struct TransientClique {
    pub members: Vec<TransientId>,
    pub factor: Factor,
    pub parent: Option<NodeRef>,
    pub parent_separator: Option<SepRef>,
    pub children: Vec<NodeRef>,
    /// Variables whose CPD was folded into this clique.
    pub assigned: Vec<TransientId>,
}

#[derive(Debug, Clone)]
pub struct TransientSeparator {
    pub members: Vec<TransientId>,
    pub factor: Option<Factor>,
}

#[derive(Debug, Clone)]
pub struct JunctionTree {
    time: usize,
    offset: usize,
    cliques: Vec<TransientClique>,
    separators: Vec<TransientSeparator>,
    /// Template separator endpoints, unoriented.
    edges: Vec<(usize, usize)>,
    root: usize,
    forward_interface: Option<usize>,
    backward_interface: Option<usize>,
    link: Option<TransientSeparator>,
}

impl JunctionTree {
    /// Instantiates `template` at absolute time `time`: resolves members to
    /// transient variables and folds each CPD born at `time` into the first
    /// clique holding its whole family.
    pub fn build(template: &CliqueGraph, graph: &TransientGraph, time: usize) -> Result<Self> {
        let resolve = |members: &[crate::junction::clique::GraphVariable]| {
            members
                .iter()
                .map(|g| {
                    time.checked_sub(g.lag)
                        .and_then(|t| graph.lookup(g.variable, t))
                        .ok_or_else(|| {
                            InferenceError::Internal(format!(
                                "clique member {} has no instance at t={}",
                                g, time
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()
        };

        let mut cliques = Vec::with_capacity(template.cliques.len());
        for c in &template.cliques {
            cliques.push(TransientClique {
                members: resolve(&c.members)?,
                factor: Factor::unit(),
                parent: None,
                parent_separator: None,
                children: Vec::new(),
                assigned: Vec::new(),
            });
        }
        let separators = template
            .separators
            .iter()
            .map(|s| {
                Ok(TransientSeparator {
                    members: resolve(&s.members)?,
                    factor: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let edges = template.separators.iter().map(|s| (s.a, s.b)).collect();

        let born = graph.slice(time).ok_or_else(|| {
            InferenceError::Internal(format!("slice {} not instantiated", time))
        })?;
        let mut counted: FxHashSet<TransientId> = FxHashSet::default();
        for &id in born {
            let var = graph.get(id);
            let family = var.family();
            let host = cliques
                .iter()
                .position(|c| family.iter().all(|f| c.members.contains(f)))
                .ok_or_else(|| {
                    InferenceError::Structural(format!(
                        "no clique at t={} contains the family of {}",
                        time, id
                    ))
                })?;
            if counted.insert(id) {
                cliques[host].assigned.push(id);
            }
        }

        Ok(Self {
            time,
            offset: template.offset,
            cliques,
            separators,
            edges,
            root: 0,
            forward_interface: template.forward_interface(),
            backward_interface: template.backward_interface(),
            link: None,
        })
    }

    pub fn time(&self) -> usize {
        self.time
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn cliques(&self) -> &[TransientClique] {
        &self.cliques
    }

    pub fn cliques_mut(&mut self) -> &mut [TransientClique] {
        &mut self.cliques
    }

    pub fn separators(&self) -> &[TransientSeparator] {
        &self.separators
    }

    pub fn forward_interface(&self) -> Option<usize> {
        self.forward_interface
    }

    pub fn backward_interface(&self) -> Option<usize> {
        self.backward_interface
    }

    pub fn link(&self) -> Option<&TransientSeparator> {
        self.link.as_ref()
    }

    /// Whether rooting at `root` keeps every cut strong: for each separator
    /// `S` below a parent, either `S` is purely discrete or the child side
    /// beyond `S` is purely continuous.
    pub fn is_strong_root(&self, root: usize, graph: &TransientGraph) -> bool {
        let is_discrete = |v: &TransientId| graph.get(*v).is_discrete();
        let mut stack = vec![(root, usize::MAX)];
        while let Some((c, from)) = stack.pop() {
            for (i, &(a, b)) in self.edges.iter().enumerate() {
                let next = if a == c {
                    b
                } else if b == c {
                    a
                } else {
                    continue;
                };
                if next == from {
                    continue;
                }
                let sep = &self.separators[i].members;
                let sep_discrete = sep.iter().all(is_discrete);
                let rest_continuous = self.cliques[next]
                    .members
                    .iter()
                    .filter(|m| !sep.contains(m))
                    .all(|m| !is_discrete(m));
                if !sep_discrete && !rest_continuous {
                    return false;
                }
                stack.push((next, c));
            }
        }
        true
    }

    /// Picks the root: slices with a backward interface root there so the
    /// link separator sits above them; otherwise a strong root is preferred,
    /// falling back to the forward interface, then clique 0.
    pub fn select_root(&mut self, graph: &TransientGraph) -> usize {
        let root = match self.backward_interface {
            Some(root) if self.time > 0 => {
                if !self.is_strong_root(root, graph) {
                    tracing::warn!(
                        "slice {}: backward interface clique {} is not a strong root",
                        self.time, root
                    );
                }
                root
            }
            _ => (0..self.cliques.len())
                .find(|&c| self.is_strong_root(c, graph))
                .or(self.forward_interface)
                .unwrap_or(0),
        };
        self.orient(root);
        root
    }

    fn orient(&mut self, root: usize) {
        self.root = root;
        for c in &mut self.cliques {
            c.parent = None;
            c.parent_separator = None;
            c.children.clear();
        }
        let mut visited = vec![false; self.cliques.len()];
        visited[root] = true;
        let mut stack = vec![root];
        while let Some(c) = stack.pop() {
            for (i, &(a, b)) in self.edges.iter().enumerate() {
                let next = if a == c {
                    b
                } else if b == c {
                    a
                } else {
                    continue;
                };
                if visited[next] {
                    continue;
                }
                visited[next] = true;
                self.cliques[next].parent = Some(NodeRef::new(self.time, c));
                self.cliques[next].parent_separator = Some(SepRef::Local(i));
                self.cliques[c].children.push(NodeRef::new(self.time, next));
                stack.push(next);
            }
        }
    }

    /// Grafts this slice below `donor` (the forward-interface clique of the
    /// previous slice) through a separator over `members`.
    pub fn link_interface(&mut self, donor: usize, members: Vec<TransientId>) {
        let root = self.root;
        self.cliques[root].parent = Some(NodeRef::new(self.time - 1, donor));
        self.cliques[root].parent_separator = Some(SepRef::Link);
        self.link = Some(TransientSeparator {
            members,
            factor: None,
        });
    }

    /// Local pre-order from the slice root.
    pub fn pre_order(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.cliques.len());
        let mut stack = vec![self.root];
        while let Some(c) = stack.pop() {
            out.push(c);
            for child in self.cliques[c].children.iter().rev() {
                if child.slice == self.time {
                    stack.push(child.clique);
                }
            }
        }
        out
    }
}

/// All per-slice trees of one calibration, linked into a single tree.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    trees: Vec<JunctionTree>,
}

impl Forest {
    pub fn new(trees: Vec<JunctionTree>) -> Self {
        Self { trees }
    }

    pub fn trees(&self) -> &[JunctionTree] {
        &self.trees
    }

    pub fn trees_mut(&mut self) -> &mut [JunctionTree] {
        &mut self.trees
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.trees.first().map(|t| NodeRef::new(0, t.root))
    }

    pub fn clique(&self, node: NodeRef) -> &TransientClique {
        &self.trees[node.slice].cliques[node.clique]
    }

    pub fn clique_mut(&mut self, node: NodeRef) -> &mut TransientClique {
        &mut self.trees[node.slice].cliques[node.clique]
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.clique(node).parent
    }

    pub fn parent_separator(&self, node: NodeRef) -> Option<&TransientSeparator> {
        match self.clique(node).parent_separator? {
            SepRef::Local(i) => self.trees[node.slice].separators.get(i),
            SepRef::Link => self.trees[node.slice].link.as_ref(),
        }
    }

    pub fn parent_separator_mut(&mut self, node: NodeRef) -> Option<&mut TransientSeparator> {
        match self.clique(node).parent_separator? {
            SepRef::Local(i) => self.trees[node.slice].separators.get_mut(i),
            SepRef::Link => self.trees[node.slice].link.as_mut(),
        }
    }

    /// Adds `child` (a slice root) below `parent` in the previous slice.
    pub(crate) fn attach(&mut self, parent: NodeRef, child: NodeRef) {
        self.clique_mut(parent).children.push(child);
    }

    /// Global pre-order from the root of slice 0.
    pub fn pre_order(&self) -> Vec<NodeRef> {
        let mut out = Vec::new();
        let Some(root) = self.root() else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            out.push(n);
            for child in self.clique(n).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Path from `node` up to the global root, `node` first.
    pub fn path_to_root(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut path = vec![node];
        let mut cur = node;
        while let Some(p) = self.parent(cur) {
            path.push(p);
            cur = p;
        }
        path
    }

    /// `clique factor ⊗ parent-separator factor`: the joint over the clique
    /// once calibrated.
    pub fn joint(&self, node: NodeRef) -> Result<Factor> {
        let clique = self.clique(node);
        match self.parent_separator(node).and_then(|s| s.factor.as_ref()) {
            Some(sep) => sep.combine(&clique.factor),
            None => Ok(clique.factor.clone()),
        }
    }
}
