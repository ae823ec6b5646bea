//! Structural solver: triangulates the template graph of each template
//! offset into cliques and joins them into a tree.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::errors::{InferenceError, Result};
use crate::junction::clique::{Clique, CliqueGraph, CliqueSeparator, GraphVariable};
use crate::model::template::TemplateVariable;

/// Produces one [`CliqueGraph`] per template offset `0..=max_lag`.
pub trait StructuralSolver: Send {
    fn solve(&self, templates: &[TemplateVariable]) -> Result<Vec<CliqueGraph>>;
}

/// Strong triangulation: moralize, complete the slice interfaces, eliminate
/// continuous variables before discrete ones (min-fill, then min-degree),
/// keep maximal cliques and join them with a maximum-weight spanning tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriangulationSolver;

impl StructuralSolver for TriangulationSolver {
    fn solve(&self, templates: &[TemplateVariable]) -> Result<Vec<CliqueGraph>> {
        let max_lag = templates
            .iter()
            .map(TemplateVariable::max_lag)
            .max()
            .unwrap_or(0);
        (0..=max_lag)
            .map(|k| solve_offset(templates, k, max_lag))
            .collect()
    }
}

/// Past variables (lag ≥ 1) a slice at template offset `k` must see: every
/// `(p, l)` such that some variable has `p` as a parent at a lag of at least `l`.
pub fn incoming(templates: &[TemplateVariable], k: usize) -> Vec<GraphVariable> {
    let mut out = BTreeSet::new();
    for c in templates {
        for lag in 1..=c.max_lag() {
            for &p in c.parents_at_lag(lag) {
                for l in 1..=lag.min(k) {
                    out.insert((l, p));
                }
            }
        }
    }
    out.into_iter()
        .map(|(lag, variable)| GraphVariable::new(variable, lag))
        .collect()
}

/// Variables of a slice at offset `k` that the next slice receives, with lags
/// relative to this slice.
pub fn outgoing(templates: &[TemplateVariable], k: usize, max_lag: usize) -> Vec<GraphVariable> {
    if max_lag == 0 {
        return Vec::new();
    }
    incoming(templates, (k + 1).min(max_lag))
        .into_iter()
        .map(|g| GraphVariable::new(g.variable, g.lag - 1))
        .collect()
}

struct Graph {
    nodes: Vec<GraphVariable>,
    continuous: Vec<bool>,
    adj: Vec<FxHashSet<usize>>,
}

impl Graph {
    fn complete(&mut self, members: &[usize]) {
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                if a != b {
                    self.adj[a].insert(b);
                    self.adj[b].insert(a);
                }
            }
        }
    }

    fn fill_in(&self, v: usize, alive: &[bool]) -> usize {
        let nbrs: Vec<usize> = self.adj[v].iter().copied().filter(|&u| alive[u]).collect();
        let mut missing = 0;
        for (i, &a) in nbrs.iter().enumerate() {
            for &b in &nbrs[i + 1..] {
                if !self.adj[a].contains(&b) {
                    missing += 1;
                }
            }
        }
        missing
    }
}

fn solve_offset(templates: &[TemplateVariable], k: usize, max_lag: usize) -> Result<CliqueGraph> {
    let incoming = incoming(templates, k);
    let outgoing = outgoing(templates, k, max_lag);

    let mut nodes: Vec<GraphVariable> = templates
        .iter()
        .map(|v| GraphVariable::new(v.id(), 0))
        .collect();
    nodes.extend(incoming.iter().copied());
    let index: FxHashMap<GraphVariable, usize> =
        nodes.iter().enumerate().map(|(i, g)| (*g, i)).collect();
    let lookup = |g: &GraphVariable| {
        index.get(g).copied().ok_or_else(|| {
            InferenceError::Internal(format!("graph variable {} missing at offset {}", g, k))
        })
    };
    let continuous = nodes
        .iter()
        .map(|g| !templates[g.variable.index()].is_discrete())
        .collect();
    let n = nodes.len();
    let mut graph = Graph {
        nodes,
        continuous,
        adj: vec![FxHashSet::default(); n],
    };

    for c in templates {
        let mut family = vec![lookup(&GraphVariable::new(c.id(), 0))?];
        for (p, lag) in c.parents_for_offset(k.min(c.max_lag())) {
            family.push(lookup(&GraphVariable::new(p, lag))?);
        }
        graph.complete(&family);
    }
    let incoming_idx = incoming.iter().map(&lookup).collect::<Result<Vec<_>>>()?;
    let outgoing_idx = outgoing.iter().map(&lookup).collect::<Result<Vec<_>>>()?;
    graph.complete(&incoming_idx);
    graph.complete(&outgoing_idx);

    let elimination_cliques = eliminate(&mut graph);
    let cliques = maximal(elimination_cliques);
    let separators = spanning_tree(&cliques);

    let to_members = |c: &Vec<usize>| c.iter().map(|&i| graph.nodes[i]).collect::<Vec<_>>();
    let contains_all = |c: &Vec<usize>, set: &[usize]| set.iter().all(|i| c.contains(i));
    let backward = (!incoming_idx.is_empty())
        .then(|| cliques.iter().position(|c| contains_all(c, &incoming_idx)))
        .flatten();
    let forward = (!outgoing_idx.is_empty())
        .then(|| cliques.iter().position(|c| contains_all(c, &outgoing_idx)))
        .flatten();
    let missing_backward = !incoming_idx.is_empty() && backward.is_none();
    let missing_forward = !outgoing_idx.is_empty() && forward.is_none();
    if missing_backward || missing_forward {
        return Err(InferenceError::Structural(format!(
            "no clique holds the slice interface at offset {}",
            k
        )));
    }

    tracing::debug!(
        "offset {}: {} cliques, {} separators, interface in={} out={}",
        k,
        cliques.len(),
        separators.len(),
        incoming.len(),
        outgoing.len()
    );

    Ok(CliqueGraph {
        offset: k,
        cliques: cliques
            .iter()
            .enumerate()
            .map(|(i, c)| Clique {
                members: to_members(c),
                backward_interface: backward == Some(i),
                forward_interface: forward == Some(i),
            })
            .collect(),
        separators: separators
            .into_iter()
            .map(|(a, b, members)| CliqueSeparator {
                a,
                b,
                members: to_members(&members),
            })
            .collect(),
        incoming,
        outgoing,
    })
}

/// Eliminates every node, continuous ones first; returns the elimination cliques.
fn eliminate(graph: &mut Graph) -> Vec<Vec<usize>> {
    let n = graph.nodes.len();
    let mut alive = vec![true; n];
    let mut cliques = Vec::with_capacity(n);
    for _ in 0..n {
        let any_continuous = (0..n).any(|i| alive[i] && graph.continuous[i]);
        let pick = (0..n)
            .filter(|&i| alive[i] && (!any_continuous || graph.continuous[i]))
            .min_by_key(|&i| {
                let degree = graph.adj[i].iter().filter(|&&u| alive[u]).count();
                (graph.fill_in(i, &alive), degree, i)
            });
        let Some(v) = pick else { break };
        let mut nbrs: Vec<usize> = graph.adj[v].iter().copied().filter(|&u| alive[u]).collect();
        nbrs.sort_unstable();
        graph.complete(&nbrs);
        let mut clique = nbrs;
        clique.push(v);
        clique.sort_unstable();
        cliques.push(clique);
        alive[v] = false;
    }
    cliques
}

fn maximal(cliques: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
    let mut kept: Vec<Vec<usize>> = Vec::new();
    for (i, c) in cliques.iter().enumerate() {
        let subsumed = cliques.iter().enumerate().any(|(j, d)| {
            let larger = d.len() > c.len() || j < i;
            j != i && larger && c.iter().all(|x| d.contains(x))
        });
        if !subsumed {
            kept.push(c.clone());
        }
    }
    kept
}

/// Kruskal maximum spanning tree on intersection size; empty separators
/// join disconnected components.
fn spanning_tree(cliques: &[Vec<usize>]) -> Vec<(usize, usize, Vec<usize>)> {
    let mut edges = Vec::new();
    for i in 0..cliques.len() {
        for j in i + 1..cliques.len() {
            let shared: Vec<usize> = cliques[i]
                .iter()
                .copied()
                .filter(|x| cliques[j].contains(x))
                .collect();
            edges.push((shared.len(), i, j, shared));
        }
    }
    edges.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    let mut parent: Vec<usize> = (0..cliques.len()).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    let mut out = Vec::new();
    for (_, i, j, shared) in edges {
        let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
        if ri != rj {
            parent[ri] = rj;
            out.push((i, j, shared));
        }
    }
    out
}
