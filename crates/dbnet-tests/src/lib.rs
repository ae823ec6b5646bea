//! Shared network fixtures for the dbnet integration tests.

use dbnet_core::distribution::{ConditionalTable, Gaussian, LinearGaussian, Mixture, MixtureOf};
use dbnet_core::{DynamicNetwork, Factor, VariableId, VariableKind};

/// `P(A)` of the three-node chain.
pub const PRIOR_A: [f64; 2] = [0.6, 0.4];
/// `P(B | A)`, one row per state of `A`.
pub const CPT_B: [[f64; 2]; 2] = [[0.7, 0.3], [0.2, 0.8]];
/// `P(C | B)`, one row per state of `B`.
pub const CPT_C: [[f64; 2]; 2] = [[0.9, 0.1], [0.4, 0.6]];

fn table(parent_dims: Vec<usize>, rows: &[[f64; 2]]) -> ConditionalTable {
    let rows = rows.iter().map(|r| r.to_vec()).collect();
    ConditionalTable::new(parent_dims, rows).expect("valid table")
}

/// Static binary chain `A -> B -> C`.
pub fn three_node_chain() -> (DynamicNetwork, [VariableId; 3]) {
    let mut net = DynamicNetwork::new(1);
    let a = net.add_variable("A", VariableKind::BINARY).expect("A");
    let b = net.add_variable("B", VariableKind::BINARY).expect("B");
    let c = net.add_variable("C", VariableKind::BINARY).expect("C");
    net.add_parent(b, a, 0).expect("A -> B");
    net.add_parent(c, b, 0).expect("B -> C");
    net.set_cpd(a, 0, table(vec![], &[PRIOR_A])).expect("P(A)");
    net.set_cpd(b, 0, table(vec![2], &CPT_B)).expect("P(B|A)");
    net.set_cpd(c, 0, table(vec![2], &CPT_C)).expect("P(C|B)");
    (net, [a, b, c])
}

/// Brute-force joint `P(A, B, C)` restricted to `evidence` (one optional
/// state per variable), row-major over `[A, B, C]`, unnormalized.
pub fn three_node_joint(evidence: [Option<usize>; 3]) -> [f64; 8] {
    let mut out = [0.0; 8];
    for a in 0..2 {
        for b in 0..2 {
            for c in 0..2 {
                let consistent = [a, b, c]
                    .iter()
                    .zip(evidence.iter())
                    .all(|(s, e)| e.map_or(true, |e| e == *s));
                if consistent {
                    out[a * 4 + b * 2 + c] = PRIOR_A[a] * CPT_B[a][b] * CPT_C[b][c];
                }
            }
        }
    }
    out
}

/// Binary chain `X -> Y` with `P(X) = [0.3, 0.7]` and
/// `P(Y | X) = [[0.9, 0.1], [0.2, 0.8]]`.
pub fn binary_chain() -> (DynamicNetwork, VariableId, VariableId) {
    let mut net = DynamicNetwork::new(1);
    let x = net.add_variable("X", VariableKind::BINARY).expect("X");
    let y = net.add_variable("Y", VariableKind::BINARY).expect("Y");
    net.add_parent(y, x, 0).expect("X -> Y");
    let px = table(vec![], &[[0.3, 0.7]]);
    let py = table(vec![2], &[[0.9, 0.1], [0.2, 0.8]]);
    net.set_cpd(x, 0, px).expect("P(X)");
    net.set_cpd(y, 0, py).expect("P(Y|X)");
    (net, x, y)
}

/// Hybrid chain `D -> X -> Y`: a binary switch selects the mean of `X`, and
/// `Y` is a noisy linear reading of `X`.
pub fn hybrid_switch() -> (DynamicNetwork, VariableId, VariableId, VariableId) {
    let mut net = DynamicNetwork::new(1);
    let d = net.add_variable("D", VariableKind::BINARY).expect("D");
    let x = net.add_variable("X", VariableKind::Continuous).expect("X");
    let y = net.add_variable("Y", VariableKind::Continuous).expect("Y");
    net.add_parent(x, d, 0).expect("D -> X");
    net.add_parent(y, x, 0).expect("X -> Y");
    let pd = table(vec![], &[[0.4, 0.6]]);
    let branches = vec![
        Gaussian::univariate(-1.0, 0.5).expect("X | D=0"),
        Gaussian::univariate(2.0, 1.5).expect("X | D=1"),
    ];
    let px = Mixture::GaussianMix(MixtureOf::new(vec![2], branches, None).expect("mixture"));
    let py = LinearGaussian::univariate(0.5, vec![2.0], 0.25).expect("linear Gaussian");
    net.set_cpd(d, 0, pd).expect("P(D)");
    net.set_cpd(x, 0, px).expect("P(X|D)");
    net.set_cpd(y, 0, py).expect("P(Y|X)");
    (net, d, x, y)
}

/// Two-state Markov chain over `slices` slices with sticky transitions.
pub fn markov_chain(slices: usize) -> (DynamicNetwork, VariableId) {
    let mut net = DynamicNetwork::new(slices);
    let x = net.add_variable("x", VariableKind::BINARY).expect("x");
    net.add_parent(x, x, 1).expect("x(t-1) -> x(t)");
    let prior = table(vec![], &[[0.5, 0.5]]);
    let transition = table(vec![2], &[[0.9, 0.1], [0.1, 0.9]]);
    net.set_cpd(x, 0, prior).expect("prior");
    net.set_cpd(x, 1, transition).expect("transition");
    (net, x)
}

/// Probability table of a purely discrete factor.
pub fn probabilities(factor: &Factor) -> Vec<f64> {
    factor.table().expect("discrete factor").values().to_vec()
}

pub fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    let message = format!("{:?} vs {:?}", actual, expected);
    assert_eq!(actual.len(), expected.len(), "{}", message);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= tol, "{} (tolerance {})", message, tol);
    }
}
