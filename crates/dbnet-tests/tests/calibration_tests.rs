//! Calibration and unrolling tests against brute-force enumeration.

use dbnet_core::distribution::index;
use dbnet_core::inference::NullProgress;
use dbnet_core::junction::calibration::calibrate;
use dbnet_core::junction::NodeRef;
use dbnet_core::model::{EventLog, ModelEvent};
use dbnet_core::{DynamicNetwork, TransientId, Value, VariableKind};
use dbnet_tests::{assert_close, markov_chain, probabilities, three_node_chain, three_node_joint};

/// Marginal of the brute-force joint over `[A, B, C]` onto `keep`, in `keep` order.
fn brute_marginal(
    joint: &[f64; 8],
    order: &[TransientId; 3],
    keep: &[(TransientId, usize)],
) -> Vec<f64> {
    let dims: Vec<usize> = keep.iter().map(|(_, card)| *card).collect();
    let mut out = vec![0.0; index::cardinality(&dims)];
    for (flat, p) in joint.iter().enumerate() {
        let states = index::unflatten(flat, &[2, 2, 2]);
        let projected: Vec<usize> = keep
            .iter()
            .map(|(v, _)| {
                let pos = order.iter().position(|o| o == v).expect("chain variable");
                states[pos]
            })
            .collect();
        out[index::flat_index(&projected, &dims)] += p;
    }
    let total: f64 = out.iter().sum();
    out.iter().map(|v| v / total).collect()
}

#[test]
fn every_clique_matches_brute_force() {
    let cases = [
        [None, None, None],
        [None, None, Some(1)],
        [Some(0), None, Some(1)],
    ];
    for evidence in cases {
        let (mut net, vars) = three_node_chain();
        for (var, e) in vars.iter().zip(evidence) {
            if let Some(s) = e {
                net.set_evidence(*var, 0, Value::State(s)).expect("state");
            }
        }
        let log_e = calibrate(&mut net, 1, &mut NullProgress, None).expect("calibrate");
        let joint = three_node_joint(evidence);
        assert!((log_e - joint.iter().sum::<f64>().ln()).abs() < 1e-12);

        let order = [
            net.lookup(vars[0], 0).expect("A"),
            net.lookup(vars[1], 0).expect("B"),
            net.lookup(vars[2], 0).expect("C"),
        ];
        let forest = net.junction_tree_template().forest();
        assert_eq!(forest.len(), 1);
        for i in 0..forest.trees()[0].cliques().len() {
            let marginal = forest
                .joint(NodeRef::new(0, i))
                .expect("joint")
                .normalized()
                .expect("normalize");
            let keep: Vec<(TransientId, usize)> = marginal
                .discrete()
                .iter()
                .map(|d| (d.var, d.card))
                .collect();
            let expected = brute_marginal(&joint, &order, &keep);
            assert_close(&probabilities(&marginal), &expected, 1e-12);
        }
    }
}

#[test]
fn recalibrates_only_when_something_changed() {
    let log = EventLog::new();
    let (net, x) = markov_chain(3);
    let mut net = net.with_observer(Box::new(log.clone()));
    net.set_evidence(x, 2, Value::State(1)).expect("evidence");
    let first = calibrate(&mut net, 3, &mut NullProgress, None).expect("first");
    let again = calibrate(&mut net, 3, &mut NullProgress, None).expect("cached");
    assert_eq!(first, again);
    let calibrations = |log: &EventLog| {
        log.events()
            .iter()
            .filter(|e| matches!(e, ModelEvent::Calibrated { .. }))
            .count()
    };
    assert_eq!(calibrations(&log), 1);

    net.set_evidence(x, 1, Value::State(0)).expect("evidence");
    calibrate(&mut net, 3, &mut NullProgress, None).expect("recalibrate");
    assert_eq!(calibrations(&log), 2);
    // P(x1=0, x2=1) = 0.5 * 0.1
    let template = net.junction_tree_template();
    let log_e = template.log_evidence().expect("log evidence");
    assert!((log_e - 0.05f64.ln()).abs() < 1e-12);
}

#[test]
fn slices_hold_one_instance_per_template_in_topological_order() {
    let mut net = DynamicNetwork::new(4);
    let d = net.add_variable("d", VariableKind::BINARY).expect("d");
    let x = net.add_variable("x", VariableKind::Continuous).expect("x");
    let y = net.add_variable("y", VariableKind::Continuous).expect("y");
    net.add_parent(d, d, 1).expect("d(t-1) -> d(t)");
    net.add_parent(x, d, 0).expect("d -> x");
    net.add_parent(x, x, 1).expect("x(t-1) -> x(t)");
    net.add_parent(y, x, 0).expect("x -> y");
    net.add_parent(y, d, 2).expect("d(t-2) -> y(t)");

    for t in 0..4 {
        let ids = net.get_slice(t).expect("slice").to_vec();
        assert_eq!(ids.len(), 3);
        let graph = net.transient_graph().expect("graph");
        let mut seen = Vec::new();
        for id in &ids {
            let var = graph.get(*id);
            assert_eq!(var.time(), t);
            for p in var.parents() {
                let parent = graph.get(*p);
                assert!(parent.time() <= t);
                let ordered = parent.time() < t || seen.contains(p);
                assert!(ordered, "{} before its parent {}", id, p);
            }
            seen.push(*id);
        }
    }

    let graph = net.transient_graph().expect("graph");
    let y3 = graph.get(net.lookup(y, 3).expect("y3"));
    let times: Vec<usize> = y3.parents().iter().map(|p| graph.get(*p).time()).collect();
    assert!(times.contains(&1) && times.contains(&3));
    // the lag-2 edge does not exist yet in slice 1
    let y1 = graph.get(net.lookup(y, 1).expect("y1"));
    assert_eq!(y1.parents().len(), 1);
}

#[test]
fn unrolled_slices_are_cached() {
    let (mut net, x) = markov_chain(5);
    let first = net.get_slice(4).expect("slice").to_vec();
    let again = net.get_slice(4).expect("slice").to_vec();
    assert_eq!(first, again);
    assert_eq!(net.lookup(x, 4), Some(first[0]));
    assert_eq!(net.transient_graph().expect("graph").len(), 5);
}
