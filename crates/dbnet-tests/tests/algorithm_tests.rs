//! Cross-algorithm agreement and end-to-end queries.

use dbnet_core::inference::{
    CancellationToken, GibbsConfig, GibbsSampler, InferenceAlgorithm, InferenceProperties,
    JunctionTreeQuery, NullProgress, VariableElimination, VecProgress,
};
use dbnet_core::{infer, AlgorithmRegistry, InferenceError, QueryStateError, Value};
use dbnet_tests::{assert_close, binary_chain, hybrid_switch, markov_chain, probabilities};

const END_TO_END: [f64; 2] = [0.03 / 0.59, 0.56 / 0.59];

fn exact_algorithms() -> [&'static dyn InferenceAlgorithm; 2] {
    [&JunctionTreeQuery, &VariableElimination]
}

#[test]
fn end_to_end_chain_exact_algorithms() {
    for algorithm in exact_algorithms() {
        let (mut net, x, y) = binary_chain();
        net.set_evidence(y, 0, Value::State(1)).expect("evidence");
        net.set_query(x, 0, true).expect("query");
        let props = InferenceProperties::default();
        let joint = algorithm
            .execute(&mut net, false, &props, &mut NullProgress)
            .expect("run")
            .expect("joint");
        assert_close(&probabilities(&joint), &END_TO_END, 1e-6);
        assert_close(&probabilities(&joint), &[0.0508, 0.9492], 1e-4);
    }
}

#[test]
fn end_to_end_chain_gibbs_within_sampling_error() {
    let (mut net, x, y) = binary_chain();
    net.set_evidence(y, 0, Value::State(1)).expect("evidence");
    net.set_query(x, 0, true).expect("query");
    let props = InferenceProperties {
        gibbs: GibbsConfig {
            burn_in: 1_000,
            max_samples: 41_000,
            seed: 11,
        },
        ..Default::default()
    };
    let joint = GibbsSampler
        .execute(&mut net, false, &props, &mut NullProgress)
        .expect("run")
        .expect("joint");
    assert_close(&probabilities(&joint), &END_TO_END, 0.02);
    assert_eq!(net.samples(x, 0).len(), 40_000);
    assert!(net.samples(y, 0).is_empty());
}

#[test]
fn junction_tree_and_elimination_agree_on_hybrid_network() {
    let run = |algorithm: &dyn InferenceAlgorithm| {
        let (mut net, d, x, y) = hybrid_switch();
        net.set_evidence(y, 0, Value::Real(1.7)).expect("evidence");
        net.set_query(d, 0, true).expect("query");
        let props = InferenceProperties::default();
        let joint = algorithm
            .execute(&mut net, true, &props, &mut NullProgress)
            .expect("run")
            .expect("joint");
        let x_marginal = net.marginal(x, 0).expect("marginal of X").clone();
        (joint, x_marginal)
    };
    let (jt_d, jt_x) = run(&JunctionTreeQuery);
    let (ve_d, ve_x) = run(&VariableElimination);

    assert_close(&probabilities(&jt_d), &probabilities(&ve_d), 1e-6);
    let moments = |f: &dbnet_core::Factor| {
        let mean = f.value().expected_value().expect("mean");
        let cov = f.value().covariance().expect("covariance");
        vec![mean[0], cov[0]]
    };
    assert_close(&moments(&jt_x), &moments(&ve_x), 1e-6);

    // P(D | y) from the closed form: y | D ~ N(0.5 + 2 mu_d, 4 var_d + 0.25)
    let density = |mean: f64, var: f64| {
        let z = (2.0 * std::f64::consts::PI * var).sqrt();
        (-(1.7 - mean).powi(2) / (2.0 * var)).exp() / z
    };
    let w0 = 0.4 * density(0.5 - 2.0, 4.0 * 0.5 + 0.25);
    let w1 = 0.6 * density(0.5 + 4.0, 4.0 * 1.5 + 0.25);
    let total = w0 + w1;
    assert_close(&probabilities(&jt_d), &[w0 / total, w1 / total], 1e-9);
}

#[test]
fn gibbs_guard_fails_before_sampling() {
    let (mut net, x, _) = binary_chain();
    net.set_query(x, 0, true).expect("query");
    let props = InferenceProperties {
        gibbs: GibbsConfig {
            burn_in: 5_000,
            max_samples: 5_000,
            seed: 1,
        },
        ..Default::default()
    };
    let mut progress = VecProgress::default();
    let err = GibbsSampler
        .execute(&mut net, false, &props, &mut progress)
        .unwrap_err();
    assert!(matches!(err, InferenceError::Configuration(_)));
    assert!(progress.lines.is_empty());
    assert!(net.samples(x, 0).is_empty());
}

#[test]
fn queries_and_evidence_survive_all_marginals() {
    let (mut net, x) = markov_chain(4);
    net.set_evidence(x, 3, Value::State(0)).expect("evidence");
    net.set_query(x, 1, true).expect("query");
    let props = InferenceProperties::default();
    for algorithm in exact_algorithms() {
        algorithm
            .execute(&mut net, true, &props, &mut NullProgress)
            .expect("run");
        assert!(net.is_query(x, 1));
        assert!(!net.is_query(x, 0));
        assert_eq!(net.evidence(x, 3), Some(Value::State(0)));
        // three steps back from x3=0: 0.5 * (1 + 0.8^3)
        let p0 = probabilities(net.marginal(x, 0).expect("marginal"))[0];
        assert!((p0 - 0.5 * (1.0 + 0.8f64.powi(3))).abs() < 1e-12);
        assert!(matches!(
            net.marginal(x, 3),
            Err(InferenceError::Query(QueryStateError::MarginalsNotRequested))
        ));
    }
}

#[test]
fn horizon_override_limits_the_query() {
    let (mut net, x) = markov_chain(6);
    net.set_query(x, 4, true).expect("query in the far slice");
    net.set_query(x, 1, true).expect("query in the near slice");
    let props = InferenceProperties {
        max_slices: Some(3),
        ..Default::default()
    };
    let joint = VariableElimination
        .execute(&mut net, false, &props, &mut NullProgress)
        .expect("run")
        .expect("joint");
    assert_eq!(joint.discrete().len(), 1);
}

#[test]
fn cancelled_runs_report_cancellation() {
    let (mut net, x) = markov_chain(4);
    net.set_query(x, 2, true).expect("query");
    let token = CancellationToken::new();
    token.cancel();
    let props = InferenceProperties {
        cancellation: Some(token),
        ..Default::default()
    };
    for name in ["junction-tree", "gibbs"] {
        let err = infer(name, &mut net, false, &props, &mut NullProgress).unwrap_err();
        let cancelled = matches!(err, InferenceError::Cancelled);
        assert!(cancelled, "{}: {}", name, err);
        assert!(err.is_recoverable());
    }
    assert!(!net.junction_tree_template().is_calibrated());
}

#[test]
fn registry_dispatches_by_name() {
    let registry = AlgorithmRegistry::default();
    let (mut net, x, y) = binary_chain();
    net.set_evidence(y, 0, Value::State(1)).expect("evidence");
    net.set_query(x, 0, true).expect("query");
    let algorithm = registry.get("variable-elimination").expect("registered");
    let props = InferenceProperties::default();
    let joint = algorithm
        .execute(&mut net, false, &props, &mut NullProgress)
        .expect("run")
        .expect("joint");
    assert_close(&probabilities(&joint), &END_TO_END, 1e-12);

    let err = infer("loopy-bp", &mut net, false, &props, &mut NullProgress).unwrap_err();
    assert!(matches!(err, InferenceError::Configuration(_)));
}
