//! # dbnet Calibration Benchmarks
//!
//! Hybrid switching chain: a discrete regime `d` with a first-order Markov
//! transition drives a continuous `x` that also depends on its own previous
//! value. Evidence on the last `x` is re-entered each iteration so every run
//! recalibrates from scratch.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dbnet_core::distribution::ConditionalTable;
use dbnet_core::inference::{
    InferenceAlgorithm, InferenceProperties, JunctionTreeQuery, NullProgress, VariableElimination,
};
use dbnet_core::{DynamicNetwork, Value, VariableId, VariableKind};

fn switching_chain(slices: usize) -> (DynamicNetwork, VariableId, VariableId) {
    let mut net = DynamicNetwork::new(slices);
    let d = net.add_variable("d", VariableKind::BINARY).expect("d");
    let x = net.add_variable("x", VariableKind::Continuous).expect("x");
    net.add_parent(d, d, 1).expect("regime transition");
    net.add_parent(x, d, 0).expect("regime drives signal");
    net.add_parent(x, x, 1).expect("signal transition");
    let rows = vec![vec![0.95, 0.05], vec![0.1, 0.9]];
    let transition = ConditionalTable::new(vec![2], rows).expect("transition");
    net.set_cpd(d, 1, transition).expect("set transition");
    net.set_query(d, 0, true).expect("query");
    (net, d, x)
}

fn bench_junction_tree(c: &mut Criterion) {
    let mut group = c.benchmark_group("junction_tree_calibration");

    for slices in [2usize, 8, 32].iter() {
        group.throughput(Throughput::Elements(*slices as u64));
        group.bench_with_input(BenchmarkId::from_parameter(slices), slices, |b, &slices| {
            let (mut net, _, x) = switching_chain(slices);
            let props = InferenceProperties::default();
            let last = slices - 1;
            let mut flip = false;
            b.iter(|| {
                flip = !flip;
                let obs = if flip { 1.0 } else { -1.0 };
                net.set_evidence(x, last, Value::Real(obs)).expect("obs");
                let joint = JunctionTreeQuery
                    .execute(&mut net, false, &props, &mut NullProgress)
                    .expect("query");
                black_box(joint);
            });
        });
    }

    group.finish();
}

fn bench_all_marginals(c: &mut Criterion) {
    let mut group = c.benchmark_group("all_marginals");

    for slices in [2usize, 8].iter() {
        let id = BenchmarkId::new("junction-tree", slices);
        group.bench_with_input(id, slices, |b, &slices| {
            let (mut net, _, x) = switching_chain(slices);
            let last = slices - 1;
            net.set_evidence(x, last, Value::Real(0.5)).expect("obs");
            let props = InferenceProperties::default();
            b.iter(|| {
                black_box(
                    JunctionTreeQuery
                        .execute(&mut net, true, &props, &mut NullProgress)
                        .expect("marginals"),
                );
            });
        });
        let id = BenchmarkId::new("variable-elimination", slices);
        group.bench_with_input(id, slices, |b, &slices| {
            let (mut net, _, x) = switching_chain(slices);
            let last = slices - 1;
            net.set_evidence(x, last, Value::Real(0.5)).expect("obs");
            let props = InferenceProperties::default();
            b.iter(|| {
                black_box(
                    VariableElimination
                        .execute(&mut net, true, &props, &mut NullProgress)
                        .expect("marginals"),
                );
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_junction_tree, bench_all_marginals);
criterion_main!(benches);
