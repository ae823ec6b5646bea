//! Property tests for the discrete layout and table algebra.

use dbnet_core::distribution::{index, Table};
use dbnet_core::{Dim, Factor, TransientId, Value};
use proptest::prelude::*;

fn layout() -> impl Strategy<Value = (Vec<usize>, usize)> {
    prop::collection::vec(1usize..5, 0..5).prop_flat_map(|dims| {
        let n = index::cardinality(&dims);
        (Just(dims), 0..n)
    })
}

fn table(max_dims: usize) -> impl Strategy<Value = (Vec<usize>, Vec<f64>)> {
    prop::collection::vec(1usize..4, 1..=max_dims).prop_flat_map(|dims| {
        let n = index::cardinality(&dims);
        (Just(dims), prop::collection::vec(0.0f64..10.0, n))
    })
}

fn positive(card: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.01f64..10.0, card)
}

proptest! {
    #[test]
    fn flat_index_round_trips((dims, flat) in layout()) {
        let states = index::unflatten(flat, &dims);
        prop_assert_eq!(states.len(), dims.len());
        prop_assert!(states.iter().zip(&dims).all(|(s, d)| s < d));
        prop_assert_eq!(index::flat_index(&states, &dims), flat);
    }

    #[test]
    fn normalized_table_sums_to_one((dims, values) in table(3)) {
        let all_zero = values.iter().all(|v| *v == 0.0);
        let t = Table::new(dims, values).expect("valid table").normalized();
        prop_assert!((t.sum() - 1.0).abs() < 1e-9);
        if all_zero {
            let u = 1.0 / t.len() as f64;
            prop_assert!(t.values().iter().all(|v| (v - u).abs() < 1e-12));
        }
    }

    #[test]
    fn all_zero_table_normalizes_to_uniform(dims in prop::collection::vec(1usize..4, 1..4)) {
        let n = index::cardinality(&dims);
        let t = Table::new(dims, vec![0.0; n]).expect("valid table").normalized();
        prop_assert!(t.values().iter().all(|v| (v - 1.0 / n as f64).abs() < 1e-12));
    }

    #[test]
    fn independent_factors_marginalize_back(
        (a, b) in (1usize..5, 1usize..5).prop_flat_map(|(na, nb)| (positive(na), positive(nb)))
    ) {
        let x = TransientId(0);
        let y = TransientId(1);
        let fa = Factor::from_table(
            vec![Dim::new(x, a.len())],
            Table::new(vec![a.len()], a.clone()).expect("A"),
        ).expect("factor A");
        let fb = Factor::from_table(
            vec![Dim::new(y, b.len())],
            Table::new(vec![b.len()], b).expect("B"),
        ).expect("factor B");
        let back = fa.combine(&fb).expect("combine")
            .marginalize(y).expect("marginalize")
            .normalized().expect("normalize");
        let expected = Table::new(vec![a.len()], a).expect("A").normalized();
        let got = back.table().expect("discrete");
        for (g, e) in got.values().iter().zip(expected.values()) {
            prop_assert!((g - e).abs() < 1e-9, "{:?} vs {:?}", got.values(), expected.values());
        }
    }

    #[test]
    fn evidence_slices_the_table(
        (nx, ny, values, v) in (1usize..5, 1usize..5).prop_flat_map(|(nx, ny)| {
            (Just(nx), Just(ny), prop::collection::vec(0.0f64..10.0, nx * ny), 0..nx)
        })
    ) {
        let t = Table::new(vec![nx, ny], values.clone()).expect("table");
        let slice = t.set_evidence(0, v).expect("evidence");
        prop_assert_eq!(slice.dims(), &[ny][..]);
        prop_assert_eq!(slice.values(), &values[v * ny..(v + 1) * ny]);

        let x = TransientId(0);
        let y = TransientId(1);
        let f = Factor::from_table(vec![Dim::new(x, nx), Dim::new(y, ny)], t).expect("factor");
        let observed = f.set_evidence(x, Value::State(v)).expect("evidence");
        prop_assert_eq!(observed.discrete().len(), 1);
        prop_assert!(!observed.contains(x));
        prop_assert!(observed.contains(y));
    }
}
