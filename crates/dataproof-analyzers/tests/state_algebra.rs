use dataproof_analyzers::engine::{ExecutionEngine, ScanRequest};
use dataproof_analyzers::{Computation, Descriptor, InMemoryEngine, Probability, State};
use dataproof_core::{Column, ColumnType, Schema, Table, Value};
use proptest::prelude::*;

fn table_of(values: &[(Option<i64>, i64, u8)]) -> Table {
    let schema = Schema::new(vec![
        Column::new("x", ColumnType::Integral),
        Column::new("y", ColumnType::Integral),
        Column::new("tag", ColumnType::String),
    ]);
    let rows = values
        .iter()
        .map(|(x, y, tag)| {
            vec![
                Value::from(*x),
                Value::Int(*y),
                Value::Text(format!("t{}", tag % 5)),
            ]
        })
        .collect();
    Table::new(schema, rows).expect("table")
}

fn aggregation_descriptors() -> Vec<Descriptor> {
    let column = |name: &str| name.to_string();
    [
        Computation::RowCount,
        Computation::NonNullCount { column: column("x") },
        Computation::PredicateCount {
            predicate: "x IS NULL OR x >= 0".to_string(),
        },
        Computation::Moments { column: column("x") },
        Computation::Extrema { column: column("x") },
        Computation::LengthExtrema {
            column: column("tag"),
        },
        Computation::Correlation {
            first: column("x"),
            second: column("y"),
        },
        Computation::Quantiles {
            column: column("x"),
            relative_accuracy: Probability::new(0.01),
        },
        Computation::DistinctEstimate { column: column("x") },
        Computation::DataTypes { column: column("x") },
    ]
    .into_iter()
    .map(|computation| Descriptor::new(computation, None))
    .collect()
}

fn grouping_descriptors() -> Vec<Descriptor> {
    vec![Descriptor::new(
        Computation::Frequencies {
            columns: vec!["tag".to_string(), "x".to_string()],
        },
        None,
    )]
}

/// Scan with the given partition count and merge partitions from the identity.
fn scan(table: &Table, partitions: usize, descriptors: &[Descriptor]) -> Vec<State> {
    let engine = InMemoryEngine::new(partitions);
    let shape = descriptors[0].shape();
    let scans = engine
        .scan_partitions(
            table,
            &ScanRequest {
                shape: &shape,
                descriptors,
            },
        )
        .expect("scan");
    descriptors
        .iter()
        .zip(scans)
        .map(|(descriptor, partitions)| {
            let partitions = partitions.expect("descriptor scanned");
            State::merge_all(State::empty(&descriptor.computation), &partitions).expect("merge")
        })
        .collect()
}

fn all_states(table: &Table, partitions: usize) -> Vec<State> {
    let mut states = scan(table, partitions, &aggregation_descriptors());
    states.extend(scan(table, partitions, &grouping_descriptors()));
    states
}

fn merge_pairwise(left: &[State], right: &[State]) -> Vec<State> {
    left.iter()
        .zip(right)
        .map(|(a, b)| a.merge(b).expect("merge"))
        .collect()
}

fn rows() -> impl Strategy<Value = Vec<(Option<i64>, i64, u8)>> {
    prop::collection::vec(
        (prop::option::of(-1_000i64..1_000), -50i64..50, any::<u8>()),
        0..60,
    )
}

proptest! {
    #[test]
    fn partitioning_does_not_change_states(values in rows(), partitions in 1usize..9) {
        let table = table_of(&values);
        prop_assert_eq!(all_states(&table, 1), all_states(&table, partitions));
    }

    #[test]
    fn merge_is_commutative(a in rows(), b in rows()) {
        let left = all_states(&table_of(&a), 1);
        let right = all_states(&table_of(&b), 1);
        prop_assert_eq!(merge_pairwise(&left, &right), merge_pairwise(&right, &left));
    }

    #[test]
    fn merge_is_associative(a in rows(), b in rows(), c in rows()) {
        let sa = all_states(&table_of(&a), 1);
        let sb = all_states(&table_of(&b), 1);
        let sc = all_states(&table_of(&c), 1);
        let left = merge_pairwise(&merge_pairwise(&sa, &sb), &sc);
        let right = merge_pairwise(&sa, &merge_pairwise(&sb, &sc));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn merging_halves_equals_whole(values in rows(), split in 0usize..60) {
        let split = split.min(values.len());
        let whole = all_states(&table_of(&values), 1);
        let first = all_states(&table_of(&values[..split]), 1);
        let second = all_states(&table_of(&values[split..]), 1);
        prop_assert_eq!(merge_pairwise(&first, &second), whole);
    }
}

#[test]
fn empty_dataset_yields_identity_states() {
    let table = table_of(&[]);
    let states = all_states(&table, 4);
    let expected: Vec<State> = aggregation_descriptors()
        .iter()
        .chain(grouping_descriptors().iter())
        .map(|descriptor| State::empty(&descriptor.computation))
        .collect();
    assert_eq!(states, expected);
}
