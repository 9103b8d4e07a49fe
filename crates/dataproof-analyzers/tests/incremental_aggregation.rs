use dataproof_analyzers::{
    AnalysisOptions, AnalysisRunner, Analyzer, AnalyzerContext, FailureKind,
    FileSystemRepository, InMemoryEngine, InMemoryRepository, MetricsRepository, ResultKey,
};
use dataproof_core::{Column, ColumnType, Schema, Table, Value};

fn schema() -> Schema {
    Schema::new(vec![
        Column::new("id", ColumnType::Integral),
        Column::new("city", ColumnType::String),
    ])
}

fn batch(rows: &[(Option<i64>, &str)]) -> Table {
    let rows = rows
        .iter()
        .map(|(id, city)| vec![Value::from(*id), Value::from(*city)])
        .collect();
    Table::new(schema(), rows).expect("table")
}

fn monday() -> Table {
    batch(&[(Some(1), "Lisbon"), (Some(2), "Porto"), (None, "Lisbon")])
}

fn tuesday() -> Table {
    batch(&[(Some(3), "Braga"), (Some(2), "Porto"), (Some(5), "Lisbon"), (Some(8), "Faro")])
}

fn analyzers() -> Vec<Analyzer> {
    vec![
        Analyzer::size(),
        Analyzer::completeness("id"),
        Analyzer::mean("id"),
        Analyzer::maximum("id"),
        Analyzer::uniqueness(&["id"]),
        Analyzer::count_distinct(&["city"]),
        Analyzer::approx_quantile("id", 0.5),
    ]
}

fn run_with(
    repository: &dyn MetricsRepository,
    options: AnalysisOptions,
    table: &Table,
) -> AnalyzerContext {
    AnalysisRunner::new(options)
        .with_repository(repository)
        .run(&InMemoryEngine::new(2), table, &analyzers())
        .expect("run")
}

fn key(day: i64) -> ResultKey {
    ResultKey::new(day * 86_400_000).with_tag("source", "orders")
}

fn assert_incremental_matches_full(repository: &dyn MetricsRepository) {
    run_with(
        repository,
        AnalysisOptions {
            save_states_with: Some(key(1)),
            ..AnalysisOptions::default()
        },
        &monday(),
    );
    let incremental = run_with(
        repository,
        AnalysisOptions {
            aggregate_with: vec![key(1)],
            save_states_with: Some(key(2)),
            ..AnalysisOptions::default()
        },
        &tuesday(),
    );

    let union = monday().union(&tuesday()).expect("union");
    let full = AnalysisRunner::new(AnalysisOptions::default())
        .run(&InMemoryEngine::new(1), &union, &analyzers())
        .expect("run");

    assert_eq!(incremental, full);
    assert_eq!(
        incremental.metric(&Analyzer::size()).and_then(|m| m.as_f64()),
        Some(7.0)
    );
    // id 2 appears on both days, so it is no longer unique.
    assert_eq!(
        incremental
            .metric(&Analyzer::uniqueness(&["id"]))
            .and_then(|m| m.as_f64()),
        Some(4.0 / 7.0)
    );
}

#[test]
fn aggregating_stored_states_matches_a_full_scan() {
    let repository = InMemoryRepository::new();
    assert_incremental_matches_full(&repository);
}

#[test]
fn aggregation_works_through_the_file_system() {
    let dir = tempfile::tempdir().expect("tempdir");
    let repository = FileSystemRepository::new(dir.path()).expect("repository");
    assert_incremental_matches_full(&repository);

    // A second handle on the same directory sees the same states.
    let reopened = FileSystemRepository::new(dir.path()).expect("repository");
    let entry = reopened.load(&key(2)).expect("load").expect("entry");
    assert!(!entry.states.is_empty());
}

#[test]
fn aggregated_states_alone_produce_metrics() {
    let repository = InMemoryRepository::new();
    for (day, table) in [(1, monday()), (2, tuesday())] {
        run_with(
            &repository,
            AnalysisOptions {
                save_states_with: Some(key(day)),
                ..AnalysisOptions::default()
            },
            &table,
        );
    }

    let union = monday().union(&tuesday()).expect("union");
    let full = AnalysisRunner::new(AnalysisOptions::default())
        .run(&InMemoryEngine::new(1), &union, &analyzers())
        .expect("run");
    let from_states = AnalysisRunner::new(AnalysisOptions::default())
        .with_repository(&repository)
        .run_on_aggregated_states(&schema(), &analyzers(), &[key(1), key(2)])
        .expect("aggregate");
    assert_eq!(from_states, full);
}

#[test]
fn force_fresh_ignores_stored_states() {
    let repository = InMemoryRepository::new();
    run_with(
        &repository,
        AnalysisOptions {
            save_states_with: Some(key(1)),
            ..AnalysisOptions::default()
        },
        &monday(),
    );
    let context = run_with(
        &repository,
        AnalysisOptions {
            aggregate_with: vec![key(1)],
            force_fresh: [Analyzer::size()].into_iter().collect(),
            ..AnalysisOptions::default()
        },
        &tuesday(),
    );
    assert_eq!(context.metric(&Analyzer::size()).and_then(|m| m.as_f64()), Some(4.0));
    assert_eq!(
        context
            .metric(&Analyzer::completeness("id"))
            .and_then(|m| m.as_f64()),
        Some(6.0 / 7.0)
    );
}

#[test]
fn missing_states_to_aggregate_with_are_skipped() {
    let repository = InMemoryRepository::new();
    let context = run_with(
        &repository,
        AnalysisOptions {
            aggregate_with: vec![key(9)],
            ..AnalysisOptions::default()
        },
        &tuesday(),
    );
    assert_eq!(context.metric(&Analyzer::size()).and_then(|m| m.as_f64()), Some(4.0));
}

#[test]
fn aggregated_states_report_missing_descriptors() {
    let repository = InMemoryRepository::new();
    let context = AnalysisRunner::new(AnalysisOptions::default())
        .with_repository(&repository)
        .run_on_aggregated_states(&schema(), &[Analyzer::size()], &[key(1)])
        .expect("aggregate");
    let failure = context
        .metric(&Analyzer::size())
        .and_then(|metric| metric.failure())
        .expect("failure");
    assert_eq!(failure.kind, FailureKind::InsufficientData);
}
