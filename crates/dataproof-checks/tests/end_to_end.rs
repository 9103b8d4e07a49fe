use dataproof_analyzers::{Analyzer, FailureKind, InMemoryEngine, InMemoryRepository, ResultKey};
use dataproof_checks::{
    Assertion, Check, CheckLevel, CheckStatus, ConstraintStatus, VerificationError,
    VerificationOptions, VerificationSuite, render_report,
};
use dataproof_core::{Column, ColumnType, Dataset, Schema, Table, Value};

fn ids() -> Table {
    let schema = Schema::new(vec![Column::new("id", ColumnType::Integral)]);
    let rows = (1..=5).map(|id| vec![Value::Int(id)]).collect();
    Table::new(schema, rows).expect("table")
}

fn scores() -> Table {
    let schema = Schema::new(vec![Column::new("score", ColumnType::Integral)]);
    let rows = vec![
        vec![Value::Int(1)],
        vec![Value::Int(2)],
        vec![Value::Null],
        vec![Value::Int(4)],
    ];
    Table::new(schema, rows).expect("table")
}

fn id_check() -> Check {
    Check::new(CheckLevel::Error, "ids")
        .has_size(Assertion::Equals(5.0))
        .is_complete("id")
        .is_unique("id")
}

#[test]
fn clean_dataset_passes() {
    let engine = InMemoryEngine::new(2);
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &[id_check()])
        .expect("verification");

    assert_eq!(result.status, CheckStatus::Success);
    let statuses: Vec<_> = result.check_results[0]
        .constraint_results
        .iter()
        .map(|constraint| constraint.status)
        .collect();
    assert_eq!(statuses, vec![ConstraintStatus::Success; 3]);
}

#[test]
fn wrong_size_fails_with_actual_and_expected() {
    let engine = InMemoryEngine::new(3);
    let check = id_check().has_size(Assertion::Equals(10.0));
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &[check])
        .expect("verification");

    assert_eq!(result.status, CheckStatus::Error);
    let failing = &result.check_results[0].constraint_results[3];
    assert_eq!(failing.status, ConstraintStatus::Failure);
    assert_eq!(failing.metric_value, Some(5.0));
    let message = failing.message.as_deref().expect("message");
    assert!(message.contains("actual value 5"), "{message}");
    assert!(message.contains("== 10"), "{message}");
    let others = &result.check_results[0].constraint_results[..3];
    assert!(others.iter().all(|c| c.status == ConstraintStatus::Success));
}

#[test]
fn incomplete_column_fails_both_completeness_constraints() {
    let engine = InMemoryEngine::new(2);
    let check = Check::new(CheckLevel::Error, "scores")
        .has_completeness("score", Assertion::AtLeast(0.9))
        .is_complete("score");
    let result = VerificationSuite::new(&engine)
        .run(&scores(), &[check])
        .expect("verification");

    let constraints = &result.check_results[0].constraint_results;
    assert_eq!(constraints[0].status, ConstraintStatus::Failure);
    assert_eq!(constraints[0].metric_value, Some(0.75));
    assert_eq!(constraints[1].status, ConstraintStatus::Failure);
    assert_eq!(result.status, CheckStatus::Error);
}

#[test]
fn one_error_check_dominates() {
    let engine = InMemoryEngine::new(2);
    let checks = vec![
        id_check(),
        Check::new(CheckLevel::Warning, "soft").has_max("id", Assertion::AtMost(5.0)),
        Check::new(CheckLevel::Error, "hard").has_min("id", Assertion::GreaterThan(1.0)),
    ];
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &checks)
        .expect("verification");

    let statuses: Vec<_> = result.check_results.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![CheckStatus::Success, CheckStatus::Success, CheckStatus::Error]
    );
    assert_eq!(result.status, CheckStatus::Error);
}

#[test]
fn warning_checks_only_warn() {
    let engine = InMemoryEngine::new(2);
    let checks = vec![
        id_check(),
        Check::new(CheckLevel::Warning, "volume").has_size(Assertion::AtLeast(100.0)),
    ];
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &checks)
        .expect("verification");
    assert_eq!(result.status, CheckStatus::Warning);
}

#[test]
fn failed_analysis_skips_its_constraints() {
    let engine = InMemoryEngine::new(2);
    let check = Check::new(CheckLevel::Error, "broken")
        .has_size(Assertion::AtLeast(1.0))
        .where_filter("id LIKE '1%'")
        .has_size(Assertion::Equals(5.0));
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &[check])
        .expect("verification");

    let constraints = &result.check_results[0].constraint_results;
    assert_eq!(constraints[0].status, ConstraintStatus::Skipped);
    assert_eq!(constraints[1].status, ConstraintStatus::Success);
    assert_eq!(result.status, CheckStatus::Success);

    let broken = Analyzer::size().with_filter("id LIKE '1%'");
    let failure = result
        .metrics
        .metric(&broken)
        .and_then(|metric| metric.failure())
        .expect("failure");
    assert_eq!(failure.kind, FailureKind::AnalysisError);
}

#[test]
fn typo_in_a_warning_check_does_not_hide_an_error() {
    let engine = InMemoryEngine::new(2);
    let checks = vec![
        Check::new(CheckLevel::Error, "volume").has_size(Assertion::Equals(10.0)),
        Check::new(CheckLevel::Warning, "ids").satisfies(
            "idd > 0",
            "positive ids",
            Assertion::Equals(1.0),
        ),
    ];
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &checks)
        .expect("verification");

    let volume = &result.check_results[0].constraint_results[0];
    assert_eq!(volume.status, ConstraintStatus::Failure);
    assert_eq!(volume.metric_value, Some(5.0));
    assert_eq!(
        result.check_results[1].constraint_results[0].status,
        ConstraintStatus::Skipped
    );
    assert_eq!(result.status, CheckStatus::Error);
}

#[test]
fn constraints_keep_evaluating_after_a_failure() {
    let engine = InMemoryEngine::new(2);
    let check = Check::new(CheckLevel::Error, "all")
        .has_size(Assertion::Equals(1.0))
        .has_mean("id", Assertion::Equals(3.0))
        .is_non_negative("id")
        .is_contained_in_range("id", 1.0, 5.0);
    let result = VerificationSuite::new(&engine)
        .run(&ids(), &[check])
        .expect("verification");

    let statuses: Vec<_> = result.check_results[0]
        .constraint_results
        .iter()
        .map(|constraint| constraint.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            ConstraintStatus::Failure,
            ConstraintStatus::Success,
            ConstraintStatus::Success,
            ConstraintStatus::Success,
        ]
    );
}

#[test]
fn required_analyzers_are_reported() {
    let engine = InMemoryEngine::new(1);
    let options = VerificationOptions {
        required_analyzers: vec![Analyzer::sum("id")],
        ..VerificationOptions::default()
    };
    let result = VerificationSuite::new(&engine)
        .with_options(options)
        .run(&ids(), &[id_check()])
        .expect("verification");
    let sum = result
        .metrics
        .metric(&Analyzer::sum("id"))
        .and_then(|metric| metric.as_f64());
    assert_eq!(sum, Some(15.0));
    assert!(result.metric_rows().iter().any(|row| row.name == "Sum"));
}

#[test]
fn repository_problems_abort_the_run() {
    let engine = InMemoryEngine::new(1);
    let options = VerificationOptions {
        save_states_with: Some(ResultKey::new(1)),
        ..VerificationOptions::default()
    };
    let err = VerificationSuite::new(&engine)
        .with_options(options)
        .run(&ids(), &[id_check()])
        .expect_err("no repository");
    assert!(matches!(err, VerificationError::Runner(_)));
}

#[test]
fn verification_on_aggregated_states_matches_a_full_run() {
    let engine = InMemoryEngine::new(2);
    let repository = InMemoryRepository::new();
    let first = ResultKey::new(1).with_tag("batch", "a");
    let second = ResultKey::new(2).with_tag("batch", "b");
    let check = Check::new(CheckLevel::Error, "mean").has_mean("id", Assertion::Equals(3.0));

    let schema = Schema::new(vec![Column::new("id", ColumnType::Integral)]);
    let low = Table::new(schema.clone(), (1..=2).map(|id| vec![Value::Int(id)]).collect())
        .expect("table");
    let high = Table::new(schema.clone(), (3..=5).map(|id| vec![Value::Int(id)]).collect())
        .expect("table");
    for (key, table) in [(&first, &low), (&second, &high)] {
        let options = VerificationOptions {
            save_states_with: Some(key.clone()),
            ..VerificationOptions::default()
        };
        VerificationSuite::new(&engine)
            .with_repository(&repository)
            .with_options(options)
            .run(table, std::slice::from_ref(&check))
            .expect("batch");
    }

    let aggregated = VerificationSuite::new(&engine)
        .with_repository(&repository)
        .run_on_aggregated_states(ids().schema(), std::slice::from_ref(&check), &[first, second])
        .expect("aggregated");
    assert_eq!(aggregated.status, CheckStatus::Success);
    assert_eq!(
        aggregated.check_results[0].constraint_results[0].metric_value,
        Some(3.0)
    );
}

#[test]
fn result_serializes_for_report_consumers() {
    let engine = InMemoryEngine::new(2);
    let result = VerificationSuite::new(&engine)
        .run(&scores(), &[Check::new(CheckLevel::Error, "scores").is_complete("score")])
        .expect("verification");

    let json = serde_json::to_value(&result).expect("json");
    assert_eq!(json["status"], "Error");
    assert_eq!(json["check_results"][0]["constraint_results"][0]["status"], "Failure");

    let report = render_report(&result);
    assert!(report.contains("| scores | Error | Error | 0 | 1 | 0 |"), "{report}");
}
