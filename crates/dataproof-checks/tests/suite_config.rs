use std::fs;

use dataproof_analyzers::InMemoryEngine;
use dataproof_checks::{
    CheckLevel, CheckStatus, SuiteError, VerificationSuite, load_suite, suite_json_schema,
    validate_suite_json,
};
use dataproof_core::{Column, ColumnType, Schema, Table, Value};
use serde_json::json;
use tempfile::tempdir;

const ORDERS_SUITE: &str = r#"
name = "orders"

[[checks]]
description = "order ids"
level = "error"

[[checks.constraints]]
kind = "is_primary_key"
columns = ["id"]

[[checks.constraints]]
kind = "has_size"
assertion = { between = { min = 1, max = 10 } }

[[checks]]
description = "order status"
level = "warning"
stop_on_failure = true

[[checks.constraints]]
kind = "is_contained_in"
column = "status"
allowed = ["open", "closed"]
hint = "new statuses need a migration"

[[checks.constraints]]
kind = "has_completeness"
column = "status"
filter = "id > 2"
assertion = { at_least = 1.0 }
"#;

fn orders() -> Table {
    let schema = Schema::new(vec![
        Column::new("id", ColumnType::Integral),
        Column::new("status", ColumnType::String),
    ]);
    let rows = vec![
        vec![Value::Int(1), Value::from("open")],
        vec![Value::Int(2), Value::from("lost")],
        vec![Value::Int(3), Value::from("closed")],
        vec![Value::Int(4), Value::Null],
    ];
    Table::new(schema, rows).expect("table")
}

#[test]
fn toml_suite_runs_end_to_end() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("orders.toml");
    fs::write(&path, ORDERS_SUITE).expect("write suite");

    let suite = load_suite(&path).expect("load suite");
    assert_eq!(suite.name.as_deref(), Some("orders"));
    assert_eq!(suite.checks[1].level, CheckLevel::Warning);

    let checks = suite.into_checks();
    let engine = InMemoryEngine::new(2);
    let result = VerificationSuite::new(&engine)
        .run(&orders(), &checks)
        .expect("verification");

    assert_eq!(result.check_results[0].status, CheckStatus::Success);
    assert_eq!(result.check_results[1].status, CheckStatus::Warning);
    assert_eq!(result.status, CheckStatus::Warning);

    let status_results = &result.check_results[1].constraint_results;
    let message = status_results[0].message.as_deref().expect("message");
    assert!(message.ends_with("(hint: new statuses need a migration)"), "{message}");
    assert_eq!(
        status_results[1].status,
        dataproof_checks::ConstraintStatus::Skipped
    );
}

#[test]
fn json_suite_loads() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("suite.json");
    let document = json!({
        "checks": [{
            "description": "emails",
            "level": "error",
            "constraints": [
                { "kind": "contains_email", "column": "email", "assertion": { "at_least": 0.5 } }
            ]
        }]
    });
    fs::write(&path, serde_json::to_vec_pretty(&document).expect("json")).expect("write");

    let suite = load_suite(&path).expect("load suite");
    assert_eq!(suite.checks.len(), 1);
    assert!(suite.name.is_none());
}

#[test]
fn structural_problems_are_reported_with_paths() {
    let document = json!({
        "checks": [{
            "description": "bad",
            "level": "fatal",
            "constraints": []
        }]
    });
    let report = validate_suite_json(&document).expect("validate");
    assert!(!report.is_ok());
    assert!(
        report
            .errors
            .iter()
            .any(|issue| issue.path == "/checks/0/level"),
        "{:?}",
        report.errors
    );
}

#[test]
fn unknown_constraint_kind_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("suite.json");
    let document = json!({
        "checks": [{
            "description": "ids",
            "level": "error",
            "constraints": [ { "kind": "has_vibes", "column": "id" } ]
        }]
    });
    fs::write(&path, document.to_string()).expect("write");
    let err = load_suite(&path).expect_err("invalid");
    assert!(matches!(err, SuiteError::Invalid(_)), "{err:?}");
}

#[test]
fn unsupported_extension_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("suite.yaml");
    fs::write(&path, "checks: []").expect("write");
    let err = load_suite(&path).expect_err("unsupported");
    assert!(matches!(err, SuiteError::UnsupportedFormat(ext) if ext == "yaml"));
}

#[test]
fn schema_documents_constraint_kinds() {
    let schema = serde_json::to_string(&suite_json_schema()).expect("schema json");
    assert!(schema.contains("has_completeness"));
    assert!(schema.contains("is_contained_in_range"));
}
