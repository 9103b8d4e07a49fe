//! Constraints, checks and verification runs on top of computed metrics.

pub mod check;
pub mod constraint;
pub mod error;
pub mod report;
pub mod suite;
pub mod verification;

pub use check::{Check, CheckLevel, CheckResult, CheckStatus};
pub use constraint::{
    Assertion, Constraint, ConstraintResult, ConstraintStatus, MetricMap, Projection,
};
pub use error::{IssueSeverity, SuiteError, ValidationIssue, ValidationReport, VerificationError};
pub use report::render_report;
pub use suite::{
    AssertionConfig, CheckConfig, ConstraintConfig, ConstraintSpec, DataTypeConfig, SuiteConfig,
    load_suite, parse_suite, suite_json_schema, validate_suite, validate_suite_json,
};
pub use verification::{
    CheckResultRow, VerificationOptions, VerificationResult, VerificationStage, VerificationSuite,
    derive_analyzers, evaluate,
};
