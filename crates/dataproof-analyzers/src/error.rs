use thiserror::Error;

/// Errors raised by the state algebra.
///
/// A mismatch means two states that were never produced by the same
/// computation were combined; callers treat it as a defect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot merge {left} state with {right} state")]
    DescriptorMismatch { left: String, right: String },
}

/// Failures reported by an execution engine while scanning a dataset.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("scan failed: {0}")]
    Scan(String),
}
