use thiserror::Error;

/// Core error type shared across dataproof crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema violates internal invariants.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Rows do not match the declared schema.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
    /// Errors raised while reading CSV input.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results returned by dataproof crates.
pub type Result<T> = std::result::Result<T, Error>;
