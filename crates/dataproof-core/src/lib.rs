//! Core contracts shared by the dataproof crates.
//!
//! Defines the tabular schema model, cell values, the [`Dataset`] handle
//! consumed by analyzers, and an in-memory [`Table`] that can be loaded
//! from CSV.

pub mod error;
pub mod ingest;
pub mod schema;
pub mod table;
pub mod validation;
pub mod value;

pub use error::{Error, Result};
pub use ingest::{CsvOptions, read_csv, read_csv_path};
pub use schema::{Column, ColumnType, Schema};
pub use table::{Dataset, Table};
pub use validation::validate_schema;
pub use value::Value;
