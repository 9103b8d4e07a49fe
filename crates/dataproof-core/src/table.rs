use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::validation::validate_schema;
use crate::value::Value;

/// Opaque handle to tabular data.
///
/// Analyzers only ever look at the schema; scanning rows is the job of an
/// execution engine that knows the concrete dataset type.
pub trait Dataset: Sync {
    fn schema(&self) -> &Schema;
}

/// In-memory dataset made of typed rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    schema: Schema,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, checking row width and value types against the schema.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        validate_schema(&schema)?;
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != schema.len() {
                return Err(Error::InvalidDataset(format!(
                    "row {} has {} value(s), expected {}",
                    row_idx + 1,
                    row.len(),
                    schema.len()
                )));
            }
            for (value, column) in row.iter().zip(&schema.columns) {
                if !value.fits(column.column_type) {
                    return Err(Error::InvalidDataset(format!(
                        "row {} column '{}': value {:?} does not fit type {:?}",
                        row_idx + 1,
                        column.name,
                        value,
                        column.column_type
                    )));
                }
                if value.is_null() && !column.is_nullable {
                    return Err(Error::InvalidDataset(format!(
                        "row {} column '{}': null in non-nullable column",
                        row_idx + 1,
                        column.name
                    )));
                }
            }
        }
        Ok(Self { schema, rows })
    }

    pub fn empty(schema: Schema) -> Result<Self> {
        Self::new(schema, Vec::new())
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Split rows into at most `count` contiguous, non-empty partitions.
    ///
    /// An empty table yields no partitions.
    pub fn partitions(&self, count: usize) -> Vec<&[Vec<Value>]> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        let count = count.clamp(1, self.rows.len());
        let chunk = self.rows.len().div_ceil(count);
        self.rows.chunks(chunk).collect()
    }

    /// Append the rows of another table with an identical schema.
    pub fn union(&self, other: &Table) -> Result<Table> {
        if self.schema != other.schema {
            return Err(Error::InvalidDataset(
                "cannot union tables with different schemas".to_string(),
            ));
        }
        let mut rows = self.rows.clone();
        rows.extend(other.rows.iter().cloned());
        Ok(Table {
            schema: self.schema.clone(),
            rows,
        })
    }
}

impl Dataset for Table {
    fn schema(&self) -> &Schema {
        &self.schema
    }
}
