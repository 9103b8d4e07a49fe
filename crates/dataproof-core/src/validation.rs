use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::schema::Schema;

/// Validate internal consistency of a dataset schema.
///
/// This checks:
/// - column names are non-empty
/// - column names are unique, ignoring case, since columns are resolved
///   case-insensitively
pub fn validate_schema(schema: &Schema) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (idx, column) in schema.columns.iter().enumerate() {
        if column.name.trim().is_empty() {
            return Err(Error::InvalidSchema(format!(
                "column at position {idx} has an empty name"
            )));
        }
        if !seen.insert(column.name.to_lowercase()) {
            return Err(Error::InvalidSchema(format!(
                "duplicate column name: {}",
                column.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};

    #[test]
    fn rejects_duplicate_columns() {
        let schema = Schema::new(vec![
            Column::new("id", ColumnType::Integral),
            Column::new("id", ColumnType::String),
        ]);
        let err = validate_schema(&schema).unwrap_err();
        assert!(err.to_string().contains("duplicate column name: id"));
    }

    #[test]
    fn rejects_names_differing_only_in_case() {
        let schema = Schema::new(vec![
            Column::new("Id", ColumnType::Integral),
            Column::new("id", ColumnType::Integral),
        ]);
        let err = validate_schema(&schema).unwrap_err();
        assert!(err.to_string().contains("duplicate column name: id"));
    }

    #[test]
    fn rejects_blank_names() {
        let schema = Schema::new(vec![Column::new(" ", ColumnType::Integral)]);
        assert!(validate_schema(&schema).is_err());
    }
}
