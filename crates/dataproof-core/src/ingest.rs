use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::schema::{Column, ColumnType, Schema};
use crate::table::Table;
use crate::value::Value;

/// Options for loading a CSV file into a [`Table`].
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Explicit schema; column types are inferred when absent.
    pub schema: Option<Schema>,
    pub delimiter: u8,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            schema: None,
            delimiter: b',',
        }
    }
}

pub fn read_csv_path(path: &Path, options: &CsvOptions) -> Result<Table> {
    let file = std::fs::File::open(path)?;
    read_csv(file, options)
}

/// Read CSV with a header row. Empty cells and `null` become [`Value::Null`].
pub fn read_csv<R: Read>(reader: R, options: &CsvOptions) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(options.delimiter)
        .from_reader(reader);

    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(record.iter().map(|cell| cell.to_string()).collect::<Vec<_>>());
    }

    let (schema, positions) = match &options.schema {
        Some(schema) => (schema.clone(), resolve_positions(schema, &headers)?),
        None => (
            infer_schema(&headers, &records),
            (0..headers.len()).map(Some).collect(),
        ),
    };

    let mut rows = Vec::with_capacity(records.len());
    for (row_idx, record) in records.iter().enumerate() {
        let mut row = Vec::with_capacity(schema.len());
        for (col_idx, column) in schema.columns.iter().enumerate() {
            let raw = positions[col_idx]
                .and_then(|pos| record.get(pos))
                .map(String::as_str)
                .unwrap_or("");
            let value = parse_value(column.column_type, raw).map_err(|message| {
                Error::InvalidDataset(format!(
                    "row {} column '{}': {}",
                    row_idx + 1,
                    column.name,
                    message
                ))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    Table::new(schema, rows)
}

fn resolve_positions(schema: &Schema, headers: &[String]) -> Result<Vec<Option<usize>>> {
    let header_map = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.to_lowercase(), idx))
        .collect::<HashMap<_, _>>();

    let mut missing = Vec::new();
    let positions = schema
        .columns
        .iter()
        .map(|column| {
            let position = header_map.get(&column.name.to_lowercase()).copied();
            if position.is_none() {
                missing.push(column.name.clone());
            }
            position
        })
        .collect();

    if !missing.is_empty() {
        return Err(Error::InvalidDataset(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }
    Ok(positions)
}

fn infer_schema(headers: &[String], records: &[Vec<String>]) -> Schema {
    let columns = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cells = records
                .iter()
                .filter_map(|record| record.get(idx))
                .map(|cell| cell.trim())
                .filter(|cell| !is_null_token(cell))
                .collect::<Vec<_>>();
            Column::new(name.clone(), infer_type(&cells))
        })
        .collect();
    Schema::new(columns)
}

fn infer_type(cells: &[&str]) -> ColumnType {
    if cells.is_empty() {
        return ColumnType::String;
    }
    if cells.iter().all(|cell| cell.parse::<i64>().is_ok()) {
        ColumnType::Integral
    } else if cells.iter().all(|cell| cell.parse::<f64>().is_ok()) {
        ColumnType::Fractional
    } else if cells.iter().all(|cell| parse_bool_word(cell).is_some()) {
        ColumnType::Boolean
    } else {
        ColumnType::String
    }
}

fn parse_value(column_type: ColumnType, value: &str) -> std::result::Result<Value, String> {
    let trimmed = value.trim();
    if is_null_token(trimmed) {
        return Ok(Value::Null);
    }

    match column_type {
        ColumnType::Integral => trimmed
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("invalid integer '{}'", trimmed)),
        ColumnType::Fractional => trimmed
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("invalid float '{}'", trimmed)),
        ColumnType::Boolean => parse_bool(trimmed)
            .map(Value::Bool)
            .ok_or_else(|| format!("invalid boolean '{}'", trimmed)),
        ColumnType::String => Ok(Value::Text(value.to_string())),
    }
}

fn is_null_token(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null")
}

fn parse_bool_word(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}
