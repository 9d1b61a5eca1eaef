//! Row import
//!
//! Turns CSV files and JSON objects into [`Row`]s ready for
//! [`InsertRouter`](crate::chunk::InsertRouter). Cells are typed by content:
//! integers, then reals, empty cells become NULL and everything else is text.

use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::types::{Row, Value};
use std::io::Read;
use std::path::Path;

/// Errors kept per import before the list is truncated
const MAX_REPORTED_ERRORS: usize = 100;

/// CSV importer; the first record is always the header
pub struct CsvImporter {
    delimiter: u8,
    /// Cell text treated as NULL besides the empty string
    null_marker: Option<String>,
    /// Skip malformed records instead of failing the import
    lenient: bool,
}

/// Result of a CSV import
#[derive(Debug, Default)]
pub struct CsvImportResult {
    pub rows: Vec<Row>,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvImporter {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            null_marker: None,
            lenient: false,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Treat cells equal to `marker` (e.g. `NULL` or `\N`) as NULL
    pub fn with_null_marker(mut self, marker: &str) -> Self {
        self.null_marker = Some(marker.to_string());
        self
    }

    /// Record malformed lines in [`CsvImportResult::errors`] and keep going
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Import rows from a CSV file
    pub fn import(&self, path: &Path) -> ChunkResult<CsvImportResult> {
        let file = std::fs::File::open(path)?;
        let result = self.import_reader(file)?;
        tracing::info!(
            "Read {} rows from {:?} ({} failed)",
            result.rows.len(),
            path,
            result.rows_failed
        );
        Ok(result)
    }

    /// Import from a CSV string
    pub fn import_str(&self, csv_data: &str) -> ChunkResult<CsvImportResult> {
        self.import_reader(csv_data.as_bytes())
    }

    pub fn import_reader<R: Read>(&self, reader: R) -> ChunkResult<CsvImportResult> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(self.delimiter)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.iter().any(|h| h.is_empty()) {
            return Err(ChunkError::Serialization(
                "CSV header contains an empty column name".to_string(),
            ));
        }

        let mut result = CsvImportResult::default();

        for (line_num, record) in reader.records().enumerate() {
            // Header is line 1
            let line = line_num + 2;

            let record = match record {
                Ok(r) => r,
                Err(e) if self.lenient => {
                    result.rows_failed += 1;
                    result.errors.push(format!("Line {}: {}", line, e));
                    continue;
                }
                Err(e) => {
                    return Err(ChunkError::Serialization(format!("Line {}: {}", line, e)));
                }
            };

            let row: Row = headers
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| (column.clone(), self.parse_cell(cell)))
                .collect();
            result.rows.push(row);
        }

        if result.errors.len() > MAX_REPORTED_ERRORS {
            let total = result.errors.len();
            result.errors.truncate(MAX_REPORTED_ERRORS);
            result
                .errors
                .push(format!("... and {} more errors", total - MAX_REPORTED_ERRORS));
        }

        Ok(result)
    }

    fn parse_cell(&self, cell: &str) -> Value {
        let cell = cell.trim();
        if cell.is_empty() || self.null_marker.as_deref() == Some(cell) {
            return Value::Null;
        }
        parse_scalar(cell)
    }
}

/// Type a non-empty cell: integer, then real, else text
pub fn parse_scalar(cell: &str) -> Value {
    if let Ok(v) = cell.parse::<i64>() {
        return Value::Integer(v);
    }
    match cell.parse::<f64>() {
        // "inf" and "nan" parse as floats but are meant as text
        Ok(v) if v.is_finite() => Value::Real(v),
        _ => Value::Text(cell.to_string()),
    }
}

/// Build a row from a JSON object such as `{"ts": 42, "host": "a"}`
///
/// Booleans become 0/1. Nested arrays and objects are rejected.
pub fn row_from_json(json: &serde_json::Value) -> ChunkResult<Row> {
    let object = json.as_object().ok_or_else(|| {
        ChunkError::Serialization(format!("expected a JSON object, got {}", json))
    })?;

    object
        .iter()
        .map(|(column, value)| {
            let value = match value {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
                serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => Value::Integer(i),
                    (None, Some(f)) => Value::Real(f),
                    (None, None) => {
                        return Err(ChunkError::Serialization(format!(
                            "number {} in column {} does not fit",
                            n, column
                        )))
                    }
                },
                serde_json::Value::String(s) => Value::Text(s.clone()),
                other => {
                    return Err(ChunkError::Serialization(format!(
                        "column {} holds unsupported JSON value {}",
                        column, other
                    )))
                }
            };
            Ok((column.clone(), value))
        })
        .collect()
}

/// Parse a JSON object string into a row
pub fn row_from_json_str(input: &str) -> ChunkResult<Row> {
    let json: serde_json::Value = serde_json::from_str(input)?;
    row_from_json(&json)
}
