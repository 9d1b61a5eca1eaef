//! Core data types for the partitioning layer
//!
//! - `PartitionedTable` / `Dimension`: a table declared for partitioning and
//!   its single time dimension
//! - `Chunk`: one time-bounded physical segment of a partitioned table
//! - `Value` / `Row`: host rows as seen by the router and compressor
//! - `RetentionPolicy` / `CompressedColumnRecord`: catalog records

use crate::chunk::error::{ChunkError, ChunkResult};
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Quote an SQL identifier, doubling embedded quotes
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A schema-qualified object name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Attached database name (`main` unless attached elsewhere)
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.name` or a bare `name` in `default_schema`
    pub fn parse(input: &str, default_schema: &str) -> Self {
        match input.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Self::new(schema, name)
            }
            _ => Self::new(default_schema, input),
        }
    }

    /// `"schema"."name"`, safe to splice into DDL
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// A table registered for automatic time partitioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionedTable {
    pub id: i64,
    pub name: QualifiedName,
}

/// The time dimension of a partitioned table
///
/// Exactly one per table. The width never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub table_id: i64,
    pub column_name: String,
    /// Declared type of the time column
    pub column_type: String,
    /// Bucket width in microseconds (> 0)
    pub interval_width_us: i64,
}

/// A time-bounded physical segment holding rows with
/// `start_time <= t < end_time`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub table_id: i64,
    /// Physical segment backing the chunk
    pub segment: QualifiedName,
    /// Inclusive lower bound, a multiple of the interval width
    pub start_time: i64,
    /// Exclusive upper bound
    pub end_time: i64,
    pub compressed: bool,
    /// Microseconds since the epoch when the chunk was compressed
    pub compressed_at: Option<i64>,
}

impl Chunk {
    /// Check if a timestamp falls inside this chunk
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start_time <= timestamp && timestamp < self.end_time
    }
}

/// A catalog row for a chunk that is about to be created
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub table_id: i64,
    pub segment: QualifiedName,
    pub start_time: i64,
    pub end_time: i64,
}

/// Column layout entry of a host table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Declared type, possibly empty
    pub decl_type: String,
    pub not_null: bool,
    /// Default expression as SQL text
    pub default: Option<String>,
    /// 1-based position in the primary key, 0 if not part of it
    pub pk: i32,
}

impl ColumnDef {
    /// Parse a comma-separated list of `name [TYPE] [NOT NULL] [PRIMARY KEY]`
    ///
    /// Names must be plain identifiers and types plain words with an optional
    /// numeric size such as `VARCHAR(20)` or `NUMERIC(10, 2)`. Anything else
    /// is rejected rather than passed through to DDL.
    pub fn parse_list(input: &str) -> ChunkResult<Vec<ColumnDef>> {
        let name_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").map_err(invalid_pattern)?;
        let type_re = Regex::new(r"^([A-Z][A-Z0-9_]*( [A-Z][A-Z0-9_]*)*( ?\( ?\d+ ?(, ?\d+ ?)?\))?)?$")
            .map_err(invalid_pattern)?;

        let mut columns: Vec<ColumnDef> = Vec::new();
        let mut pk = 0;
        for definition in split_top_level(input) {
            let definition = definition.trim();
            let invalid = |reason: &str| ChunkError::InvalidColumnDefinition {
                definition: definition.to_string(),
                reason: reason.to_string(),
            };

            let (name, rest) = definition
                .split_once(char::is_whitespace)
                .unwrap_or((definition, ""));
            if !name_re.is_match(name) {
                return Err(invalid("column name must be a plain identifier"));
            }
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(name)) {
                return Err(invalid("duplicate column name"));
            }

            let mut decl_type = rest
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_ascii_uppercase();
            let mut not_null = false;
            let mut primary = false;
            loop {
                if let Some(head) = strip_clause(&decl_type, "NOT NULL") {
                    not_null = true;
                    decl_type = head.to_string();
                } else if let Some(head) = strip_clause(&decl_type, "PRIMARY KEY") {
                    primary = true;
                    decl_type = head.to_string();
                } else {
                    break;
                }
            }
            let constraint_word = decl_type
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .any(|word| CONSTRAINT_WORDS.contains(&word));
            if constraint_word || !type_re.is_match(&decl_type) {
                return Err(invalid("unsupported type or constraint"));
            }

            if primary {
                pk += 1;
            }
            columns.push(ColumnDef {
                name: name.to_string(),
                decl_type,
                not_null,
                default: None,
                pk: if primary { pk } else { 0 },
            });
        }

        if columns.is_empty() {
            return Err(ChunkError::InvalidColumnDefinition {
                definition: input.to_string(),
                reason: "no columns given".to_string(),
            });
        }
        Ok(columns)
    }

    /// Column clause for `CREATE TABLE`, without key constraints
    pub fn definition(&self) -> String {
        let mut def = quote_ident(&self.name);
        if !self.decl_type.is_empty() {
            def.push(' ');
            def.push_str(&self.decl_type);
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            def.push_str(&format!(" DEFAULT ({})", default));
        }
        def
    }
}

/// Words that start a column constraint rather than continue a type name
const CONSTRAINT_WORDS: &[&str] = &[
    "AS", "CHECK", "COLLATE", "CONSTRAINT", "DEFAULT", "GENERATED", "KEY", "NOT", "NULL", "PRIMARY",
    "REFERENCES", "UNIQUE",
];

fn invalid_pattern(err: regex::Error) -> ChunkError {
    ChunkError::Serialization(err.to_string())
}

/// `head` of `"head CLAUSE"` or `""` for `"CLAUSE"`
fn strip_clause<'a>(decl: &'a str, clause: &str) -> Option<&'a str> {
    if decl == clause {
        return Some("");
    }
    decl.strip_suffix(clause)?.strip_suffix(' ')
}

/// Split on commas outside parentheses
fn split_top_level(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts.retain(|part| !part.trim().is_empty());
    parts
}

/// A single cell, mirroring the SQLite storage classes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Storage class name, as SQLite's `typeof()` reports it
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
        }
    }

    /// Approximate plain storage size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Integer(_) | Value::Real(_) => 8,
            Value::Text(s) => s.len(),
            Value::Blob(b) => b.len(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Real(v) => ValueRef::Real(*v),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

/// Fails on TEXT that is not valid UTF-8 instead of rewriting it
impl TryFrom<ValueRef<'_>> for Value {
    type Error = std::str::Utf8Error;

    fn try_from(value: ValueRef<'_>) -> Result<Self, Self::Error> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(t) => Value::Text(std::str::from_utf8(t)?.to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered list of `(column, value)` pairs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: append a column
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Set a column, replacing an existing value in place
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.set(column, value);
        }
        row
    }
}

/// Per-table retention: drop chunks whose data is older than `retain_us`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub table_id: i64,
    pub retain_us: i64,
    /// Microseconds since the epoch of the last change
    pub updated_at: i64,
}

/// One compressed column of a compressed chunk, as stored in the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedColumnRecord {
    pub chunk_id: i64,
    /// Position of the column in the segment layout
    pub ordinal: i64,
    pub column_name: String,
    pub column_type: String,
    /// Codec name (`delta`, `delta_of_delta`, `dictionary`, `plain`)
    pub codec: String,
    pub row_count: i64,
    pub uncompressed_bytes: i64,
    /// Checksummed frame holding the encoded column
    pub data: Vec<u8>,
}
