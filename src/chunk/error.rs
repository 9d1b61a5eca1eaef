//! Chunk manager error types
//!
//! Every operation of the partitioning layer reports a [`ChunkError`]. All of
//! them abort the enclosing unit of work except
//! [`ChunkError::DuplicateChunk`], which `get_or_create` retries once.

use crate::compression::CodecError;
use thiserror::Error;

/// Errors that can occur while partitioning, routing or compressing
#[derive(Error, Debug)]
pub enum ChunkError {
    /// Interval width is zero or negative
    #[error("Invalid interval: width must be positive, got {width}")]
    InvalidInterval { width: i64 },

    /// Bucket arithmetic left the i64 range
    #[error("Timestamp out of range: {timestamp} with interval {width}")]
    TimestampOutOfRange { timestamp: i64, width: i64 },

    /// Table is not registered as partitioned (or does not exist)
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Chunk id has no catalog row
    #[error("Chunk not found: {0}")]
    ChunkNotFound(i64),

    /// Column missing from a table
    #[error("Column not found: {column} in {table}")]
    ColumnNotFound { table: String, column: String },

    /// Another writer created the chunk for this bucket first
    #[error("Duplicate chunk: table {table_id} already has a chunk starting at {start_time}")]
    DuplicateChunk { table_id: i64, start_time: i64 },

    /// Row has no usable value in the time column
    #[error("Null time value: column {column} of {table} is null or missing")]
    NullTimeValue { table: String, column: String },

    /// Row carries a time value that is not an integer or RFC 3339 text
    #[error("Invalid time value in column {column}: {reason}")]
    InvalidTimeValue { column: String, reason: String },

    /// Time column type would not keep integer microseconds intact
    #[error("Unsupported time column: {column} has type {column_type}")]
    UnsupportedTimeColumn { column: String, column_type: String },

    /// Table is already registered as partitioned
    #[error("Already partitioned: {0}")]
    AlreadyPartitioned(String),

    /// Object exists but is not a regular table
    #[error("Not a table: {name} is a {kind}")]
    NotATable { name: String, kind: String },

    /// Table must be empty before it can be partitioned
    #[error("Table not empty: {0} already contains rows")]
    ParentNotEmpty(String),

    /// A table already holds a chunk's segment name but not its layout or range
    #[error("Segment mismatch: {segment} {reason}")]
    SegmentMismatch { segment: String, reason: String },

    /// Column definition that cannot be turned into safe DDL
    #[error("Invalid column definition {definition:?}: {reason}")]
    InvalidColumnDefinition { definition: String, reason: String },

    /// Codec failure while compressing or decompressing a chunk
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Catalog or host engine failure
    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ChunkError {
    /// True for the not-found family (tables, chunks, columns)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ChunkError::TableNotFound(_)
                | ChunkError::ChunkNotFound(_)
                | ChunkError::ColumnNotFound { .. }
        )
    }

    /// True if decoding stored column data failed
    pub fn is_encoding_mismatch(&self) -> bool {
        matches!(self, ChunkError::Codec(e) if e.is_encoding_mismatch())
    }
}

impl From<bincode::Error> for ChunkError {
    fn from(err: bincode::Error) -> Self {
        ChunkError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ChunkError {
    fn from(err: serde_json::Error) -> Self {
        ChunkError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ChunkError {
    fn from(err: csv::Error) -> Self {
        ChunkError::Serialization(err.to_string())
    }
}

/// Result type alias for chunk operations
pub type ChunkResult<T> = Result<T, ChunkError>;
