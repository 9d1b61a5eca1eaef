//! Insert routing
//!
//! Every row bound for a table passes through an [`InsertInterceptor`]
//! before it is stored. For a partitioned table the row is redirected into
//! the chunk covering its time value and the write against the parent never
//! happens; other tables pass through untouched.

use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::host::{SegmentHost, SqliteSegmentHost};
use crate::chunk::manager::ChunkManager;
use crate::chunk::types::{Chunk, QualifiedName, Row, Value};
use crate::chunk::unit_of_work::UnitOfWork;
use std::collections::BTreeMap;

/// Where a row should be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// The table named in the insert
    Original,
    /// The segment of this chunk instead of the parent
    Redirect(Chunk),
}

/// Hook run for each row before it is stored
pub trait InsertInterceptor {
    /// Decide where `row` goes; may normalize the row in place
    fn before_insert(
        &self,
        uow: &mut UnitOfWork<'_>,
        table: &QualifiedName,
        row: &mut Row,
    ) -> ChunkResult<WriteTarget>;
}

/// Outcome of a batch insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertSummary {
    /// Rows written in total
    pub rows: usize,
    /// Rows written straight into a non-partitioned table
    pub passed_through: usize,
    /// Rows per chunk id
    pub per_chunk: BTreeMap<i64, usize>,
}

impl InsertSummary {
    fn record(&mut self, target: &WriteTarget) {
        self.rows += 1;
        match target {
            WriteTarget::Original => self.passed_through += 1,
            WriteTarget::Redirect(chunk) => *self.per_chunk.entry(chunk.id).or_default() += 1,
        }
    }
}

impl std::fmt::Display for InsertSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows ({} into {} chunks, {} passed through)",
            self.rows,
            self.rows - self.passed_through,
            self.per_chunk.len(),
            self.passed_through
        )
    }
}

/// Read the row's time value as microseconds
///
/// Integers are taken as microseconds. RFC 3339 text is accepted and the row
/// is rewritten to hold the integer form.
pub fn extract_time(table: &QualifiedName, column: &str, row: &mut Row) -> ChunkResult<i64> {
    let micros = match row.get(column) {
        None | Some(Value::Null) => {
            return Err(ChunkError::NullTimeValue {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
        Some(Value::Integer(v)) => return Ok(*v),
        Some(Value::Text(text)) => chrono::DateTime::parse_from_rfc3339(text.trim())
            .map_err(|e| ChunkError::InvalidTimeValue {
                column: column.to_string(),
                reason: format!("{:?} is not an RFC 3339 timestamp: {}", text, e),
            })?
            .timestamp_micros(),
        Some(other) => {
            return Err(ChunkError::InvalidTimeValue {
                column: column.to_string(),
                reason: format!("{} values cannot be used as timestamps", other.type_name()),
            })
        }
    };

    row.set(column, Value::Integer(micros));
    Ok(micros)
}

/// Routes inserts into chunks through a [`ChunkManager`]
pub struct InsertRouter<H = SqliteSegmentHost> {
    manager: ChunkManager<H>,
}

impl InsertRouter<SqliteSegmentHost> {
    pub fn new() -> Self {
        Self::with_manager(ChunkManager::new())
    }
}

impl Default for InsertRouter<SqliteSegmentHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SegmentHost> InsertRouter<H> {
    pub fn with_manager(manager: ChunkManager<H>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ChunkManager<H> {
        &self.manager
    }

    /// Route and write one row
    pub fn insert(&self, uow: &mut UnitOfWork<'_>, table: &QualifiedName, mut row: Row) -> ChunkResult<WriteTarget> {
        let target = self.before_insert(uow, table, &mut row)?;
        let destination = match &target {
            WriteTarget::Original => table,
            WriteTarget::Redirect(chunk) => &chunk.segment,
        };
        self.manager.host().insert_row(uow.conn(), destination, &row)?;
        Ok(target)
    }

    /// Route and write many rows; the first failure aborts the batch
    pub fn insert_batch<I>(&self, uow: &mut UnitOfWork<'_>, table: &QualifiedName, rows: I) -> ChunkResult<InsertSummary>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut summary = InsertSummary::default();
        for row in rows {
            let target = self.insert(uow, table, row)?;
            summary.record(&target);
        }

        tracing::debug!(uow = %uow.id(), "Inserted into {}: {}", table, summary);
        Ok(summary)
    }
}

impl<H: SegmentHost> InsertInterceptor for InsertRouter<H> {
    fn before_insert(
        &self,
        uow: &mut UnitOfWork<'_>,
        table: &QualifiedName,
        row: &mut Row,
    ) -> ChunkResult<WriteTarget> {
        let Some(partitioned) = self.manager.resolve_table(uow, table)? else {
            return Ok(WriteTarget::Original);
        };

        let dimension = self.manager.dimension(uow, partitioned.id)?;
        let timestamp = extract_time(table, &dimension.column_name, row)?;
        let chunk = self.manager.get_or_create(uow, partitioned.id, timestamp)?;
        Ok(WriteTarget::Redirect(chunk))
    }
}
