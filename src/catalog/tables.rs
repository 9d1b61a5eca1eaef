//! Partitioned tables, their dimension and the chunk-name sequence

use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::types::{Dimension, PartitionedTable, QualifiedName};
use rusqlite::{params, Connection, OptionalExtension, Row as SqlRow};

fn table_from_row(row: &SqlRow<'_>) -> rusqlite::Result<PartitionedTable> {
    Ok(PartitionedTable {
        id: row.get(0)?,
        name: QualifiedName::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
    })
}

/// Register a table, returning its new id
pub fn insert_table(conn: &Connection, name: &QualifiedName) -> ChunkResult<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO _chunk_catalog_partitioned_table (schema_name, table_name)
         VALUES (?1, ?2)
         RETURNING id",
    )?;
    Ok(stmt.query_row(params![name.schema, name.name], |row| row.get(0))?)
}

pub fn find_table(conn: &Connection, name: &QualifiedName) -> ChunkResult<Option<PartitionedTable>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, schema_name, table_name FROM _chunk_catalog_partitioned_table
         WHERE schema_name = ?1 AND table_name = ?2",
    )?;
    Ok(stmt
        .query_row(params![name.schema, name.name], table_from_row)
        .optional()?)
}

pub fn get_table(conn: &Connection, id: i64) -> ChunkResult<Option<PartitionedTable>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, schema_name, table_name FROM _chunk_catalog_partitioned_table
         WHERE id = ?1",
    )?;
    Ok(stmt.query_row(params![id], table_from_row).optional()?)
}

pub fn list_tables(conn: &Connection) -> ChunkResult<Vec<PartitionedTable>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, schema_name, table_name FROM _chunk_catalog_partitioned_table
         ORDER BY id",
    )?;
    let tables = stmt
        .query_map([], table_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tables)
}

/// Delete a table and, by cascade, its dimension, chunks, sequence and policy
pub fn delete_table(conn: &Connection, id: i64) -> ChunkResult<bool> {
    let deleted = conn.execute(
        "DELETE FROM _chunk_catalog_partitioned_table WHERE id = ?1",
        params![id],
    )?;
    Ok(deleted > 0)
}

pub fn insert_dimension(conn: &Connection, dimension: &Dimension) -> ChunkResult<()> {
    if dimension.interval_width_us <= 0 {
        return Err(ChunkError::InvalidInterval {
            width: dimension.interval_width_us,
        });
    }
    conn.execute(
        "INSERT INTO _chunk_catalog_dimension
             (partitioned_table_id, column_name, column_type, interval_width_us)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            dimension.table_id,
            dimension.column_name,
            dimension.column_type,
            dimension.interval_width_us
        ],
    )?;
    Ok(())
}

pub fn get_dimension(conn: &Connection, table_id: i64) -> ChunkResult<Option<Dimension>> {
    let mut stmt = conn.prepare_cached(
        "SELECT partitioned_table_id, column_name, column_type, interval_width_us
         FROM _chunk_catalog_dimension
         WHERE partitioned_table_id = ?1",
    )?;
    Ok(stmt
        .query_row(params![table_id], |row| {
            Ok(Dimension {
                table_id: row.get(0)?,
                column_name: row.get(1)?,
                column_type: row.get(2)?,
                interval_width_us: row.get(3)?,
            })
        })
        .optional()?)
}

/// Start the chunk-name sequence of a new table at 1
pub fn init_sequence(conn: &Connection, table_id: i64) -> ChunkResult<()> {
    conn.execute(
        "INSERT INTO _chunk_catalog_chunk_sequence (partitioned_table_id, next_value)
         VALUES (?1, 1)
         ON CONFLICT (partitioned_table_id) DO NOTHING",
        params![table_id],
    )?;
    Ok(())
}

/// Take the next chunk-name sequence value of a table
///
/// Values are never reused within a committed history, even after the
/// chunk that used them is dropped.
pub fn next_sequence_value(conn: &Connection, table_id: i64) -> ChunkResult<i64> {
    let mut stmt = conn.prepare_cached(
        "UPDATE _chunk_catalog_chunk_sequence
         SET next_value = next_value + 1
         WHERE partitioned_table_id = ?1
         RETURNING next_value - 1",
    )?;
    stmt.query_row(params![table_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| ChunkError::TableNotFound(format!("id {}", table_id)))
}
