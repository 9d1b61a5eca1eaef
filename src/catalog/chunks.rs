//! Chunk records and compressed column payloads

use crate::chunk::error::ChunkResult;
use crate::chunk::types::{Chunk, CompressedColumnRecord, NewChunk, QualifiedName};
use rusqlite::{params, Connection, OptionalExtension, Row as SqlRow};

const CHUNK_COLUMNS: &str = "id, partitioned_table_id, schema_name, table_name, \
                             start_time, end_time, compressed, compressed_at";

fn chunk_from_row(row: &SqlRow<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        table_id: row.get(1)?,
        segment: QualifiedName::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        compressed: row.get::<_, i64>(6)? != 0,
        compressed_at: row.get(7)?,
    })
}

/// Insert a chunk row unless its bucket is already taken
///
/// Returns the new id, or `None` when another chunk already starts at the
/// same time for the table.
pub fn insert_chunk(conn: &Connection, chunk: &NewChunk) -> ChunkResult<Option<i64>> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO _chunk_catalog_chunk
             (partitioned_table_id, schema_name, table_name, start_time, end_time)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (partitioned_table_id, start_time) DO NOTHING
         RETURNING id",
    )?;
    Ok(stmt
        .query_row(
            params![
                chunk.table_id,
                chunk.segment.schema,
                chunk.segment.name,
                chunk.start_time,
                chunk.end_time
            ],
            |row| row.get(0),
        )
        .optional()?)
}

/// The chunk whose range contains `timestamp`, if any
pub fn find_containing(conn: &Connection, table_id: i64, timestamp: i64) -> ChunkResult<Option<Chunk>> {
    let sql = format!(
        "SELECT {} FROM _chunk_catalog_chunk
         WHERE partitioned_table_id = ?1 AND start_time <= ?2 AND end_time > ?2",
        CHUNK_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt
        .query_row(params![table_id, timestamp], chunk_from_row)
        .optional()?)
}

pub fn get_chunk(conn: &Connection, id: i64) -> ChunkResult<Option<Chunk>> {
    let sql = format!("SELECT {} FROM _chunk_catalog_chunk WHERE id = ?1", CHUNK_COLUMNS);
    let mut stmt = conn.prepare_cached(&sql)?;
    Ok(stmt.query_row(params![id], chunk_from_row).optional()?)
}

/// All chunks of a table ordered by start time
pub fn list_chunks(conn: &Connection, table_id: i64) -> ChunkResult<Vec<Chunk>> {
    let sql = format!(
        "SELECT {} FROM _chunk_catalog_chunk
         WHERE partitioned_table_id = ?1
         ORDER BY start_time",
        CHUNK_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let chunks = stmt
        .query_map(params![table_id], chunk_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(chunks)
}

/// Chunks whose range ends at or before `cutoff`, ordered by start time
pub fn list_chunks_ending_by(conn: &Connection, table_id: i64, cutoff: i64) -> ChunkResult<Vec<Chunk>> {
    let sql = format!(
        "SELECT {} FROM _chunk_catalog_chunk
         WHERE partitioned_table_id = ?1 AND end_time <= ?2
         ORDER BY start_time",
        CHUNK_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let chunks = stmt
        .query_map(params![table_id, cutoff], chunk_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(chunks)
}

/// Delete a chunk row and, by cascade, its compressed columns
pub fn delete_chunk(conn: &Connection, id: i64) -> ChunkResult<bool> {
    let deleted = conn.execute("DELETE FROM _chunk_catalog_chunk WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Set (`Some(at)`) or clear (`None`) the compressed flag of a chunk
pub fn set_compressed(conn: &Connection, id: i64, compressed_at: Option<i64>) -> ChunkResult<()> {
    conn.execute(
        "UPDATE _chunk_catalog_chunk SET compressed = ?2, compressed_at = ?3 WHERE id = ?1",
        params![id, compressed_at.is_some(), compressed_at],
    )?;
    Ok(())
}

pub fn insert_compressed_column(conn: &Connection, record: &CompressedColumnRecord) -> ChunkResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO _chunk_catalog_compressed_column
             (chunk_id, ordinal, column_name, column_type, codec,
              row_count, uncompressed_bytes, data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    stmt.execute(params![
        record.chunk_id,
        record.ordinal,
        record.column_name,
        record.column_type,
        record.codec,
        record.row_count,
        record.uncompressed_bytes,
        record.data
    ])?;
    Ok(())
}

/// Compressed columns of a chunk in layout order
pub fn compressed_columns(conn: &Connection, chunk_id: i64) -> ChunkResult<Vec<CompressedColumnRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT chunk_id, ordinal, column_name, column_type, codec,
                row_count, uncompressed_bytes, data
         FROM _chunk_catalog_compressed_column
         WHERE chunk_id = ?1
         ORDER BY ordinal",
    )?;
    let records = stmt
        .query_map(params![chunk_id], |row| {
            Ok(CompressedColumnRecord {
                chunk_id: row.get(0)?,
                ordinal: row.get(1)?,
                column_name: row.get(2)?,
                column_type: row.get(3)?,
                codec: row.get(4)?,
                row_count: row.get(5)?,
                uncompressed_bytes: row.get(6)?,
                data: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

pub fn delete_compressed_columns(conn: &Connection, chunk_id: i64) -> ChunkResult<usize> {
    Ok(conn.execute(
        "DELETE FROM _chunk_catalog_compressed_column WHERE chunk_id = ?1",
        params![chunk_id],
    )?)
}

/// Total size of the stored frames of a table's compressed chunks
pub fn compressed_bytes(conn: &Connection, table_id: i64) -> ChunkResult<i64> {
    let mut stmt = conn.prepare_cached(
        "SELECT COALESCE(SUM(LENGTH(cc.data)), 0)
         FROM _chunk_catalog_compressed_column cc
         JOIN _chunk_catalog_chunk c ON c.id = cc.chunk_id
         WHERE c.partitioned_table_id = ?1",
    )?;
    Ok(stmt.query_row(params![table_id], |row| row.get(0))?)
}
