//! Catalog table definitions
//!
//! All tables carry the `_chunk_catalog_` prefix and are created
//! idempotently on open. `PRAGMA user_version` records the layout version.

use crate::chunk::error::ChunkResult;
use rusqlite::Connection;

/// Current catalog layout version
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS _chunk_catalog_partitioned_table (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    schema_name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    UNIQUE (schema_name, table_name)
);

CREATE TABLE IF NOT EXISTS _chunk_catalog_dimension (
    partitioned_table_id INTEGER PRIMARY KEY
        REFERENCES _chunk_catalog_partitioned_table(id) ON DELETE CASCADE,
    column_name TEXT NOT NULL,
    column_type TEXT NOT NULL,
    interval_width_us INTEGER NOT NULL CHECK (interval_width_us > 0)
);

CREATE TRIGGER IF NOT EXISTS _chunk_catalog_dimension_width_immutable
BEFORE UPDATE OF interval_width_us ON _chunk_catalog_dimension
BEGIN
    SELECT RAISE(ABORT, 'interval_width_us is immutable');
END;

CREATE TABLE IF NOT EXISTS _chunk_catalog_chunk (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    partitioned_table_id INTEGER NOT NULL
        REFERENCES _chunk_catalog_partitioned_table(id) ON DELETE CASCADE,
    schema_name TEXT NOT NULL,
    table_name TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    compressed INTEGER NOT NULL DEFAULT 0,
    compressed_at INTEGER,
    CHECK (start_time < end_time),
    UNIQUE (partitioned_table_id, start_time)
);

CREATE INDEX IF NOT EXISTS _chunk_catalog_chunk_end_idx
    ON _chunk_catalog_chunk(partitioned_table_id, end_time);

CREATE TABLE IF NOT EXISTS _chunk_catalog_chunk_sequence (
    partitioned_table_id INTEGER PRIMARY KEY
        REFERENCES _chunk_catalog_partitioned_table(id) ON DELETE CASCADE,
    next_value INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS _chunk_catalog_retention_policy (
    partitioned_table_id INTEGER PRIMARY KEY
        REFERENCES _chunk_catalog_partitioned_table(id) ON DELETE CASCADE,
    retain_us INTEGER NOT NULL CHECK (retain_us > 0),
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS _chunk_catalog_compressed_column (
    chunk_id INTEGER NOT NULL
        REFERENCES _chunk_catalog_chunk(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL,
    column_name TEXT NOT NULL,
    column_type TEXT NOT NULL,
    codec TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    uncompressed_bytes INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (chunk_id, ordinal)
);
";

/// Create every catalog table, index and trigger that is missing
pub fn init_schema(conn: &Connection) -> ChunkResult<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    conn.execute_batch(SCHEMA)?;

    if version < SCHEMA_VERSION {
        conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
        tracing::debug!("Catalog schema initialized at version {}", SCHEMA_VERSION);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'table' AND name LIKE '\\_chunk\\_catalog\\_%' ESCAPE '\\'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);

        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_interval_width_is_immutable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO _chunk_catalog_partitioned_table (schema_name, table_name)
                 VALUES ('main', 'metrics');
             INSERT INTO _chunk_catalog_dimension VALUES (1, 'ts', 'INTEGER', 3600000000);",
        )
        .unwrap();

        let err = conn
            .execute(
                "UPDATE _chunk_catalog_dimension SET interval_width_us = 60000000",
                [],
            )
            .unwrap_err();
        assert!(err.to_string().contains("immutable"));

        // Other columns stay writable
        conn.execute("UPDATE _chunk_catalog_dimension SET column_type = 'BIGINT'", [])
            .unwrap();
    }
}
