//! Chunk catalog - SQLite-backed metadata store
//!
//! The catalog lives in the same database as the partitioned tables and
//! their chunk segments, so one transaction covers both:
//!
//! ```text
//! ┌──────────────────────── catalog.db ───────────────────────────┐
//! │ _chunk_catalog_partitioned_table   metrics (id 1)             │
//! │ _chunk_catalog_dimension           ts, 1h                     │
//! │ _chunk_catalog_chunk               [0h,1h) → _hyper_1_1_chunk │
//! │ _chunk_catalog_chunk_sequence      next = 2                   │
//! │ _chunk_catalog_retention_policy                               │
//! │ _chunk_catalog_compressed_column                              │
//! │                                                               │
//! │ metrics            (parent, guard trigger, no rows)           │
//! │ _hyper_1_1_chunk   (segment, CHECK ts in [0h,1h))             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Access goes through typed functions in [`tables`], [`chunks`] and
//! [`policies`] with bound parameters. Work happens inside a
//! [`UnitOfWork`] obtained from [`Catalog::begin`].

pub mod chunks;
pub mod policies;
pub mod schema;
pub mod tables;

use crate::chunk::error::ChunkResult;
use crate::chunk::types::PartitionedTable;
use crate::chunk::unit_of_work::UnitOfWork;
use crate::config::CatalogConfig;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time a writer waits for another unit of work to finish
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a catalog database
pub struct Catalog {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Catalog {
    /// Create or open a catalog file
    pub fn open(path: &Path, busy_timeout: Duration) -> ChunkResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = 10000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let catalog = Self::init(conn, Some(path.to_path_buf()))?;
        tracing::info!("Opened chunk catalog at {:?}", path);
        Ok(catalog)
    }

    /// Private in-memory catalog, mostly for tests
    pub fn open_in_memory() -> ChunkResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    /// Open the catalog described by the `[catalog]` config section
    pub fn from_config(config: &CatalogConfig) -> ChunkResult<Self> {
        Self::open(
            &config.path,
            Duration::from_millis(config.busy_timeout_ms),
        )
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> ChunkResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::init_schema(&conn)?;
        Ok(Self { conn, path })
    }

    /// Start a unit of work
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`), so concurrent
    /// writers on the same file queue on the busy timeout instead of failing
    /// halfway through.
    pub fn begin(&mut self) -> ChunkResult<UnitOfWork<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(UnitOfWork::new(tx))
    }

    /// Raw connection, outside any unit of work
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Database file path, `None` for in-memory catalogs
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Every registered partitioned table
    pub fn partitioned_tables(&self) -> ChunkResult<Vec<PartitionedTable>> {
        tables::list_tables(&self.conn)
    }

    /// Force a WAL checkpoint
    pub fn checkpoint(&self) -> ChunkResult<()> {
        if self.path.is_some() {
            self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::types::QualifiedName;
    use tempfile::tempdir;

    #[test]
    fn test_catalog_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("catalog.db");
        let catalog = Catalog::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();

        assert!(path.exists());
        assert_eq!(catalog.path(), Some(path.as_path()));
        assert!(catalog.partitioned_tables().unwrap().is_empty());
        catalog.checkpoint().unwrap();
    }

    #[test]
    fn test_committed_work_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let mut catalog = Catalog::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            let uow = catalog.begin().unwrap();
            tables::insert_table(uow.conn(), &QualifiedName::new("main", "kept")).unwrap();
            uow.commit().unwrap();

            let uow = catalog.begin().unwrap();
            tables::insert_table(uow.conn(), &QualifiedName::new("main", "lost")).unwrap();
            drop(uow);
        }

        let catalog = Catalog::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        let names: Vec<String> = catalog
            .partitioned_tables()
            .unwrap()
            .into_iter()
            .map(|t| t.name.name)
            .collect();
        assert_eq!(names, vec!["kept"]);
    }
}
