//! Unit of work: one catalog transaction plus its private caches
//!
//! Catalog writes and segment DDL share the transaction, so an abort undoes
//! both. The caches are released on every exit path: `commit`, `rollback`
//! and plain drop (which rolls the transaction back).

use crate::chunk::cache::{ChunkCache, DimensionCache, TableCache};
use crate::chunk::error::ChunkResult;
use rusqlite::{Connection, Savepoint, Transaction};
use uuid::Uuid;

/// Caches owned by one unit of work
#[derive(Debug)]
pub struct UnitCaches {
    pub chunks: ChunkCache,
    pub dimensions: DimensionCache,
    /// Partitioned-table recognition
    pub tables: TableCache,
}

impl UnitCaches {
    pub fn new() -> Self {
        Self {
            chunks: ChunkCache::new("chunks"),
            dimensions: DimensionCache::new("dimensions"),
            tables: TableCache::new("tables"),
        }
    }

    /// Release every cache, returning the total number of entries freed
    pub fn release(&mut self) -> usize {
        self.chunks.release() + self.dimensions.release() + self.tables.release()
    }
}

impl Default for UnitCaches {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UnitCaches {
    fn drop(&mut self) {
        self.release();
    }
}

/// A single catalog transaction with unit-of-work scoped caches
pub struct UnitOfWork<'c> {
    id: Uuid,
    tx: Transaction<'c>,
    caches: UnitCaches,
}

impl<'c> UnitOfWork<'c> {
    pub fn new(tx: Transaction<'c>) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(uow = %id, "Unit of work started");
        Self {
            id,
            tx,
            caches: UnitCaches::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection running this unit of work's transaction
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn caches(&self) -> &UnitCaches {
        &self.caches
    }

    pub fn caches_mut(&mut self) -> &mut UnitCaches {
        &mut self.caches
    }

    /// Open a nested savepoint; dropping it without commit rolls it back
    pub fn savepoint(&mut self) -> ChunkResult<Savepoint<'_>> {
        Ok(self.tx.savepoint()?)
    }

    /// Commit the transaction and release the caches
    pub fn commit(self) -> ChunkResult<()> {
        let UnitOfWork { id, tx, mut caches } = self;
        tx.commit()?;
        let released = caches.release();
        tracing::debug!(uow = %id, released, "Unit of work committed");
        Ok(())
    }

    /// Roll the transaction back and release the caches
    pub fn rollback(self) -> ChunkResult<()> {
        let UnitOfWork { id, tx, mut caches } = self;
        let released = caches.release();
        tx.rollback()?;
        tracing::debug!(uow = %id, released, "Unit of work rolled back");
        Ok(())
    }
}
