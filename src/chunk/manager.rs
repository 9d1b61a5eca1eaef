//! Chunk Manager - lookup-or-create of time-bucketed chunks
//!
//! Resolution order for `get_or_create(table, t)`:
//!
//! ```text
//! dimension (cached) ─▶ bucket_start(t, width)
//!        │
//!        ▼
//! ChunkCache hit? ──yes──▶ return copy
//!        │ no
//!        ▼
//! catalog row containing t? ──yes──▶ cache, return
//!        │ no
//!        ▼
//! SAVEPOINT
//!   next sequence value ─▶ _hyper_{table}_{seq}_chunk
//!   create segment (or reuse a matching existing one)
//!   INSERT ... ON CONFLICT DO NOTHING RETURNING id
//!        │ conflict ─▶ ROLLBACK TO SAVEPOINT, DuplicateChunk ─▶ retry lookup once
//! RELEASE ─▶ cache, return
//! ```
//!
//! Every method runs inside the caller's [`UnitOfWork`]; nothing here
//! commits.

use crate::catalog::{chunks, tables};
use crate::chunk::cache::ChunkCacheKey;
use crate::chunk::calculator::{bucket_end, bucket_start, chunk_name, describe_interval};
use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::host::{Affinity, SegmentHost, SegmentSpec, SqliteSegmentHost};
use crate::chunk::types::{Chunk, Dimension, NewChunk, PartitionedTable, QualifiedName};
use crate::chunk::unit_of_work::UnitOfWork;

/// Maps rows to chunks and owns chunk lifecycle
pub struct ChunkManager<H = SqliteSegmentHost> {
    host: H,
}

impl ChunkManager<SqliteSegmentHost> {
    pub fn new() -> Self {
        Self::with_host(SqliteSegmentHost::new())
    }
}

impl Default for ChunkManager<SqliteSegmentHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SegmentHost> ChunkManager<H> {
    pub fn with_host(host: H) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    // ------------------------------------------------------------------
    // Partitioned tables
    // ------------------------------------------------------------------

    /// Register an existing, empty table for time partitioning
    pub fn create_partitioned_table(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &QualifiedName,
        time_column: &str,
        interval_width_us: i64,
    ) -> ChunkResult<PartitionedTable> {
        if interval_width_us <= 0 {
            return Err(ChunkError::InvalidInterval {
                width: interval_width_us,
            });
        }

        match self.host.object_kind(uow.conn(), name)? {
            None => return Err(ChunkError::TableNotFound(name.to_string())),
            Some(kind) if kind != "table" => {
                return Err(ChunkError::NotATable {
                    name: name.to_string(),
                    kind,
                })
            }
            Some(_) => {}
        }

        if tables::find_table(uow.conn(), name)?.is_some() {
            return Err(ChunkError::AlreadyPartitioned(name.to_string()));
        }

        let columns = self.host.table_columns(uow.conn(), name)?;
        let column = columns
            .iter()
            .find(|c| c.name == time_column)
            .ok_or_else(|| ChunkError::ColumnNotFound {
                table: name.to_string(),
                column: time_column.to_string(),
            })?;

        if !Affinity::of(&column.decl_type).keeps_integers() {
            return Err(ChunkError::UnsupportedTimeColumn {
                column: column.name.clone(),
                column_type: column.decl_type.clone(),
            });
        }
        if !column.not_null {
            tracing::warn!(
                "Time column {} of {} is nullable; rows without a time value will be rejected",
                column.name,
                name
            );
        }

        if !self.host.table_is_empty(uow.conn(), name)? {
            return Err(ChunkError::ParentNotEmpty(name.to_string()));
        }

        let table_id = tables::insert_table(uow.conn(), name)?;
        let dimension = Dimension {
            table_id,
            column_name: column.name.clone(),
            column_type: column.decl_type.clone(),
            interval_width_us,
        };
        tables::insert_dimension(uow.conn(), &dimension)?;
        tables::init_sequence(uow.conn(), table_id)?;
        self.host.install_insert_guard(uow.conn(), name)?;

        let table = PartitionedTable {
            id: table_id,
            name: name.clone(),
        };
        let caches = uow.caches_mut();
        caches.tables.insert(name.clone(), Some(table.clone()));
        caches.dimensions.insert(table_id, dimension);

        tracing::info!(
            uow = %uow.id(),
            "Partitioned {} on {} with {} chunks",
            name,
            time_column,
            describe_interval(interval_width_us)
        );
        Ok(table)
    }

    /// Drop every chunk and the catalog entries of a table, keeping the parent
    ///
    /// Returns the number of chunks dropped.
    pub fn drop_partitioned_table(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<usize> {
        let table = self.table(uow, table_id)?;
        let chunks = chunks::list_chunks(uow.conn(), table_id)?;

        for chunk in &chunks {
            self.host.drop_segment(uow.conn(), &chunk.segment)?;
        }
        self.host.remove_insert_guard(uow.conn(), &table.name)?;
        tables::delete_table(uow.conn(), table_id)?;

        let caches = uow.caches_mut();
        caches.tables.remove(&table.name);
        caches.dimensions.remove(&table_id);
        caches.chunks.retain(|key, _| key.table_id != table_id);

        tracing::info!(
            uow = %uow.id(),
            "Dropped partitioning of {} ({} chunks)",
            table.name,
            chunks.len()
        );
        Ok(chunks.len())
    }

    /// Is `name` a partitioned table, and which one
    ///
    /// Answers, negative ones included, are cached for the unit of work.
    pub fn resolve_table(
        &self,
        uow: &mut UnitOfWork<'_>,
        name: &QualifiedName,
    ) -> ChunkResult<Option<PartitionedTable>> {
        if let Some(cached) = uow.caches_mut().tables.lookup(name) {
            return Ok(cached);
        }
        let found = tables::find_table(uow.conn(), name)?;
        uow.caches_mut().tables.insert(name.clone(), found.clone());
        Ok(found)
    }

    /// Like [`resolve_table`](Self::resolve_table), failing for unknown names
    pub fn require_table(&self, uow: &mut UnitOfWork<'_>, name: &QualifiedName) -> ChunkResult<PartitionedTable> {
        self.resolve_table(uow, name)?
            .ok_or_else(|| ChunkError::TableNotFound(name.to_string()))
    }

    pub fn table(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<PartitionedTable> {
        tables::get_table(uow.conn(), table_id)?
            .ok_or_else(|| ChunkError::TableNotFound(format!("id {}", table_id)))
    }

    /// Time dimension of a table, cached for the unit of work
    pub fn dimension(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<Dimension> {
        if let Some(dimension) = uow.caches_mut().dimensions.lookup(&table_id) {
            return Ok(dimension);
        }
        let dimension = tables::get_dimension(uow.conn(), table_id)?
            .ok_or_else(|| ChunkError::TableNotFound(format!("id {}", table_id)))?;
        uow.caches_mut().dimensions.insert(table_id, dimension.clone());
        Ok(dimension)
    }

    // ------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------

    pub fn chunk(&self, uow: &mut UnitOfWork<'_>, chunk_id: i64) -> ChunkResult<Chunk> {
        chunks::get_chunk(uow.conn(), chunk_id)?.ok_or(ChunkError::ChunkNotFound(chunk_id))
    }

    /// All chunks of a table ordered by start time
    pub fn chunks(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<Vec<Chunk>> {
        self.table(uow, table_id)?;
        chunks::list_chunks(uow.conn(), table_id)
    }

    /// The chunk covering `timestamp`, created if the bucket has none yet
    pub fn get_or_create(&self, uow: &mut UnitOfWork<'_>, table_id: i64, timestamp: i64) -> ChunkResult<Chunk> {
        let dimension = self.dimension(uow, table_id)?;
        let start = bucket_start(timestamp, dimension.interval_width_us)?;

        if let Some(chunk) = self.lookup(uow, table_id, start, timestamp)? {
            return Ok(chunk);
        }

        match self.materialize(uow, &dimension, start) {
            Err(err @ ChunkError::DuplicateChunk { .. }) => {
                self.adopt_winner(uow, table_id, start, timestamp, err)
            }
            result => result,
        }
    }

    /// Create the chunk for `timestamp`'s bucket without looking for an
    /// existing one
    ///
    /// Fails with `DuplicateChunk` if the bucket is already taken.
    pub fn create_chunk(&self, uow: &mut UnitOfWork<'_>, table_id: i64, timestamp: i64) -> ChunkResult<Chunk> {
        let dimension = self.dimension(uow, table_id)?;
        let start = bucket_start(timestamp, dimension.interval_width_us)?;
        self.materialize(uow, &dimension, start)
    }

    /// Remove a chunk's segment, catalog row and cache entry
    pub fn drop_chunk(&self, uow: &mut UnitOfWork<'_>, chunk: &Chunk) -> ChunkResult<()> {
        self.host.drop_segment(uow.conn(), &chunk.segment)?;
        if !chunks::delete_chunk(uow.conn(), chunk.id)? {
            return Err(ChunkError::ChunkNotFound(chunk.id));
        }
        uow.caches_mut()
            .chunks
            .remove(&ChunkCacheKey::new(chunk.table_id, chunk.start_time));

        tracing::info!(
            uow = %uow.id(),
            "Dropped chunk {} [{}, {})",
            chunk.segment,
            chunk.start_time,
            chunk.end_time
        );
        Ok(())
    }

    /// Cache, then catalog
    fn lookup(
        &self,
        uow: &mut UnitOfWork<'_>,
        table_id: i64,
        start: i64,
        timestamp: i64,
    ) -> ChunkResult<Option<Chunk>> {
        let key = ChunkCacheKey::new(table_id, start);
        if let Some(chunk) = uow.caches_mut().chunks.lookup(&key) {
            tracing::debug!(uow = %uow.id(), "Chunk cache hit: {}", chunk.segment);
            return Ok(Some(chunk));
        }

        let found = chunks::find_containing(uow.conn(), table_id, timestamp)?;
        if let Some(chunk) = &found {
            tracing::debug!(uow = %uow.id(), "Chunk cache miss, catalog hit: {}", chunk.segment);
            uow.caches_mut().chunks.insert(key, chunk.clone());
        }
        Ok(found)
    }

    /// Second lookup after another writer claimed `start`'s bucket first
    ///
    /// The winner's chunk is cached like any catalog hit. If it still cannot
    /// be found, `lost` is returned unchanged.
    fn adopt_winner(
        &self,
        uow: &mut UnitOfWork<'_>,
        table_id: i64,
        start: i64,
        timestamp: i64,
        lost: ChunkError,
    ) -> ChunkResult<Chunk> {
        tracing::debug!(uow = %uow.id(), "{}; retrying lookup", lost);
        self.lookup(uow, table_id, start, timestamp)?.ok_or(lost)
    }

    fn materialize(&self, uow: &mut UnitOfWork<'_>, dimension: &Dimension, start: i64) -> ChunkResult<Chunk> {
        let table_id = dimension.table_id;
        let parent = self.table(uow, table_id)?.name;
        let end = bucket_end(start, dimension.interval_width_us)?;

        let sp = uow.savepoint()?;
        let sequence = tables::next_sequence_value(&sp, table_id)?;
        let segment = QualifiedName::new(parent.schema.clone(), chunk_name(table_id, sequence));

        let spec = SegmentSpec {
            parent: &parent,
            segment: &segment,
            time_column: &dimension.column_name,
            start_time: start,
            end_time: end,
        };
        if self.host.segment_exists(&sp, &segment)? {
            self.host.verify_segment(&sp, &spec)?;
            tracing::warn!("Reusing existing segment {} for new chunk", segment);
        } else {
            self.host.create_segment(&sp, &spec)?;
        }

        let new_chunk = NewChunk {
            table_id,
            segment,
            start_time: start,
            end_time: end,
        };
        let Some(id) = chunks::insert_chunk(&sp, &new_chunk)? else {
            // Dropping the savepoint discards the segment and the sequence bump
            drop(sp);
            return Err(ChunkError::DuplicateChunk {
                table_id,
                start_time: start,
            });
        };
        sp.commit()?;

        let chunk = Chunk {
            id,
            table_id,
            segment: new_chunk.segment,
            start_time: start,
            end_time: end,
            compressed: false,
            compressed_at: None,
        };
        uow.caches_mut()
            .chunks
            .insert(ChunkCacheKey::new(table_id, start), chunk.clone());

        tracing::info!(
            uow = %uow.id(),
            "Created chunk {} [{}, {}) for {}",
            chunk.segment,
            start,
            end,
            parent
        );
        Ok(chunk)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::chunk::cache::CacheState;
    use crate::chunk::types::{ColumnDef, Row};
    use rusqlite::Connection;

    pub(crate) const HOUR: i64 = 3_600_000_000;

    /// Catalog with an empty `main.metrics (ts, host, value)` table
    pub(crate) fn create_test_catalog() -> Catalog {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .conn()
            .execute_batch(
                "CREATE TABLE metrics (
                    ts INTEGER NOT NULL,
                    host TEXT,
                    value REAL
                )",
            )
            .unwrap();
        catalog
    }

    pub(crate) fn metrics() -> QualifiedName {
        QualifiedName::new("main", "metrics")
    }

    /// Catalog with `metrics` partitioned into 1-hour chunks
    pub(crate) fn create_partitioned_catalog() -> (Catalog, i64) {
        let mut catalog = create_test_catalog();
        let table_id = {
            let mut uow = catalog.begin().unwrap();
            let table = ChunkManager::new()
                .create_partitioned_table(&mut uow, &metrics(), "ts", HOUR)
                .unwrap();
            uow.commit().unwrap();
            table.id
        };
        (catalog, table_id)
    }

    fn count_chunks(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM _chunk_catalog_chunk", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_one_hour_bucketing() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let first = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        assert_eq!((first.start_time, first.end_time), (0, HOUR));
        assert_eq!(first.segment.name, format!("_hyper_{}_1_chunk", table_id));

        let same = manager.get_or_create(&mut uow, table_id, 1_800_000_000).unwrap();
        assert_eq!(same, first);

        let next = manager.get_or_create(&mut uow, table_id, HOUR).unwrap();
        assert_eq!((next.start_time, next.end_time), (HOUR, 2 * HOUR));
        assert_ne!(next.id, first.id);

        let before = manager.get_or_create(&mut uow, table_id, -1).unwrap();
        assert_eq!((before.start_time, before.end_time), (-HOUR, 0));

        assert_eq!(count_chunks(uow.conn()), 3);
        uow.commit().unwrap();
    }

    #[test]
    fn test_same_bucket_is_cache_hit() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let a = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        let hits_before = uow.caches().chunks.stats().hits;
        let b = manager.get_or_create(&mut uow, table_id, 20).unwrap();

        assert_eq!(a, b);
        assert_eq!(uow.caches().chunks.stats().hits, hits_before + 1);
        assert_eq!(count_chunks(uow.conn()), 1);
    }

    #[test]
    fn test_catalog_hit_in_later_unit_of_work() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();

        let created = {
            let mut uow = catalog.begin().unwrap();
            let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
            uow.commit().unwrap();
            chunk
        };

        let mut uow = catalog.begin().unwrap();
        assert_eq!(uow.caches().chunks.state(), CacheState::Uninitialized);
        let found = manager.get_or_create(&mut uow, table_id, 99).unwrap();
        assert_eq!(found, created);
        assert_eq!(uow.caches().chunks.stats().misses, 1);
        assert_eq!(uow.caches().chunks.len(), 1);
    }

    #[test]
    fn test_abort_discards_chunk_and_cache() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();

        {
            let mut uow = catalog.begin().unwrap();
            let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
            assert_eq!(uow.caches().chunks.len(), 1);
            assert!(manager.host().segment_exists(uow.conn(), &chunk.segment).unwrap());
            uow.rollback().unwrap();
        }

        assert_eq!(count_chunks(catalog.conn()), 0);
        assert!(!manager
            .host()
            .segment_exists(
                catalog.conn(),
                &QualifiedName::new("main", format!("_hyper_{}_1_chunk", table_id))
            )
            .unwrap());

        let mut uow = catalog.begin().unwrap();
        assert_eq!(uow.caches().chunks.state(), CacheState::Uninitialized);
        let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        // The sequence bump was rolled back with everything else
        assert_eq!(chunk.segment.name, format!("_hyper_{}_1_chunk", table_id));
        assert_eq!(uow.caches().chunks.stats().hits, 0);
    }

    #[test]
    fn test_create_chunk_reports_duplicate() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let first = manager.create_chunk(&mut uow, table_id, 5).unwrap();
        let err = manager.create_chunk(&mut uow, table_id, 7).unwrap_err();
        assert!(matches!(
            err,
            ChunkError::DuplicateChunk { start_time: 0, .. }
        ));

        // The loser's segment and sequence value were rolled back
        let loser = QualifiedName::new("main", format!("_hyper_{}_2_chunk", table_id));
        assert!(!manager.host().segment_exists(uow.conn(), &loser).unwrap());
        assert_eq!(count_chunks(uow.conn()), 1);

        let next = manager.create_chunk(&mut uow, table_id, HOUR).unwrap();
        assert_eq!(next.segment, loser);
        assert_eq!(manager.get_or_create(&mut uow, table_id, 9).unwrap(), first);
    }

    #[test]
    fn test_finds_chunk_written_by_another_writer() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();

        let mut uow = catalog.begin().unwrap();
        manager.dimension(&mut uow, table_id).unwrap();
        uow.conn()
            .execute(
                "INSERT INTO _chunk_catalog_chunk
                     (partitioned_table_id, schema_name, table_name, start_time, end_time)
                 VALUES (?1, 'main', 'winner', 0, ?2)",
                rusqlite::params![table_id, HOUR],
            )
            .unwrap();

        let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        assert_eq!(chunk.segment.name, "winner");
        assert_eq!(count_chunks(uow.conn()), 1);
    }

    #[test]
    fn test_lost_race_adopts_and_caches_winner() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        // The other writer committed its row after our first lookup missed
        uow.conn()
            .execute(
                "INSERT INTO _chunk_catalog_chunk
                     (partitioned_table_id, schema_name, table_name, start_time, end_time)
                 VALUES (?1, 'main', 'winner', 0, ?2)",
                rusqlite::params![table_id, HOUR],
            )
            .unwrap();
        let winner_id = uow.conn().last_insert_rowid();
        assert!(uow.caches().chunks.is_empty());

        let lost = ChunkError::DuplicateChunk {
            table_id,
            start_time: 0,
        };
        let chunk = manager.adopt_winner(&mut uow, table_id, 0, 10, lost).unwrap();
        assert_eq!(chunk.id, winner_id);
        assert_eq!(chunk.segment.name, "winner");
        assert_eq!(uow.caches().chunks.len(), 1);

        let hits = uow.caches().chunks.stats().hits;
        assert_eq!(manager.get_or_create(&mut uow, table_id, 20).unwrap(), chunk);
        assert_eq!(uow.caches().chunks.stats().hits, hits + 1);
        assert_eq!(count_chunks(uow.conn()), 1);
    }

    #[test]
    fn test_duplicate_surfaces_when_retry_still_misses() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();

        // A row that owns the bucket start but does not cover the timestamp
        let mut uow = catalog.begin().unwrap();
        uow.conn()
            .execute(
                "INSERT INTO _chunk_catalog_chunk
                     (partitioned_table_id, schema_name, table_name, start_time, end_time)
                 VALUES (?1, 'main', 'stub', 0, 5)",
                rusqlite::params![table_id],
            )
            .unwrap();

        let err = manager.get_or_create(&mut uow, table_id, 10).unwrap_err();
        assert!(matches!(err, ChunkError::DuplicateChunk { start_time: 0, .. }));
        assert_eq!(count_chunks(uow.conn()), 1);
    }

    #[test]
    fn test_drop_chunk_invalidates_cache() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        manager.drop_chunk(&mut uow, &chunk).unwrap();

        assert!(uow.caches().chunks.is_empty());
        assert!(!manager.host().segment_exists(uow.conn(), &chunk.segment).unwrap());
        assert!(manager.chunk(&mut uow, chunk.id).unwrap_err().is_not_found());

        let recreated = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        assert_ne!(recreated.id, chunk.id);
        assert_ne!(recreated.segment, chunk.segment);

        assert!(matches!(
            manager.drop_chunk(&mut uow, &chunk),
            Err(ChunkError::ChunkNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_table() {
        let mut catalog = create_test_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let err = manager.get_or_create(&mut uow, 42, 0).unwrap_err();
        assert!(matches!(err, ChunkError::TableNotFound(_)));
    }

    #[test]
    fn test_create_partitioned_table_validation() {
        let mut catalog = create_test_catalog();
        catalog
            .conn()
            .execute_batch(
                "CREATE VIEW metrics_view AS SELECT * FROM metrics;
                 CREATE TABLE filled (ts INTEGER);
                 INSERT INTO filled VALUES (1);
                 CREATE TABLE texty (ts TEXT);",
            )
            .unwrap();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let err = manager
            .create_partitioned_table(&mut uow, &metrics(), "ts", 0)
            .unwrap_err();
        assert!(matches!(err, ChunkError::InvalidInterval { width: 0 }));

        let err = manager
            .create_partitioned_table(&mut uow, &QualifiedName::new("main", "nope"), "ts", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::TableNotFound(_)));

        let err = manager
            .create_partitioned_table(&mut uow, &QualifiedName::new("main", "metrics_view"), "ts", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::NotATable { .. }));

        let err = manager
            .create_partitioned_table(&mut uow, &metrics(), "time", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::ColumnNotFound { .. }));

        let err = manager
            .create_partitioned_table(&mut uow, &QualifiedName::new("main", "filled"), "ts", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::ParentNotEmpty(_)));

        let err = manager
            .create_partitioned_table(&mut uow, &QualifiedName::new("main", "texty"), "ts", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::UnsupportedTimeColumn { .. }));

        manager
            .create_partitioned_table(&mut uow, &metrics(), "ts", HOUR)
            .unwrap();
        let err = manager
            .create_partitioned_table(&mut uow, &metrics(), "ts", HOUR)
            .unwrap_err();
        assert!(matches!(err, ChunkError::AlreadyPartitioned(_)));
    }

    #[test]
    fn test_segment_copies_parent_layout() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        let columns: Vec<ColumnDef> = manager
            .host()
            .table_columns(uow.conn(), &chunk.segment)
            .unwrap();
        let layout: Vec<(&str, &str, bool)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.decl_type.as_str(), c.not_null))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("ts", "INTEGER", true),
                ("host", "TEXT", false),
                ("value", "REAL", false)
            ]
        );

        let outside = Row::new().with("ts", HOUR);
        assert!(manager
            .host()
            .insert_row(uow.conn(), &chunk.segment, &outside)
            .is_err());
    }

    #[test]
    fn test_resolve_and_drop_partitioned_table() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let plain = QualifiedName::new("main", "plain");
        assert_eq!(manager.resolve_table(&mut uow, &plain).unwrap(), None);
        assert_eq!(uow.caches().tables.len(), 1);
        assert_eq!(
            manager.resolve_table(&mut uow, &metrics()).unwrap().map(|t| t.id),
            Some(table_id)
        );

        let a = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        manager.get_or_create(&mut uow, table_id, HOUR).unwrap();

        assert_eq!(manager.drop_partitioned_table(&mut uow, table_id).unwrap(), 2);
        assert_eq!(manager.resolve_table(&mut uow, &metrics()).unwrap(), None);
        assert!(uow.caches().chunks.is_empty());
        assert!(!manager.host().segment_exists(uow.conn(), &a.segment).unwrap());
        assert!(manager.dimension(&mut uow, table_id).unwrap_err().is_not_found());

        // The parent survives and accepts inserts again
        manager
            .host()
            .insert_row(uow.conn(), &metrics(), &Row::new().with("ts", 1_i64))
            .unwrap();
    }

    /// Host whose segment creation fails after doing its DDL
    struct FailingHost(SqliteSegmentHost);

    impl SegmentHost for FailingHost {
        fn object_kind(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Option<String>> {
            self.0.object_kind(conn, name)
        }
        fn table_columns(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<Vec<ColumnDef>> {
            self.0.table_columns(conn, name)
        }
        fn table_is_empty(&self, conn: &Connection, name: &QualifiedName) -> ChunkResult<bool> {
            self.0.table_is_empty(conn, name)
        }
        fn segment_exists(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<bool> {
            self.0.segment_exists(conn, segment)
        }
        fn create_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()> {
            self.0.create_segment(conn, spec)?;
            Err(ChunkError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
        fn verify_segment(&self, conn: &Connection, spec: &SegmentSpec<'_>) -> ChunkResult<()> {
            self.0.verify_segment(conn, spec)
        }
        fn drop_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()> {
            self.0.drop_segment(conn, segment)
        }
        fn truncate_segment(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<()> {
            self.0.truncate_segment(conn, segment)
        }
        fn insert_row(&self, conn: &Connection, target: &QualifiedName, row: &Row) -> ChunkResult<()> {
            self.0.insert_row(conn, target, row)
        }
        fn read_rows(&self, conn: &Connection, segment: &QualifiedName) -> ChunkResult<Vec<Row>> {
            self.0.read_rows(conn, segment)
        }
        fn install_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()> {
            self.0.install_insert_guard(conn, parent)
        }
        fn remove_insert_guard(&self, conn: &Connection, parent: &QualifiedName) -> ChunkResult<()> {
            self.0.remove_insert_guard(conn, parent)
        }
    }

    #[test]
    fn test_failed_creation_leaves_nothing_behind() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let failing = ChunkManager::with_host(FailingHost(SqliteSegmentHost::new()));
        let mut uow = catalog.begin().unwrap();

        assert!(failing.get_or_create(&mut uow, table_id, 10).is_err());
        let orphan = QualifiedName::new("main", format!("_hyper_{}_1_chunk", table_id));
        assert!(!failing.host().segment_exists(uow.conn(), &orphan).unwrap());
        assert_eq!(count_chunks(uow.conn()), 0);
        assert!(uow.caches().chunks.is_empty());

        let chunk = ChunkManager::new().get_or_create(&mut uow, table_id, 10).unwrap();
        assert_eq!(chunk.segment, orphan);
    }

    #[test]
    fn test_reuses_existing_segment() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let segment = QualifiedName::new("main", format!("_hyper_{}_1_chunk", table_id));
        manager
            .host()
            .create_segment(
                catalog.conn(),
                &SegmentSpec {
                    parent: &metrics(),
                    segment: &segment,
                    time_column: "ts",
                    start_time: 0,
                    end_time: HOUR,
                },
            )
            .unwrap();

        let mut uow = catalog.begin().unwrap();
        let chunk = manager.get_or_create(&mut uow, table_id, 10).unwrap();
        assert_eq!(chunk.segment, segment);
        assert_eq!(count_chunks(uow.conn()), 1);
    }

    #[test]
    fn test_rejects_mismatched_existing_segment() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let segment = QualifiedName::new("main", format!("_hyper_{}_1_chunk", table_id));

        // Right layout, no range check
        catalog
            .conn()
            .execute_batch(&format!(
                "CREATE TABLE {} (ts INTEGER NOT NULL, host TEXT, value REAL)",
                segment.quoted()
            ))
            .unwrap();
        {
            let mut uow = catalog.begin().unwrap();
            let err = manager.get_or_create(&mut uow, table_id, 10).unwrap_err();
            assert!(matches!(err, ChunkError::SegmentMismatch { .. }), "{}", err);
            assert_eq!(count_chunks(uow.conn()), 0);
            assert!(uow.caches().chunks.is_empty());
        }

        // Range check for another bucket
        catalog
            .conn()
            .execute_batch(&format!("DROP TABLE {}", segment.quoted()))
            .unwrap();
        manager
            .host()
            .create_segment(
                catalog.conn(),
                &SegmentSpec {
                    parent: &metrics(),
                    segment: &segment,
                    time_column: "ts",
                    start_time: HOUR,
                    end_time: 2 * HOUR,
                },
            )
            .unwrap();
        let mut uow = catalog.begin().unwrap();
        let err = manager.get_or_create(&mut uow, table_id, 10).unwrap_err();
        assert!(matches!(err, ChunkError::SegmentMismatch { .. }), "{}", err);
        assert_eq!(count_chunks(uow.conn()), 0);
    }

    #[test]
    fn test_concurrent_creation_leaves_one_row() {
        use std::sync::{Arc, Barrier};
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let table_id = {
            let mut catalog = Catalog::open(&path, Duration::from_secs(10)).unwrap();
            catalog
                .conn()
                .execute_batch("CREATE TABLE metrics (ts INTEGER NOT NULL, value REAL)")
                .unwrap();
            let mut uow = catalog.begin().unwrap();
            let table = ChunkManager::new()
                .create_partitioned_table(&mut uow, &metrics(), "ts", HOUR)
                .unwrap();
            uow.commit().unwrap();
            table.id
        };

        let writers = 8;
        let barrier = Arc::new(Barrier::new(writers));
        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let barrier = Arc::clone(&barrier);
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut catalog = Catalog::open(&path, Duration::from_secs(10)).unwrap();
                    let manager = ChunkManager::new();
                    barrier.wait();
                    let mut uow = catalog.begin().unwrap();
                    let chunk = manager
                        .get_or_create(&mut uow, table_id, 1_000 + i as i64)
                        .unwrap();
                    uow.commit().unwrap();
                    chunk.id
                })
            })
            .collect();

        let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let catalog = Catalog::open(&path, Duration::from_secs(10)).unwrap();
        assert_eq!(count_chunks(catalog.conn()), 1);
    }
}
