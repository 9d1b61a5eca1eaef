//! # Hyperchunk
//!
//! Automatic time partitioning for SQLite tables.
//!
//! A table registered as partitioned never stores rows itself: each insert is
//! intercepted and redirected into a chunk, a child table covering one
//! fixed-width time bucket, created on demand inside the writer's
//! transaction.
//!
//! ## Features
//!
//! - **Transparent routing**: rows land in the chunk whose `[start, end)`
//!   range contains their time value
//! - **Race-free creation**: concurrent writers agree on a single chunk per bucket
//! - **Per-transaction caches**: repeated lookups stay off the catalog
//! - **Columnar compression**: delta, delta-of-delta and dictionary codecs
//! - **Retention**: whole-chunk drops by age, with a background worker
//!
//! ## Modules
//!
//! - [`catalog`]: SQLite-backed catalog and units of work
//! - [`chunk`]: Bucketing, lookup-or-create and insert routing
//! - [`compression`]: Column codecs
//! - [`retention`]: Retention policies and worker
//! - [`import`]: CSV and JSON row import
//! - [`config`]: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hyperchunk::{Catalog, InsertRouter, QualifiedName, Row};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut catalog = Catalog::open(
//!         std::path::Path::new("./catalog.db"),
//!         hyperchunk::catalog::DEFAULT_BUSY_TIMEOUT,
//!     )?;
//!     catalog
//!         .conn()
//!         .execute_batch("CREATE TABLE IF NOT EXISTS metrics (ts INTEGER NOT NULL, value REAL)")?;
//!
//!     let router = InsertRouter::new();
//!     let metrics = QualifiedName::new("main", "metrics");
//!
//!     let mut uow = catalog.begin()?;
//!     let table = router
//!         .manager()
//!         .create_partitioned_table(&mut uow, &metrics, "ts", 3_600_000_000)?;
//!
//!     // Written to _hyper_1_1_chunk, not to metrics
//!     router.insert(&mut uow, &metrics, Row::new().with("ts", 1_000).with("value", 7.5))?;
//!
//!     let chunks = router.manager().chunks(&mut uow, table.id)?;
//!     println!("{} chunks", chunks.len());
//!
//!     uow.commit()?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod chunk;
pub mod compression;
pub mod config;
pub mod import;
pub mod retention;

// Re-export top-level types for convenience
pub use catalog::Catalog;

pub use chunk::{
    Chunk, ChunkError, ChunkManager, ChunkResult, Dimension, InsertInterceptor, InsertRouter,
    InsertSummary, PartitionedTable, QualifiedName, RetentionPolicy, Row, SegmentHost,
    SqliteSegmentHost, UnitOfWork, Value, WriteTarget,
};

pub use compression::{CodecError, CodecResult, CompressionStats};

pub use config::{parse_interval, Config, ConfigError};

pub use import::{CsvImportResult, CsvImporter};

pub use retention::{RetentionWorker, WorkerHandle};
