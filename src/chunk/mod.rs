//! Time-bucketed chunking
//!
//! A partitioned table keeps no rows itself. Each row is routed into a chunk:
//! a child table covering one half-open interval `[start, end)` of the
//! table's time column, created on first use.
//!
//! - **calculator**: bucket boundaries and chunk naming
//! - **types**: catalog records, rows and values
//! - **cache**: per-unit-of-work lookup caches
//! - **unit_of_work**: one catalog transaction plus its caches
//! - **host**: the [`SegmentHost`] seam over physical tables
//! - **manager**: lookup-or-create of chunks
//! - **router**: insert interception
//! - **compress**: columnar compression of whole chunks
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use hyperchunk::catalog::Catalog;
//! use hyperchunk::chunk::{InsertRouter, QualifiedName, Row};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut catalog = Catalog::open_in_memory()?;
//!     catalog.conn().execute_batch("CREATE TABLE metrics (ts INTEGER NOT NULL, value REAL)")?;
//!
//!     let router = InsertRouter::new();
//!     let metrics = QualifiedName::new("main", "metrics");
//!
//!     let mut uow = catalog.begin()?;
//!     router.manager().create_partitioned_table(&mut uow, &metrics, "ts", 3_600_000_000)?;
//!     router.insert(&mut uow, &metrics, Row::new().with("ts", 42).with("value", 1.5))?;
//!     uow.commit()?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod calculator;
pub mod compress;
pub mod error;
pub mod host;
pub mod manager;
pub mod router;
pub mod types;
pub mod unit_of_work;

// Re-export commonly used types
pub use cache::{CacheState, CacheStats, ChunkCache, ChunkCacheKey, DimensionCache, TableCache, UnitOfWorkCache};
pub use calculator::{bucket_end, bucket_range, bucket_start, chunk_name, describe_interval, now_micros};
pub use compress::{ChunkCompressionReport, ColumnReport, CompressedColumn, CompressionSummary};
pub use error::{ChunkError, ChunkResult};
pub use host::{SegmentHost, SegmentSpec, SqliteSegmentHost};
pub use manager::ChunkManager;
pub use router::{extract_time, InsertInterceptor, InsertRouter, InsertSummary, WriteTarget};
pub use types::{Chunk, ColumnDef, Dimension, PartitionedTable, QualifiedName, RetentionPolicy, Row, Value};
pub use unit_of_work::{UnitCaches, UnitOfWork};
