//! Data retention
//!
//! Old data is removed a whole chunk at a time: a chunk is dropped only once
//! its entire range lies at or before the cutoff, so no row newer than the
//! cutoff is ever deleted.
//!
//! ```text
//!            cutoff
//!              │
//! [──c1──)[──c2──)[──c3──)
//!  dropped  kept    kept      (c2 straddles the cutoff)
//! ```
//!
//! Policies store a retention window per table; [`worker::RetentionWorker`]
//! applies them periodically.

pub mod worker;

use crate::catalog::{chunks, policies};
use crate::chunk::calculator::now_micros;
use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::host::SegmentHost;
use crate::chunk::manager::ChunkManager;
use crate::chunk::types::{Chunk, RetentionPolicy};
use crate::chunk::unit_of_work::UnitOfWork;

pub use worker::{RetentionWorker, WorkerHandle};

impl<H: SegmentHost> ChunkManager<H> {
    /// Drop every chunk of a table whose range ends at or before `cutoff`
    pub fn drop_chunks_older_than(
        &self,
        uow: &mut UnitOfWork<'_>,
        table_id: i64,
        cutoff: i64,
    ) -> ChunkResult<Vec<Chunk>> {
        let table = self.table(uow, table_id)?;
        let expired = chunks::list_chunks_ending_by(uow.conn(), table_id, cutoff)?;

        for chunk in &expired {
            self.drop_chunk(uow, chunk)?;
        }

        if !expired.is_empty() {
            tracing::info!(
                uow = %uow.id(),
                "Dropped {} chunks of {} ending at or before {}",
                expired.len(),
                table.name,
                cutoff
            );
        }
        Ok(expired)
    }

    /// Create or replace the retention window of a table
    pub fn set_retention_policy(
        &self,
        uow: &mut UnitOfWork<'_>,
        table_id: i64,
        retain_us: i64,
    ) -> ChunkResult<RetentionPolicy> {
        if retain_us <= 0 {
            return Err(ChunkError::InvalidInterval { width: retain_us });
        }
        let table = self.table(uow, table_id)?;

        let policy = RetentionPolicy {
            table_id,
            retain_us,
            updated_at: now_micros(),
        };
        policies::upsert_policy(uow.conn(), &policy)?;

        tracing::info!(uow = %uow.id(), "Retention for {} set to {} µs", table.name, retain_us);
        Ok(policy)
    }

    /// Returns `false` if the table had no policy
    pub fn remove_retention_policy(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<bool> {
        self.table(uow, table_id)?;
        policies::delete_policy(uow.conn(), table_id)
    }

    pub fn retention_policy(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<Option<RetentionPolicy>> {
        self.table(uow, table_id)?;
        policies::get_policy(uow.conn(), table_id)
    }

    pub fn retention_policies(&self, uow: &mut UnitOfWork<'_>) -> ChunkResult<Vec<RetentionPolicy>> {
        policies::list_policies(uow.conn())
    }

    /// Apply every policy relative to `now`; returns the number of chunks dropped
    pub fn apply_retention_policies(&self, uow: &mut UnitOfWork<'_>, now: i64) -> ChunkResult<usize> {
        let mut dropped = 0;
        for policy in policies::list_policies(uow.conn())? {
            // A window reaching past the start of time keeps everything
            let Some(cutoff) = now.checked_sub(policy.retain_us) else {
                continue;
            };
            dropped += self
                .drop_chunks_older_than(uow, policy.table_id, cutoff)?
                .len();
        }
        Ok(dropped)
    }
}
