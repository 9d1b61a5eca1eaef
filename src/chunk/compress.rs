//! Whole-chunk compression
//!
//! Compression turns a chunk's rows into one encoded payload per column and
//! empties the segment:
//!
//! ```text
//! segment rows ─▶ columns ─▶ codec per column ─▶ frame ─▶ _chunk_catalog_compressed_column
//!
//!   time column, all integers      → delta_of_delta
//!   other column, all integers     → delta
//!   all text                       → dictionary
//!   anything else (NULLs, reals)   → plain
//! ```
//!
//! Decompression reverses it and refuses payloads whose row counts or
//! checksums disagree.

use crate::catalog::chunks;
use crate::chunk::cache::ChunkCacheKey;
use crate::chunk::calculator::now_micros;
use crate::chunk::error::{ChunkError, ChunkResult};
use crate::chunk::host::SegmentHost;
use crate::chunk::manager::ChunkManager;
use crate::chunk::types::{Chunk, CompressedColumnRecord, Row, Value};
use crate::chunk::unit_of_work::UnitOfWork;
use crate::compression::{
    decode_frame, delta_compress, delta_decompress, dictionary_compress, dictionary_decompress,
    dod_compress, dod_decompress, encode_frame, CodecError, CompressionStats, DeltaEncoded,
    DeltaOfDeltaEncoded, DictionaryEncoded,
};
use serde::{Deserialize, Serialize};

/// One encoded column of a compressed chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompressedColumn {
    Delta(DeltaEncoded),
    DeltaOfDelta(DeltaOfDeltaEncoded),
    Dictionary(DictionaryEncoded),
    Plain(Vec<Value>),
}

impl CompressedColumn {
    /// Pick a codec for the column and encode it
    pub fn encode(values: &[Value], is_time_column: bool) -> ChunkResult<Self> {
        if let Some(ints) = values.iter().map(Value::as_integer).collect::<Option<Vec<i64>>>() {
            return Ok(if is_time_column {
                CompressedColumn::DeltaOfDelta(dod_compress(&ints))
            } else {
                CompressedColumn::Delta(delta_compress(&ints))
            });
        }

        if let Some(texts) = values.iter().map(Value::as_text).collect::<Option<Vec<&str>>>() {
            return Ok(CompressedColumn::Dictionary(dictionary_compress(&texts)?));
        }

        Ok(CompressedColumn::Plain(values.to_vec()))
    }

    pub fn decode(&self) -> ChunkResult<Vec<Value>> {
        Ok(match self {
            CompressedColumn::Delta(encoded) => delta_decompress(encoded)?
                .into_iter()
                .map(Value::Integer)
                .collect(),
            CompressedColumn::DeltaOfDelta(encoded) => dod_decompress(encoded)?
                .into_iter()
                .map(Value::Integer)
                .collect(),
            CompressedColumn::Dictionary(encoded) => dictionary_decompress(encoded)?
                .into_iter()
                .map(Value::Text)
                .collect(),
            CompressedColumn::Plain(values) => values.clone(),
        })
    }

    pub fn codec_name(&self) -> &'static str {
        match self {
            CompressedColumn::Delta(_) => "delta",
            CompressedColumn::DeltaOfDelta(_) => "delta_of_delta",
            CompressedColumn::Dictionary(_) => "dictionary",
            CompressedColumn::Plain(_) => "plain",
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            CompressedColumn::Delta(e) => e.row_count,
            CompressedColumn::DeltaOfDelta(e) => e.row_count,
            CompressedColumn::Dictionary(e) => e.row_count,
            CompressedColumn::Plain(values) => values.len(),
        }
    }

    /// Codec statistics; plain columns have none
    pub fn stats(&self) -> Option<CompressionStats> {
        match self {
            CompressedColumn::Delta(e) => Some(e.stats()),
            CompressedColumn::DeltaOfDelta(e) => Some(e.stats()),
            CompressedColumn::Dictionary(e) => Some(e.stats()),
            CompressedColumn::Plain(_) => None,
        }
    }
}

/// Per-column outcome of compressing a chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnReport {
    pub column: String,
    pub codec: &'static str,
    pub uncompressed_bytes: usize,
    /// Size of the stored frame
    pub stored_bytes: usize,
    #[serde(skip)]
    pub stats: Option<CompressionStats>,
}

/// Outcome of compressing one chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkCompressionReport {
    pub chunk_id: i64,
    pub segment: String,
    pub row_count: usize,
    pub columns: Vec<ColumnReport>,
}

impl ChunkCompressionReport {
    pub fn uncompressed_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.uncompressed_bytes).sum()
    }

    pub fn stored_bytes(&self) -> usize {
        self.columns.iter().map(|c| c.stored_bytes).sum()
    }
}

impl std::fmt::Display for ChunkCompressionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} rows, {} → {} bytes",
            self.segment,
            self.row_count,
            self.uncompressed_bytes(),
            self.stored_bytes()
        )?;
        for column in &self.columns {
            write!(f, "\n  {} [{}]", column.column, column.codec)?;
            if let Some(stats) = &column.stats {
                write!(f, " {}", stats)?;
            }
        }
        Ok(())
    }
}

/// Compression state of a table's chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompressionSummary {
    pub table: String,
    pub total_chunks: usize,
    pub compressed_chunks: usize,
    pub uncompressed_chunks: usize,
    /// Total size of stored frames
    pub compressed_bytes: i64,
}

impl std::fmt::Display for CompressionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} chunks ({} compressed, {} uncompressed), {} bytes compressed",
            self.table,
            self.total_chunks,
            self.compressed_chunks,
            self.uncompressed_chunks,
            self.compressed_bytes
        )
    }
}

impl<H: SegmentHost> ChunkManager<H> {
    /// Compress every column of a chunk and empty its segment
    ///
    /// Returns `None` if the chunk is already compressed or holds no rows.
    pub fn compress_chunk(
        &self,
        uow: &mut UnitOfWork<'_>,
        chunk_id: i64,
    ) -> ChunkResult<Option<ChunkCompressionReport>> {
        let chunk = self.chunk(uow, chunk_id)?;
        if chunk.compressed {
            tracing::debug!("Chunk {} is already compressed", chunk.segment);
            return Ok(None);
        }

        let rows = self.host().read_rows(uow.conn(), &chunk.segment)?;
        if rows.is_empty() {
            tracing::debug!("Chunk {} is empty, nothing to compress", chunk.segment);
            return Ok(None);
        }

        let dimension = self.dimension(uow, chunk.table_id)?;
        let layout = self.host().table_columns(uow.conn(), &chunk.segment)?;

        let mut reports = Vec::with_capacity(layout.len());
        for (ordinal, column) in layout.iter().enumerate() {
            let values: Vec<Value> = rows
                .iter()
                .map(|row| row.get(&column.name).cloned().unwrap_or(Value::Null))
                .collect();
            let uncompressed_bytes: usize = values.iter().map(Value::size_bytes).sum();

            let encoded = CompressedColumn::encode(&values, column.name == dimension.column_name)?;
            let data = encode_frame(&encoded)?;

            chunks::insert_compressed_column(
                uow.conn(),
                &CompressedColumnRecord {
                    chunk_id,
                    ordinal: ordinal as i64,
                    column_name: column.name.clone(),
                    column_type: column.decl_type.clone(),
                    codec: encoded.codec_name().to_string(),
                    row_count: values.len() as i64,
                    uncompressed_bytes: uncompressed_bytes as i64,
                    data: data.clone(),
                },
            )?;

            reports.push(ColumnReport {
                column: column.name.clone(),
                codec: encoded.codec_name(),
                uncompressed_bytes,
                stored_bytes: data.len(),
                stats: encoded.stats(),
            });
        }

        self.host().truncate_segment(uow.conn(), &chunk.segment)?;
        let compressed_at = now_micros();
        chunks::set_compressed(uow.conn(), chunk_id, Some(compressed_at))?;
        self.refresh_cached(
            uow,
            Chunk {
                compressed: true,
                compressed_at: Some(compressed_at),
                ..chunk.clone()
            },
        );

        let report = ChunkCompressionReport {
            chunk_id,
            segment: chunk.segment.to_string(),
            row_count: rows.len(),
            columns: reports,
        };
        tracing::info!(uow = %uow.id(), "Compressed {}", report);
        Ok(Some(report))
    }

    /// Restore a compressed chunk's rows into its segment
    ///
    /// Returns `false` if the chunk was not compressed.
    pub fn decompress_chunk(&self, uow: &mut UnitOfWork<'_>, chunk_id: i64) -> ChunkResult<bool> {
        let chunk = self.chunk(uow, chunk_id)?;
        if !chunk.compressed {
            tracing::debug!("Chunk {} is not compressed", chunk.segment);
            return Ok(false);
        }

        let records = chunks::compressed_columns(uow.conn(), chunk_id)?;
        let mut columns: Vec<(String, Vec<Value>)> = Vec::with_capacity(records.len());
        for record in &records {
            let encoded: CompressedColumn = decode_frame(&record.data)?;
            let values = encoded.decode()?;
            if values.len() as i64 != record.row_count {
                return Err(CodecError::mismatch(format!(
                    "column {} of {} decoded to {} rows, expected {}",
                    record.column_name,
                    chunk.segment,
                    values.len(),
                    record.row_count
                ))
                .into());
            }
            columns.push((record.column_name.clone(), values));
        }

        let row_count = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        if let Some((name, values)) = columns.iter().find(|(_, v)| v.len() != row_count) {
            return Err(ChunkError::Codec(CodecError::mismatch(format!(
                "column {} of {} has {} rows, other columns have {}",
                name,
                chunk.segment,
                values.len(),
                row_count
            ))));
        }

        // Rows written after compression go back in after the restored ones
        let pending = self.host().read_rows(uow.conn(), &chunk.segment)?;
        self.host().truncate_segment(uow.conn(), &chunk.segment)?;

        for idx in 0..row_count {
            let row: Row = columns
                .iter()
                .map(|(name, values)| (name.clone(), values[idx].clone()))
                .collect();
            self.host().insert_row(uow.conn(), &chunk.segment, &row)?;
        }
        for row in &pending {
            self.host().insert_row(uow.conn(), &chunk.segment, row)?;
        }

        chunks::delete_compressed_columns(uow.conn(), chunk_id)?;
        chunks::set_compressed(uow.conn(), chunk_id, None)?;
        self.refresh_cached(
            uow,
            Chunk {
                compressed: false,
                compressed_at: None,
                ..chunk.clone()
            },
        );

        tracing::info!(
            uow = %uow.id(),
            "Decompressed {}: {} rows restored, {} kept",
            chunk.segment,
            row_count,
            pending.len()
        );
        Ok(true)
    }

    /// Compress every uncompressed chunk ending before `cutoff`, oldest first
    pub fn compress_chunks_older_than(
        &self,
        uow: &mut UnitOfWork<'_>,
        table_id: i64,
        cutoff: i64,
    ) -> ChunkResult<Vec<ChunkCompressionReport>> {
        let candidates: Vec<Chunk> = self
            .chunks(uow, table_id)?
            .into_iter()
            .filter(|c| !c.compressed && c.end_time < cutoff)
            .collect();

        let mut reports = Vec::new();
        for chunk in candidates {
            if let Some(report) = self.compress_chunk(uow, chunk.id)? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    pub fn compression_summary(&self, uow: &mut UnitOfWork<'_>, table_id: i64) -> ChunkResult<CompressionSummary> {
        let table = self.table(uow, table_id)?;
        let all = chunks::list_chunks(uow.conn(), table_id)?;
        let compressed = all.iter().filter(|c| c.compressed).count();

        Ok(CompressionSummary {
            table: table.name.to_string(),
            total_chunks: all.len(),
            compressed_chunks: compressed,
            uncompressed_chunks: all.len() - compressed,
            compressed_bytes: chunks::compressed_bytes(uow.conn(), table_id)?,
        })
    }

    /// Replace a cached chunk after its flags changed
    fn refresh_cached(&self, uow: &mut UnitOfWork<'_>, chunk: Chunk) {
        let key = ChunkCacheKey::new(chunk.table_id, chunk.start_time);
        let cache = &mut uow.caches_mut().chunks;
        if cache.remove(&key).is_some() {
            cache.insert(key, chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::manager::tests::{create_partitioned_catalog, metrics, HOUR};
    use crate::chunk::router::InsertRouter;

    fn sample_rows() -> Vec<Row> {
        (0..100)
            .map(|i: i64| {
                let value = if i % 10 == 0 {
                    Value::Null
                } else {
                    Value::Real(i as f64 * 0.5)
                };
                Row::new()
                    .with("ts", i * 1_000_000)
                    .with("host", ["web-1", "web-2", "db-1"][(i % 3) as usize])
                    .with("value", value)
            })
            .collect()
    }

    #[test]
    fn test_codec_choice() {
        let ints = vec![Value::Integer(1), Value::Integer(5)];
        assert_eq!(CompressedColumn::encode(&ints, true).unwrap().codec_name(), "delta_of_delta");
        assert_eq!(CompressedColumn::encode(&ints, false).unwrap().codec_name(), "delta");

        let texts = vec![Value::from("a"), Value::from("b")];
        assert_eq!(CompressedColumn::encode(&texts, false).unwrap().codec_name(), "dictionary");

        let mixed = vec![Value::Integer(1), Value::Null];
        assert_eq!(CompressedColumn::encode(&mixed, false).unwrap().codec_name(), "plain");

        let reals = vec![Value::Real(1.0)];
        let encoded = CompressedColumn::encode(&reals, false).unwrap();
        assert_eq!(encoded.decode().unwrap(), reals);
        assert!(encoded.stats().is_none());
    }

    #[test]
    fn test_compress_decompress_restores_rows() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let router = InsertRouter::new();
        let manager = router.manager();
        let mut uow = catalog.begin().unwrap();

        router.insert_batch(&mut uow, &metrics(), sample_rows()).unwrap();
        let chunk = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        let before = manager.host().read_rows(uow.conn(), &chunk.segment).unwrap();

        let report = manager.compress_chunk(&mut uow, chunk.id).unwrap().unwrap();
        assert_eq!(report.row_count, 100);
        let codecs: Vec<&str> = report.columns.iter().map(|c| c.codec).collect();
        assert_eq!(codecs, vec!["delta_of_delta", "dictionary", "plain"]);
        assert!(report.to_string().contains("_hyper_"));

        assert!(manager.host().table_is_empty(uow.conn(), &chunk.segment).unwrap());
        let compressed = manager.chunk(&mut uow, chunk.id).unwrap();
        assert!(compressed.compressed);
        assert!(compressed.compressed_at.is_some());
        // The cached copy follows the catalog
        assert!(manager.get_or_create(&mut uow, table_id, 0).unwrap().compressed);

        assert!(manager.compress_chunk(&mut uow, chunk.id).unwrap().is_none());

        assert!(manager.decompress_chunk(&mut uow, chunk.id).unwrap());
        let after = manager.host().read_rows(uow.conn(), &chunk.segment).unwrap();
        assert_eq!(after, before);
        assert!(!manager.chunk(&mut uow, chunk.id).unwrap().compressed);
        assert!(!manager.decompress_chunk(&mut uow, chunk.id).unwrap());
    }

    #[test]
    fn test_rows_written_while_compressed_survive() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let router = InsertRouter::new();
        let manager = router.manager();
        let mut uow = catalog.begin().unwrap();

        router.insert_batch(&mut uow, &metrics(), sample_rows()).unwrap();
        let chunk = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        manager.compress_chunk(&mut uow, chunk.id).unwrap().unwrap();

        router
            .insert(&mut uow, &metrics(), Row::new().with("ts", 500_000_000_i64).with("host", "late"))
            .unwrap();
        manager.decompress_chunk(&mut uow, chunk.id).unwrap();

        let rows = manager.host().read_rows(uow.conn(), &chunk.segment).unwrap();
        assert_eq!(rows.len(), 101);
        assert_eq!(rows[100].get("host"), Some(&Value::Text("late".into())));
    }

    #[test]
    fn test_empty_chunk_is_skipped() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let manager = ChunkManager::new();
        let mut uow = catalog.begin().unwrap();

        let chunk = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        assert!(manager.compress_chunk(&mut uow, chunk.id).unwrap().is_none());
        assert!(!manager.chunk(&mut uow, chunk.id).unwrap().compressed);
        assert!(manager.compress_chunk(&mut uow, 999).unwrap_err().is_not_found());
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let router = InsertRouter::new();
        let manager = router.manager();
        let mut uow = catalog.begin().unwrap();

        router.insert_batch(&mut uow, &metrics(), sample_rows()).unwrap();
        let chunk = manager.get_or_create(&mut uow, table_id, 0).unwrap();
        manager.compress_chunk(&mut uow, chunk.id).unwrap();

        uow.conn()
            .execute(
                "UPDATE _chunk_catalog_compressed_column SET row_count = 7
                 WHERE chunk_id = ?1 AND ordinal = 1",
                [chunk.id],
            )
            .unwrap();
        let err = manager.decompress_chunk(&mut uow, chunk.id).unwrap_err();
        assert!(err.is_encoding_mismatch());

        uow.conn()
            .execute(
                "UPDATE _chunk_catalog_compressed_column SET data = X'00000000FF'
                 WHERE chunk_id = ?1 AND ordinal = 0",
                [chunk.id],
            )
            .unwrap();
        let err = manager.decompress_chunk(&mut uow, chunk.id).unwrap_err();
        assert!(err.is_encoding_mismatch());
    }

    #[test]
    fn test_compress_older_than_and_summary() {
        let (mut catalog, table_id) = create_partitioned_catalog();
        let router = InsertRouter::new();
        let manager = router.manager();
        let mut uow = catalog.begin().unwrap();

        let rows = (0..4).map(|h: i64| Row::new().with("ts", h * HOUR + 1).with("value", 1.0));
        router.insert_batch(&mut uow, &metrics(), rows).unwrap();

        // [0,1h) and [1h,2h) end before 2h + 1; [2h,3h) ends at 3h
        let reports = manager
            .compress_chunks_older_than(&mut uow, table_id, 2 * HOUR + 1)
            .unwrap();
        assert_eq!(reports.len(), 2);

        let summary = manager.compression_summary(&mut uow, table_id).unwrap();
        assert_eq!(summary.total_chunks, 4);
        assert_eq!(summary.compressed_chunks, 2);
        assert_eq!(summary.uncompressed_chunks, 2);
        assert!(summary.compressed_bytes > 0);
        assert!(summary.to_string().starts_with("main.metrics: 4 chunks"));

        assert!(manager
            .compress_chunks_older_than(&mut uow, table_id, 2 * HOUR + 1)
            .unwrap()
            .is_empty());
    }
}
