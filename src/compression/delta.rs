//! Delta encoding for fixed-width integer columns
//!
//! Stores the first value and the difference between each pair of
//! neighbours. Slowly changing counters and IDs produce small differences
//! that fit a narrower integer than the raw values.

use crate::compression::error::{CodecError, CodecResult};
use crate::compression::stats::{min_max, CompressionStats, IntWidth};
use crate::compression::ColumnCodec;
use serde::{Deserialize, Serialize};

/// A delta-encoded integer column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEncoded {
    /// First value of the column (0 for an empty column)
    pub base: i64,
    /// `deltas[i] = values[i + 1] - values[i]`
    pub deltas: Vec<i64>,
    /// Number of encoded rows
    pub row_count: usize,
    /// Narrowest width covering every delta
    pub width: IntWidth,
}

impl DeltaEncoded {
    pub fn stats(&self) -> CompressionStats {
        let range = min_max(&self.deltas);
        let estimated_bytes = match self.row_count {
            0 => 0,
            n => 8 + (n - 1) * self.width.bytes(),
        };

        CompressionStats {
            row_count: self.row_count,
            distinct_count: None,
            min_delta: range.map(|(min, _)| min),
            max_delta: range.map(|(_, max)| max),
            zero_count: Some(self.deltas.iter().filter(|&&d| d == 0).count()),
            width: Some(self.width),
            raw_bytes: self.row_count * 8,
            estimated_bytes,
        }
    }
}

/// Delta codec for `i64` columns
pub struct DeltaCodec;

impl ColumnCodec for DeltaCodec {
    type Value = i64;
    type Encoded = DeltaEncoded;

    fn compress(values: &[i64]) -> CodecResult<DeltaEncoded> {
        Ok(delta_compress(values))
    }

    fn decompress(encoded: &DeltaEncoded) -> CodecResult<Vec<i64>> {
        delta_decompress(encoded)
    }
}

/// Delta-encode a column
pub fn delta_compress(values: &[i64]) -> DeltaEncoded {
    let base = values.first().copied().unwrap_or(0);

    // Wrapping keeps the round trip exact across the whole i64 range
    let deltas: Vec<i64> = values
        .windows(2)
        .map(|pair| pair[1].wrapping_sub(pair[0]))
        .collect();
    let width = IntWidth::for_values(&deltas);

    let encoded = DeltaEncoded {
        base,
        deltas,
        row_count: values.len(),
        width,
    };

    if encoded.row_count > 1 {
        tracing::debug!("Delta encoding: {}", encoded.stats());
    }

    encoded
}

/// Rebuild the column with a prefix sum starting at `base`
pub fn delta_decompress(encoded: &DeltaEncoded) -> CodecResult<Vec<i64>> {
    let expected_deltas = encoded.row_count.saturating_sub(1);
    if encoded.deltas.len() != expected_deltas {
        return Err(CodecError::mismatch(format!(
            "delta column claims {} rows but carries {} deltas",
            encoded.row_count,
            encoded.deltas.len()
        )));
    }
    if encoded.row_count == 0 {
        return Ok(Vec::new());
    }

    let mut values = Vec::with_capacity(encoded.row_count);
    let mut current = encoded.base;
    values.push(current);

    for &delta in &encoded.deltas {
        current = current.wrapping_add(delta);
        values.push(current);
    }

    Ok(values)
}
