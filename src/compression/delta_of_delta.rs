//! Delta-of-delta encoding for timestamp columns
//!
//! Regularly spaced timestamps have a constant first difference, so the
//! second difference is almost always zero:
//!
//! ```text
//! values:       0   1000   2000   3000
//! deltas:         1000   1000   1000
//! dod:                 0      0
//! ```
//!
//! The encoder keeps `base`, `first_delta` and the second differences.
//! Decoding integrates twice.

use crate::compression::error::{CodecError, CodecResult};
use crate::compression::stats::{min_max, CompressionStats, IntWidth};
use crate::compression::ColumnCodec;
use serde::{Deserialize, Serialize};

/// A delta-of-delta encoded timestamp column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaOfDeltaEncoded {
    /// First value (0 for an empty column)
    pub base: i64,
    /// `values[1] - values[0]` (0 for fewer than two rows)
    pub first_delta: i64,
    /// `dod[i] = delta[i + 1] - delta[i]`
    pub dod: Vec<i64>,
    /// Number of encoded rows
    pub row_count: usize,
    /// Narrowest width covering every second difference
    pub width: IntWidth,
}

impl DeltaOfDeltaEncoded {
    pub fn stats(&self) -> CompressionStats {
        let range = min_max(&self.dod);
        let estimated_bytes = match self.row_count {
            0 => 0,
            1 => 8,
            n => 16 + (n - 2) * self.width.bytes(),
        };

        CompressionStats {
            row_count: self.row_count,
            distinct_count: None,
            min_delta: range.map(|(min, _)| min),
            max_delta: range.map(|(_, max)| max),
            zero_count: Some(self.dod.iter().filter(|&&d| d == 0).count()),
            width: Some(self.width),
            raw_bytes: self.row_count * 8,
            estimated_bytes,
        }
    }
}

/// Delta-of-delta codec for `i64` timestamps
pub struct DeltaOfDeltaCodec;

impl ColumnCodec for DeltaOfDeltaCodec {
    type Value = i64;
    type Encoded = DeltaOfDeltaEncoded;

    fn compress(values: &[i64]) -> CodecResult<DeltaOfDeltaEncoded> {
        Ok(dod_compress(values))
    }

    fn decompress(encoded: &DeltaOfDeltaEncoded) -> CodecResult<Vec<i64>> {
        dod_decompress(encoded)
    }
}

/// Delta-of-delta encode a column
pub fn dod_compress(values: &[i64]) -> DeltaOfDeltaEncoded {
    let base = values.first().copied().unwrap_or(0);

    let deltas: Vec<i64> = values
        .windows(2)
        .map(|pair| pair[1].wrapping_sub(pair[0]))
        .collect();
    let first_delta = deltas.first().copied().unwrap_or(0);
    let dod: Vec<i64> = deltas
        .windows(2)
        .map(|pair| pair[1].wrapping_sub(pair[0]))
        .collect();
    let width = IntWidth::for_values(&dod);

    let encoded = DeltaOfDeltaEncoded {
        base,
        first_delta,
        dod,
        row_count: values.len(),
        width,
    };

    if encoded.row_count > 2 {
        tracing::debug!("Delta-of-delta encoding: {}", encoded.stats());
    }

    encoded
}

/// Rebuild the column by integrating the second differences twice
pub fn dod_decompress(encoded: &DeltaOfDeltaEncoded) -> CodecResult<Vec<i64>> {
    let expected = encoded.row_count.saturating_sub(2);
    if encoded.dod.len() != expected {
        return Err(CodecError::mismatch(format!(
            "delta-of-delta column claims {} rows but carries {} second differences",
            encoded.row_count,
            encoded.dod.len()
        )));
    }

    match encoded.row_count {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![encoded.base]),
        _ => {}
    }

    let mut values = Vec::with_capacity(encoded.row_count);
    let mut current = encoded.base;
    let mut delta = encoded.first_delta;

    values.push(current);
    current = current.wrapping_add(delta);
    values.push(current);

    for &dd in &encoded.dod {
        delta = delta.wrapping_add(dd);
        current = current.wrapping_add(delta);
        values.push(current);
    }

    Ok(values)
}
