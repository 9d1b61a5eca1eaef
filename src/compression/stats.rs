//! Compressibility statistics shared by all codecs

use serde::{Deserialize, Serialize};

/// Narrowest fixed-width integer able to hold a range of differences
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntWidth {
    I16,
    I32,
    I64,
}

impl IntWidth {
    /// Pick the narrowest width covering `[min, max]`
    pub fn for_range(min: i64, max: i64) -> Self {
        if min >= i16::MIN as i64 && max <= i16::MAX as i64 {
            IntWidth::I16
        } else if min >= i32::MIN as i64 && max <= i32::MAX as i64 {
            IntWidth::I32
        } else {
            IntWidth::I64
        }
    }

    /// Width of a slice of values; empty slices need no storage and report `I16`
    pub fn for_values(values: &[i64]) -> Self {
        match min_max(values) {
            Some((min, max)) => Self::for_range(min, max),
            None => IntWidth::I16,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IntWidth::I16 => 2,
            IntWidth::I32 => 4,
            IntWidth::I64 => 8,
        }
    }
}

impl std::fmt::Display for IntWidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "int{}", self.bytes() * 8)
    }
}

pub(crate) fn min_max(values: &[i64]) -> Option<(i64, i64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

/// Statistics a codec reports alongside its output
///
/// Purely informational: nothing here affects decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Rows in the column
    pub row_count: usize,
    /// Distinct values (dictionary codec only)
    pub distinct_count: Option<usize>,
    /// Smallest stored difference (delta codecs only)
    pub min_delta: Option<i64>,
    /// Largest stored difference (delta codecs only)
    pub max_delta: Option<i64>,
    /// Differences equal to zero (delta codecs only)
    pub zero_count: Option<usize>,
    /// Fixed width the differences fit in
    pub width: Option<IntWidth>,
    /// Size of the plain column in bytes
    pub raw_bytes: usize,
    /// Estimated size of the encoded column in bytes
    pub estimated_bytes: usize,
}

impl CompressionStats {
    /// Raw size divided by estimated size
    pub fn ratio(&self) -> f64 {
        if self.estimated_bytes > 0 {
            self.raw_bytes as f64 / self.estimated_bytes as f64
        } else {
            0.0
        }
    }

    /// Percentage of the raw size saved by the encoding
    pub fn savings_percent(&self) -> f64 {
        if self.raw_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.estimated_bytes as f64 / self.raw_bytes as f64) * 100.0
    }
}

impl std::fmt::Display for CompressionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rows={}, {} → {} bytes ({:.1}% saved)",
            self.row_count,
            self.raw_bytes,
            self.estimated_bytes,
            self.savings_percent()
        )?;
        if let Some(distinct) = self.distinct_count {
            write!(f, ", distinct={}", distinct)?;
        }
        if let (Some(min), Some(max)) = (self.min_delta, self.max_delta) {
            write!(f, ", delta range=[{}, {}]", min, max)?;
        }
        if let Some(width) = self.width {
            write!(f, ", width={}", width)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_boundaries() {
        assert_eq!(IntWidth::for_range(-32768, 32767), IntWidth::I16);
        assert_eq!(IntWidth::for_range(-32769, 0), IntWidth::I32);
        assert_eq!(IntWidth::for_range(0, 32768), IntWidth::I32);
        assert_eq!(
            IntWidth::for_range(i32::MIN as i64, i32::MAX as i64),
            IntWidth::I32
        );
        assert_eq!(IntWidth::for_range(0, i32::MAX as i64 + 1), IntWidth::I64);
        assert_eq!(IntWidth::for_values(&[]), IntWidth::I16);
        assert_eq!(IntWidth::I32.to_string(), "int32");
    }

    #[test]
    fn test_ratio_and_savings() {
        let stats = CompressionStats {
            row_count: 4,
            distinct_count: None,
            min_delta: Some(-2),
            max_delta: Some(7),
            zero_count: Some(0),
            width: Some(IntWidth::I16),
            raw_bytes: 32,
            estimated_bytes: 14,
        };
        assert!((stats.ratio() - 32.0 / 14.0).abs() < 1e-9);
        assert!((stats.savings_percent() - 56.25).abs() < 1e-9);
        assert!(stats.to_string().contains("delta range=[-2, 7]"));
    }
}
