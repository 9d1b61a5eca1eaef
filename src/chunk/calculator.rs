//! Bucket arithmetic and chunk naming
//!
//! The single source of truth for mapping a timestamp to its chunk. Buckets
//! are half-open `[start, start + width)` and aligned to multiples of the
//! width, counted from the epoch:
//!
//! ```text
//!   width = 1h
//!   ──┬────────────┬────────────┬────────────┬──▶ t (µs)
//!   -1h           0h           1h           2h
//!      [-1h, 0h)    [0h, 1h)     [1h, 2h)
//! ```
//!
//! Negative timestamps round toward negative infinity, so `t = -1` lands in
//! `[-w, 0)` and never in `[0, w)`.

use crate::chunk::error::{ChunkError, ChunkResult};

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_HOUR: i64 = 3600 * MICROS_PER_SECOND;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

fn check_width(width: i64) -> ChunkResult<()> {
    if width <= 0 {
        return Err(ChunkError::InvalidInterval { width });
    }
    Ok(())
}

/// Start of the bucket containing `timestamp`: `floor(timestamp / width) * width`
pub fn bucket_start(timestamp: i64, width: i64) -> ChunkResult<i64> {
    check_width(width)?;
    timestamp
        .div_euclid(width)
        .checked_mul(width)
        .ok_or(ChunkError::TimestampOutOfRange { timestamp, width })
}

/// Exclusive end of the bucket starting at `start`
pub fn bucket_end(start: i64, width: i64) -> ChunkResult<i64> {
    check_width(width)?;
    start
        .checked_add(width)
        .ok_or(ChunkError::TimestampOutOfRange {
            timestamp: start,
            width,
        })
}

/// `[start, end)` of the bucket containing `timestamp`
pub fn bucket_range(timestamp: i64, width: i64) -> ChunkResult<(i64, i64)> {
    let start = bucket_start(timestamp, width)?;
    Ok((start, bucket_end(start, width)?))
}

/// Name of the physical segment for a chunk
pub fn chunk_name(table_id: i64, sequence: i64) -> String {
    format!("_hyper_{}_{}_chunk", table_id, sequence)
}

/// Render an interval width for humans: whole days, then whole hours,
/// otherwise raw microseconds
pub fn describe_interval(width_us: i64) -> String {
    if width_us > 0 && width_us % MICROS_PER_DAY == 0 {
        let days = width_us / MICROS_PER_DAY;
        format!("{} day{}", days, if days == 1 { "" } else { "s" })
    } else if width_us > 0 && width_us % MICROS_PER_HOUR == 0 {
        let hours = width_us / MICROS_PER_HOUR;
        format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else {
        format!("{} µs", width_us)
    }
}

/// Current wall-clock time in microseconds since the epoch
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
