//! Checksummed byte frames for persisted codec output
//!
//! Frame layout:
//! ```text
//! [crc32 (4 bytes LE)][lz4 block with prepended size]
//!                      └─ bincode(payload)
//! ```
//! The checksum covers the lz4 block so corruption is detected before
//! decompression is attempted.

use crate::compression::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

const CHECKSUM_LEN: usize = 4;

/// Serialize and compress a payload into a frame
pub fn encode_frame<T: Serialize>(payload: &T) -> CodecResult<Vec<u8>> {
    let serialized = bincode::serialize(payload)?;
    let compressed = lz4_flex::compress_prepend_size(&serialized);
    let checksum = crc32fast::hash(&compressed);

    let mut frame = Vec::with_capacity(CHECKSUM_LEN + compressed.len());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&compressed);
    Ok(frame)
}

/// Verify, decompress and deserialize a frame
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> CodecResult<T> {
    if frame.len() < CHECKSUM_LEN {
        return Err(CodecError::mismatch(format!(
            "frame of {} bytes is shorter than its checksum",
            frame.len()
        )));
    }

    let (header, body) = frame.split_at(CHECKSUM_LEN);
    let expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let found = crc32fast::hash(body);
    if expected != found {
        return Err(CodecError::ChecksumMismatch { expected, found });
    }

    let decompressed = lz4_flex::decompress_size_prepended(body)
        .map_err(|e| CodecError::mismatch(format!("LZ4 decompression failed: {}", e)))?;

    Ok(bincode::deserialize(&decompressed)?)
}
