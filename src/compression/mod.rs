//! Columnar compression codecs
//!
//! Three lossless codecs for single columns already resident in a chunk:
//!
//! ```text
//! ┌───────────────────┬────────────┬──────────────────────────────────┐
//! │ Codec             │ Input      │ Stored                           │
//! ├───────────────────┼────────────┼──────────────────────────────────┤
//! │ DeltaCodec        │ i64        │ base, deltas                     │
//! │ DeltaOfDeltaCodec │ timestamps │ base, first_delta, dod           │
//! │ DictionaryCodec   │ text       │ distinct values, i32 codes       │
//! └───────────────────┴────────────┴──────────────────────────────────┘
//! ```
//!
//! Every codec satisfies `decompress(compress(v)) == v` and reports
//! [`CompressionStats`]. Malformed input never decodes to wrong values; it
//! fails with [`CodecError::EncodingMismatch`].
//!
//! [`frame`] wraps an encoded column for storage (bincode, LZ4, CRC32).

pub mod delta;
pub mod delta_of_delta;
pub mod dictionary;
pub mod error;
pub mod frame;
pub mod stats;

pub use delta::{delta_compress, delta_decompress, DeltaCodec, DeltaEncoded};
pub use delta_of_delta::{dod_compress, dod_decompress, DeltaOfDeltaCodec, DeltaOfDeltaEncoded};
pub use dictionary::{
    dictionary_compress, dictionary_decompress, DictionaryCodec, DictionaryEncoded,
};
pub use error::{CodecError, CodecResult};
pub use frame::{decode_frame, encode_frame};
pub use stats::{CompressionStats, IntWidth};

/// A lossless single-column codec
pub trait ColumnCodec {
    /// Element type of the plain column
    type Value;
    /// Encoded representation
    type Encoded;

    fn compress(values: &[Self::Value]) -> CodecResult<Self::Encoded>;

    fn decompress(encoded: &Self::Encoded) -> CodecResult<Vec<Self::Value>>;
}
