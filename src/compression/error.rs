//! Codec error types

use thiserror::Error;

/// Errors raised by the column codecs
///
/// Every variant means the compressed input cannot be trusted. Callers treat
/// these as internal defects, never as bad user input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Compressed data does not describe a valid column of this codec
    #[error("Encoding mismatch: {0}")]
    EncodingMismatch(String),

    /// Frame checksum did not match its payload
    #[error("Encoding mismatch: checksum expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    /// More distinct values than the dictionary code type can address
    #[error("Dictionary overflow: {0} distinct values exceed the i32 code range")]
    DictionaryOverflow(usize),
}

impl CodecError {
    pub(crate) fn mismatch(msg: impl Into<String>) -> Self {
        CodecError::EncodingMismatch(msg.into())
    }

    /// True for every variant that signals unusable compressed input
    pub fn is_encoding_mismatch(&self) -> bool {
        matches!(
            self,
            CodecError::EncodingMismatch(_) | CodecError::ChecksumMismatch { .. }
        )
    }
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::EncodingMismatch(format!("bincode: {}", err))
    }
}

/// Result type alias for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
