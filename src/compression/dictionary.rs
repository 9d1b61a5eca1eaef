//! Dictionary encoding for low-cardinality text columns
//!
//! Each distinct string is stored once, in order of first occurrence, and
//! every row becomes an `i32` code into that list.

use crate::compression::error::{CodecError, CodecResult};
use crate::compression::stats::CompressionStats;
use crate::compression::ColumnCodec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A dictionary-encoded text column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryEncoded {
    /// Distinct values in order of first occurrence
    pub dictionary: Vec<String>,
    /// One index into `dictionary` per row
    pub codes: Vec<i32>,
    /// Number of encoded rows
    pub row_count: usize,
}

impl DictionaryEncoded {
    pub fn stats(&self) -> CompressionStats {
        let dictionary_bytes: usize = self.dictionary.iter().map(String::len).sum();
        let raw_bytes: usize = self
            .codes
            .iter()
            .filter_map(|&code| self.dictionary.get(code as usize))
            .map(String::len)
            .sum();

        CompressionStats {
            row_count: self.row_count,
            distinct_count: Some(self.dictionary.len()),
            min_delta: None,
            max_delta: None,
            zero_count: None,
            width: None,
            raw_bytes,
            estimated_bytes: dictionary_bytes + self.row_count * 4,
        }
    }
}

/// Dictionary codec for text columns
pub struct DictionaryCodec;

impl ColumnCodec for DictionaryCodec {
    type Value = String;
    type Encoded = DictionaryEncoded;

    fn compress(values: &[String]) -> CodecResult<DictionaryEncoded> {
        dictionary_compress(values)
    }

    fn decompress(encoded: &DictionaryEncoded) -> CodecResult<Vec<String>> {
        dictionary_decompress(encoded)
    }
}

/// Dictionary-encode a column
///
/// Fails with `DictionaryOverflow` if the column has more distinct values
/// than an `i32` code can address.
pub fn dictionary_compress<S: AsRef<str>>(values: &[S]) -> CodecResult<DictionaryEncoded> {
    let mut dictionary: Vec<String> = Vec::new();
    let mut index: HashMap<&str, i32> = HashMap::new();
    let mut codes = Vec::with_capacity(values.len());

    for value in values {
        let value = value.as_ref();
        let code = match index.get(value) {
            Some(&code) => code,
            None => {
                let code = i32::try_from(dictionary.len())
                    .map_err(|_| CodecError::DictionaryOverflow(dictionary.len() + 1))?;
                index.insert(value, code);
                dictionary.push(value.to_string());
                code
            }
        };
        codes.push(code);
    }

    let encoded = DictionaryEncoded {
        dictionary,
        codes,
        row_count: values.len(),
    };

    if encoded.row_count > 0 {
        tracing::debug!("Dictionary encoding: {}", encoded.stats());
    }

    Ok(encoded)
}

/// Decode by dereferencing every code
pub fn dictionary_decompress(encoded: &DictionaryEncoded) -> CodecResult<Vec<String>> {
    if encoded.codes.len() != encoded.row_count {
        return Err(CodecError::mismatch(format!(
            "dictionary column claims {} rows but carries {} codes",
            encoded.row_count,
            encoded.codes.len()
        )));
    }

    encoded
        .codes
        .iter()
        .enumerate()
        .map(|(row, &code)| {
            usize::try_from(code)
                .ok()
                .and_then(|idx| encoded.dictionary.get(idx))
                .cloned()
                .ok_or_else(|| {
                    CodecError::mismatch(format!(
                        "row {} has code {} outside dictionary of {} entries",
                        row,
                        code,
                        encoded.dictionary.len()
                    ))
                })
        })
        .collect()
}
