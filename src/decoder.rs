// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Decoder module
//!
//! Decodes one inflated FTDC metrics block into its reference document and
//! one numeric series per scalar leaf of that document.
//!
//! Block layout:
//!
//! ```text
//! [reference BSON document][numAttribs u32 LE][numDeltas u32 LE][delta stream]
//! ```
//!
//! The delta stream holds `numDeltas` unsigned varints per attribute, in
//! reference-document traversal order. A zero delta is followed by a varint
//! count of additional zero deltas; that pending count carries over into the
//! next attribute.

use std::collections::HashMap;

use crate::bson::{read_u32_le, Document, Value};
use crate::error::DecodeError;

/// Separator between attribute path segments
pub const PATH_SEPARATOR: &str = "/";

/// Longest valid u64 varint
pub const MAX_VARINT_BYTES: usize = 10;

/// Nesting limit for reference documents
const MAX_DEPTH: usize = 64;

/// Upper bound on per-series preallocation
const MAX_PREALLOC: usize = 4096;

/// Decoded output of one metrics envelope
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsBlock {
    /// Reference BSON document (first sample)
    pub block: Vec<u8>,
    /// Number of delta-encoded samples following the reference
    pub num_deltas: u32,
    /// Attribute paths in traversal order, duplicates included
    pub attributes: Vec<String>,
    /// Path to series of `num_deltas + 1` values
    pub data_points: HashMap<String, Vec<u64>>,
}

impl MetricsBlock {
    /// Samples held by this block (reference plus deltas)
    pub fn sample_count(&self) -> usize {
        self.num_deltas as usize + 1
    }

    /// Borrow the reference document
    pub fn reference(&self) -> Result<Document<'_>, DecodeError> {
        Document::from_bytes(&self.block)
    }

    /// All `sample_count()` values of `path`, `None` when the path is absent
    pub fn series(&self, path: &str) -> Option<&[u64]> {
        self.data_points.get(path).map(Vec::as_slice)
    }

    /// Value of `path` at sample `index`, zero when absent
    pub fn value(&self, path: &str, index: usize) -> u64 {
        self.data_points
            .get(path)
            .and_then(|s| s.get(index))
            .copied()
            .unwrap_or(0)
    }
}

/// Decode an unsigned LEB128 varint at `offset`.
///
/// Returns the value and the offset just past it.
pub fn decode_varint(buffer: &[u8], offset: usize) -> Result<(u64, usize), DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0;
    let mut pos = offset;

    loop {
        if pos >= buffer.len() {
            return Err(DecodeError::BufferTooShort {
                needed: pos + 1,
                available: buffer.len(),
            });
        }

        let byte = buffer[pos];
        result |= ((byte & 0x7F) as u64) << shift;
        pos += 1;

        if byte & 0x80 == 0 {
            break;
        }

        shift += 7;
        if pos - offset >= MAX_VARINT_BYTES {
            return Err(DecodeError::VarintTooLong { offset });
        }
    }

    Ok((result, pos))
}

/// Sequential reader over the delta stream with zero-run expansion
struct DeltaReader<'a> {
    buffer: &'a [u8],
    offset: usize,
    zeros_left: u64,
}

impl<'a> DeltaReader<'a> {
    fn new(buffer: &'a [u8], offset: usize) -> Self {
        Self {
            buffer,
            offset,
            zeros_left: 0,
        }
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let (value, next) = decode_varint(self.buffer, self.offset)?;
        self.offset = next;
        Ok(value)
    }

    fn next_delta(&mut self) -> Result<u64, DecodeError> {
        if self.zeros_left > 0 {
            self.zeros_left -= 1;
            return Ok(0);
        }
        let delta = self.varint()?;
        if delta == 0 {
            self.zeros_left = self.varint()?;
        }
        Ok(delta)
    }
}

/// Collects scalar leaves of a document in traversal order
struct Flattener {
    leaves: Vec<(String, u64)>,
    timestamp_values: bool,
}

impl Flattener {
    fn document(&mut self, doc: Document<'_>, parent: &str, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::MalformedBson {
                offset: 0,
                reason: format!("reference document nested deeper than {}", MAX_DEPTH),
            });
        }
        for element in doc.iter() {
            let (key, value) = element?;
            let path = if parent.is_empty() {
                key.to_string()
            } else {
                format!("{}{}{}", parent, PATH_SEPARATOR, key)
            };
            self.value(value, path, depth)?;
        }
        Ok(())
    }

    fn value(&mut self, value: Value<'_>, path: String, depth: usize) -> Result<(), DecodeError> {
        match value {
            Value::Document(doc) => self.document(doc, &path, depth + 1)?,
            Value::Array(items) => {
                for (i, element) in items.iter().enumerate() {
                    let (_, item) = element?;
                    let item_path = format!("{}{}{}", path, PATH_SEPARATOR, i);
                    self.value(item, item_path, depth + 1)?;
                }
            }
            Value::Bool(b) => self.leaves.push((path, b as u64)),
            Value::Int32(v) => self.leaves.push((path, v as u64)),
            Value::Int64(v) => self.leaves.push((path, v as u64)),
            Value::Double(v) => self.leaves.push((path, v as u64)),
            Value::DateTime(v) => self.leaves.push((path, v as u64)),
            Value::Timestamp { time, increment } => {
                let (t, i) = if self.timestamp_values {
                    (time as u64, increment as u64)
                } else {
                    (0, 0)
                };
                self.leaves.push((format!("{}{}t", path, PATH_SEPARATOR), t));
                self.leaves.push((format!("{}{}i", path, PATH_SEPARATOR), i));
            }
            // strings, object ids and the rest carry no series
            _ => {}
        }
        Ok(())
    }
}

/// Flatten a document into `(path, value)` leaves in traversal order.
///
/// Timestamps become `<path>/t` and `<path>/i`. A reference document seeds
/// both with zero (`timestamp_values = false`); the encoder passes `true`
/// for later samples so their values travel as deltas.
pub fn flatten_document(
    doc: Document<'_>,
    timestamp_values: bool,
) -> Result<Vec<(String, u64)>, DecodeError> {
    let mut flattener = Flattener {
        leaves: Vec::new(),
        timestamp_values,
    };
    flattener.document(doc, "", 0)?;
    Ok(flattener.leaves)
}

/// Decode one inflated metrics block
pub fn decode_block(buffer: &[u8]) -> Result<MetricsBlock, DecodeError> {
    let reference = Document::from_bytes(buffer)?;
    let doc_size = reference.as_bytes().len();
    let num_attribs = read_u32_le(buffer, doc_size)? as usize;
    let num_deltas = read_u32_le(buffer, doc_size + 4)?;

    let leaves = flatten_document(reference, false)?;
    if leaves.len() != num_attribs {
        return Err(DecodeError::InconsistentData {
            expected: num_attribs,
            actual: leaves.len(),
        });
    }

    let capacity = (num_deltas as usize + 1).min(MAX_PREALLOC);
    let mut attributes = Vec::with_capacity(leaves.len());
    let mut data_points: HashMap<String, Vec<u64>> = HashMap::with_capacity(leaves.len());
    for (path, value) in leaves {
        data_points.entry(path.clone()).or_insert_with(|| {
            let mut series = Vec::with_capacity(capacity);
            series.push(value);
            series
        });
        attributes.push(path);
    }

    let mut deltas = DeltaReader::new(buffer, doc_size + 8);
    for path in &attributes {
        let series = data_points
            .get_mut(path)
            .ok_or_else(|| DecodeError::InconsistentData {
                expected: num_attribs,
                actual: attributes.len(),
            })?;
        // a repeated key shares the series of its first occurrence; its
        // deltas are still consumed to keep the stream aligned
        let first_occurrence = series.len() == 1;
        let mut value = series[0];
        for _ in 0..num_deltas {
            value = value.wrapping_add(deltas.next_delta()?);
            if first_occurrence {
                series.push(value);
            }
        }
    }

    Ok(MetricsBlock {
        block: reference.as_bytes().to_vec(),
        num_deltas,
        attributes,
        data_points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::DocumentBuilder;
    use crate::encoder::encode_varint;

    fn block_bytes(reference: Vec<u8>, num_attribs: u32, num_deltas: u32, stream: &[u64]) -> Vec<u8> {
        let mut out = reference;
        out.extend_from_slice(&num_attribs.to_le_bytes());
        out.extend_from_slice(&num_deltas.to_le_bytes());
        for v in stream {
            encode_varint(*v, &mut out);
        }
        out
    }

    #[test]
    fn test_varint_single_byte() {
        assert_eq!(decode_varint(&[0x05], 0).unwrap(), (5, 1));
    }

    #[test]
    fn test_varint_multi_byte() {
        // 300 = 0b1_0010_1100
        assert_eq!(decode_varint(&[0xAC, 0x02], 0).unwrap(), (300, 2));
    }

    #[test]
    fn test_varint_max_u64() {
        let mut buf = Vec::new();
        encode_varint(u64::MAX, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_BYTES);
        assert_eq!(decode_varint(&buf, 0).unwrap(), (u64::MAX, 10));
    }

    #[test]
    fn test_varint_truncated() {
        let err = decode_varint(&[0x80, 0x80], 0).unwrap_err();
        assert!(matches!(err, DecodeError::BufferTooShort { .. }));
    }

    #[test]
    fn test_varint_too_long() {
        let buf = [0xFFu8; 11];
        let err = decode_varint(&buf, 0).unwrap_err();
        assert_eq!(err, DecodeError::VarintTooLong { offset: 0 });
    }

    #[test]
    fn test_decode_zero_run_crosses_attributes() {
        let reference = DocumentBuilder::new().int64("a", 10).int64("b", 20).build();
        // a: +1, then a zero followed by 2 more zeros -> covers a[1], b[0], b[1]
        let bytes = block_bytes(reference, 2, 2, &[1, 0, 2]);
        let block = decode_block(&bytes).unwrap();
        assert_eq!(block.series("a").unwrap(), &[10, 11, 11]);
        assert_eq!(block.series("b").unwrap(), &[20, 20, 20]);
    }

    #[test]
    fn test_paths_for_arrays_and_timestamps() {
        let reference = DocumentBuilder::new()
            .document(
                "repl",
                DocumentBuilder::new()
                    .timestamp("optime", 100, 1)
                    .array(
                        "members",
                        vec![
                            DocumentBuilder::new().string("name", "a").int32("state", 1),
                            DocumentBuilder::new().string("name", "b").int32("state", 2),
                        ],
                    ),
            )
            .build();
        let bytes = block_bytes(reference, 4, 0, &[]);
        let block = decode_block(&bytes).unwrap();
        assert_eq!(
            block.attributes,
            vec![
                "repl/optime/t",
                "repl/optime/i",
                "repl/members/0/state",
                "repl/members/1/state"
            ]
        );
        assert_eq!(block.value("repl/optime/t", 0), 0);
        assert_eq!(block.value("repl/members/1/state", 0), 2);
    }

    #[test]
    fn test_inconsistent_attribute_count() {
        let reference = DocumentBuilder::new().int32("a", 1).build();
        let bytes = block_bytes(reference, 3, 0, &[]);
        let err = decode_block(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InconsistentData {
                expected: 3,
                actual: 1
            }
        );
        assert!(err.to_string().contains("inconsistent FTDC data"));
    }

    #[test]
    fn test_truncated_delta_stream() {
        let reference = DocumentBuilder::new().int32("a", 1).build();
        let bytes = block_bytes(reference, 1, 3, &[4]);
        assert!(matches!(
            decode_block(&bytes),
            Err(DecodeError::BufferTooShort { .. })
        ));
    }

    #[test]
    fn test_missing_header() {
        let reference = DocumentBuilder::new().int32("a", 1).build();
        assert!(decode_block(&reference).is_err());
    }

    #[test]
    fn test_duplicate_keys_share_series() {
        let reference = DocumentBuilder::new().int32("a", 5).int32("a", 9).build();
        let bytes = block_bytes(reference, 2, 2, &[1, 1, 7, 7]);
        let block = decode_block(&bytes).unwrap();
        assert_eq!(block.attributes.len(), 2);
        assert_eq!(block.data_points.len(), 1);
        assert_eq!(block.series("a").unwrap(), &[5, 6, 7]);
    }

    #[test]
    fn test_wrapping_negative_delta() {
        let reference = DocumentBuilder::new().int64("a", 100).build();
        // delta of -1 encoded as u64 wrap
        let bytes = block_bytes(reference, 1, 1, &[u64::MAX]);
        let block = decode_block(&bytes).unwrap();
        assert_eq!(block.series("a").unwrap(), &[100, 99]);
    }
}
