// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Encoder module
//!
//! The writer side of the block codec: samples sharing one attribute
//! layout are packed into a reference document plus a zero-run compressed
//! delta stream, deflated, and wrapped in `type: 1` envelopes.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::bson::{Document, DocumentBuilder};
use crate::decoder::flatten_document;
use crate::error::EncodeError;

/// Envelope type of the server info document
pub const TYPE_METADATA: i32 = 0;
/// Envelope type of a compressed metrics block
pub const TYPE_METRICS: i32 = 1;

/// Samples per block written by MongoDB
pub const DEFAULT_SAMPLES_PER_BLOCK: usize = 300;

/// Append `value` as an unsigned LEB128 varint
pub fn encode_varint(value: u64, output: &mut Vec<u8>) {
    let mut v = value;
    while v >= 0x80 {
        output.push((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
    output.push(v as u8);
}

/// Builds one metrics block from samples that share a reference layout
#[derive(Debug, Clone)]
pub struct BlockEncoder {
    reference: Vec<u8>,
    attributes: Vec<String>,
    /// One row per sample, reference first
    rows: Vec<Vec<u64>>,
}

impl BlockEncoder {
    /// Start a block with `reference` as its first sample
    pub fn new(reference: Vec<u8>) -> Result<Self, EncodeError> {
        let leaves = flatten_document(Document::from_bytes(&reference)?, false)?;
        let (attributes, initial): (Vec<String>, Vec<u64>) = leaves.into_iter().unzip();
        Ok(Self {
            reference,
            attributes,
            rows: vec![initial],
        })
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Delta-encoded samples so far
    pub fn num_deltas(&self) -> usize {
        self.rows.len() - 1
    }

    /// True when `sample` flattens to the reference's attribute list
    pub fn matches_layout(&self, sample: &[u8]) -> bool {
        Document::from_bytes(sample)
            .and_then(|doc| flatten_document(doc, true))
            .map(|leaves| {
                leaves.len() == self.attributes.len()
                    && leaves
                        .iter()
                        .zip(&self.attributes)
                        .all(|((path, _), attr)| path == attr)
            })
            .unwrap_or(false)
    }

    /// Append a sample document
    pub fn push_document(&mut self, sample: &[u8]) -> Result<(), EncodeError> {
        let leaves = flatten_document(Document::from_bytes(sample)?, true)?;
        if leaves.len() != self.attributes.len()
            || leaves
                .iter()
                .zip(&self.attributes)
                .any(|((path, _), attr)| path != attr)
        {
            return Err(EncodeError::SchemaMismatch {
                expected: self.attributes.len(),
                actual: leaves.len(),
            });
        }
        self.rows.push(leaves.into_iter().map(|(_, v)| v).collect());
        Ok(())
    }

    /// Append a sample given as raw values in attribute order
    pub fn push_values(&mut self, values: Vec<u64>) -> Result<(), EncodeError> {
        if values.len() != self.attributes.len() {
            return Err(EncodeError::SchemaMismatch {
                expected: self.attributes.len(),
                actual: values.len(),
            });
        }
        self.rows.push(values);
        Ok(())
    }

    /// Serialize the inflated block: reference, header, delta stream
    pub fn encode(&self) -> Vec<u8> {
        let num_deltas = self.num_deltas();
        let mut out = Vec::with_capacity(self.reference.len() + 8 + self.attributes.len() * num_deltas);
        out.extend_from_slice(&self.reference);
        out.extend_from_slice(&(self.attributes.len() as u32).to_le_bytes());
        out.extend_from_slice(&(num_deltas as u32).to_le_bytes());

        let deltas = (0..self.attributes.len()).flat_map(|a| {
            (1..self.rows.len()).map(move |j| self.rows[j][a].wrapping_sub(self.rows[j - 1][a]))
        });

        // a zero run may span attributes
        let mut zeros: u64 = 0;
        for delta in deltas {
            if delta == 0 {
                zeros += 1;
                continue;
            }
            if zeros > 0 {
                encode_varint(0, &mut out);
                encode_varint(zeros - 1, &mut out);
                zeros = 0;
            }
            encode_varint(delta, &mut out);
        }
        if zeros > 0 {
            encode_varint(0, &mut out);
            encode_varint(zeros - 1, &mut out);
        }
        out
    }

    /// Encode and deflate, prefixed with the inflated size
    pub fn compress(&self) -> Result<Vec<u8>, EncodeError> {
        compress_block(&self.encode())
    }
}

/// Deflate an inflated block into the `data` payload of a metrics envelope
pub fn compress_block(block: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(block.len() / 4 + 8);
    out.extend_from_slice(&(block.len() as u32).to_le_bytes());
    let mut zlib = ZlibEncoder::new(out, Compression::default());
    zlib.write_all(block)
        .map_err(|e| EncodeError::Deflate(e.to_string()))?;
    zlib.finish().map_err(|e| EncodeError::Deflate(e.to_string()))
}

/// `{_id, type: 0, doc}` envelope
pub fn metadata_envelope(id_ms: i64, doc: DocumentBuilder) -> Vec<u8> {
    DocumentBuilder::new()
        .datetime("_id", id_ms)
        .int32("type", TYPE_METADATA)
        .document("doc", doc)
        .build()
}

/// `{_id, type: 1, data}` envelope around a compressed payload
pub fn metrics_envelope(id_ms: i64, payload: &[u8]) -> Vec<u8> {
    DocumentBuilder::new()
        .datetime("_id", id_ms)
        .int32("type", TYPE_METRICS)
        .binary("data", 0, payload)
        .build()
}

/// Accumulates envelopes into the bytes of one `metrics.*` file.
///
/// A new block starts when the current one is full or a sample's layout
/// differs from the block's reference.
#[derive(Debug)]
pub struct MetricsFileWriter {
    buffer: Vec<u8>,
    samples_per_block: usize,
    current: Option<(i64, BlockEncoder)>,
    blocks_written: usize,
}

impl Default for MetricsFileWriter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES_PER_BLOCK)
    }
}

impl MetricsFileWriter {
    pub fn new(samples_per_block: usize) -> Self {
        Self {
            buffer: Vec::new(),
            samples_per_block: samples_per_block.max(1),
            current: None,
            blocks_written: 0,
        }
    }

    /// Append a metadata envelope
    pub fn write_metadata(&mut self, id_ms: i64, doc: DocumentBuilder) {
        self.buffer.extend(metadata_envelope(id_ms, doc));
    }

    /// Append one sample, flushing blocks as needed
    pub fn write_sample(&mut self, id_ms: i64, sample: Vec<u8>) -> Result<(), EncodeError> {
        let layout_changed = self
            .current
            .as_ref()
            .map(|(_, encoder)| !encoder.matches_layout(&sample))
            .unwrap_or(false);
        if layout_changed {
            self.flush()?;
        }
        match &mut self.current {
            Some((_, encoder)) => encoder.push_document(&sample)?,
            None => self.current = Some((id_ms, BlockEncoder::new(sample)?)),
        }
        let full = self
            .current
            .as_ref()
            .map(|(_, e)| e.num_deltas() + 1 >= self.samples_per_block)
            .unwrap_or(false);
        if full {
            self.flush()?;
        }
        Ok(())
    }

    /// Write out the pending block, if any
    pub fn flush(&mut self) -> Result<(), EncodeError> {
        if let Some((id_ms, encoder)) = self.current.take() {
            let payload = encoder.compress()?;
            self.buffer.extend(metrics_envelope(id_ms, &payload));
            self.blocks_written += 1;
        }
        Ok(())
    }

    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Flush and return the file bytes
    pub fn finish(mut self) -> Result<Vec<u8>, EncodeError> {
        self.flush()?;
        Ok(self.buffer)
    }
}
