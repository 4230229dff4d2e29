// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for FTDC decoding
//!
//! Format errors ([`DecodeError`]) are kept apart from empty-result and
//! file-level errors so callers can decide whether to skip a file or abort.

use thiserror::Error;

/// Result type alias for FTDC operations
pub type Result<T> = std::result::Result<T, FtdcError>;

/// Main error type for FTDC operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FtdcError {
    /// Block or envelope decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Block or file encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// File could not be read
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Legacy JSON line could not be parsed
    #[error("JSON error in {path} at line {line}: {reason}")]
    Json {
        path: String,
        line: usize,
        reason: String,
    },

    /// Empty input set
    #[error("no valid data file found")]
    NoValidDataFile,

    /// Files decoded but yielded no samples
    #[error("no FTDC data found")]
    NoData,

    /// Every input file failed
    #[error("all {attempted} file(s) failed, last error: {last_error}")]
    AllFilesFailed { attempted: usize, last_error: String },
}

impl FtdcError {
    /// Wrap an `std::io::Error` with the path it happened on
    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        FtdcError::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }

    /// True for errors caused by malformed bytes rather than missing data
    pub fn is_format_error(&self) -> bool {
        matches!(self, FtdcError::Decode(_) | FtdcError::Json { .. })
    }
}

/// Errors while decoding envelopes and metrics blocks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Buffer too short
    #[error("Buffer too short: need at least {needed} bytes, got {available}")]
    BufferTooShort { needed: usize, available: usize },

    /// Malformed BSON document
    #[error("Malformed BSON at offset {offset}: {reason}")]
    MalformedBson { offset: usize, reason: String },

    /// Varint longer than 10 bytes
    #[error("Varint too long at offset {offset}")]
    VarintTooLong { offset: usize },

    /// Attribute count does not match the block header
    #[error("inconsistent FTDC data: header declares {expected} attributes, reference document has {actual}")]
    InconsistentData { expected: usize, actual: usize },

    /// zlib stream could not be inflated
    #[error("Inflate failed: {0}")]
    Inflate(String),

    /// Envelope framing error
    #[error("Invalid envelope at offset {offset}: {reason}")]
    InvalidEnvelope { offset: usize, reason: String },
}

/// Errors while building metrics blocks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Sample does not share the reference document's attribute layout
    #[error("Schema mismatch: reference has {expected} attributes, sample has {actual}")]
    SchemaMismatch { expected: usize, actual: usize },

    /// Sample or reference document is not valid BSON
    #[error("Invalid document: {0}")]
    Document(#[from] DecodeError),

    /// zlib stream could not be written
    #[error("Deflate failed: {0}")]
    Deflate(String),
}
