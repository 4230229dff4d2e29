// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Minimal BSON element access
//!
//! FTDC only needs to walk documents in element order (duplicate keys
//! included), read a handful of scalar types and skip everything else.
//! [`Document`] is a borrowed, zero-copy view; [`DocumentBuilder`] writes
//! the same subset back out for envelopes and reference documents.

use crate::error::DecodeError;

/// BSON element type tags used by FTDC captures
pub mod element {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const ARRAY: u8 = 0x04;
    pub const BINARY: u8 = 0x05;
    pub const UNDEFINED: u8 = 0x06;
    pub const OBJECT_ID: u8 = 0x07;
    pub const BOOL: u8 = 0x08;
    pub const DATETIME: u8 = 0x09;
    pub const NULL: u8 = 0x0A;
    pub const REGEX: u8 = 0x0B;
    pub const DB_POINTER: u8 = 0x0C;
    pub const JAVASCRIPT: u8 = 0x0D;
    pub const SYMBOL: u8 = 0x0E;
    pub const JAVASCRIPT_WITH_SCOPE: u8 = 0x0F;
    pub const INT32: u8 = 0x10;
    pub const TIMESTAMP: u8 = 0x11;
    pub const INT64: u8 = 0x12;
    pub const DECIMAL128: u8 = 0x13;
    pub const MIN_KEY: u8 = 0xFF;
    pub const MAX_KEY: u8 = 0x7F;
}

/// Smallest valid document: length prefix plus terminator
pub const MIN_DOCUMENT_SIZE: usize = 5;

/// Read a little-endian u32 at `offset`
pub fn read_u32_le(buffer: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let end = offset.checked_add(4).ok_or(DecodeError::BufferTooShort {
        needed: usize::MAX,
        available: buffer.len(),
    })?;
    match buffer.get(offset..end) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(DecodeError::BufferTooShort {
            needed: end,
            available: buffer.len(),
        }),
    }
}

fn read_i32_le(buffer: &[u8], offset: usize) -> Result<i32, DecodeError> {
    read_u32_le(buffer, offset).map(|v| v as i32)
}

fn read_8(buffer: &[u8], offset: usize) -> Result<[u8; 8], DecodeError> {
    match buffer.get(offset..offset + 8) {
        Some(b) => {
            let mut out = [0u8; 8];
            out.copy_from_slice(b);
            Ok(out)
        }
        None => Err(DecodeError::BufferTooShort {
            needed: offset + 8,
            available: buffer.len(),
        }),
    }
}

fn malformed(offset: usize, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedBson {
        offset,
        reason: reason.into(),
    }
}

/// A borrowed BSON document (length prefix through terminator)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Document<'a> {
    bytes: &'a [u8],
}

impl<'a> Document<'a> {
    /// View the document at the start of `buffer`.
    ///
    /// Trailing bytes after the declared length are ignored.
    pub fn from_bytes(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        let declared = read_u32_le(buffer, 0)? as usize;
        if declared < MIN_DOCUMENT_SIZE {
            return Err(malformed(0, format!("document length {} too small", declared)));
        }
        if declared > buffer.len() {
            return Err(DecodeError::BufferTooShort {
                needed: declared,
                available: buffer.len(),
            });
        }
        if buffer[declared - 1] != 0 {
            return Err(malformed(declared - 1, "missing document terminator"));
        }
        Ok(Self {
            bytes: &buffer[..declared],
        })
    }

    /// Raw bytes of the document
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Iterate elements in stored order
    pub fn iter(&self) -> Elements<'a> {
        Elements {
            bytes: self.bytes,
            offset: 4,
            done: false,
        }
    }

    /// First element named `key`
    pub fn get(&self, key: &str) -> Result<Option<Value<'a>>, DecodeError> {
        for element in self.iter() {
            let (name, value) = element?;
            if name == key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Follow a chain of sub-document keys
    pub fn get_path(&self, path: &[&str]) -> Result<Option<Value<'a>>, DecodeError> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(None);
        };
        let mut current = *self;
        for key in parents {
            match current.get(key)? {
                Some(Value::Document(doc)) | Some(Value::Array(doc)) => current = doc,
                _ => return Ok(None),
            }
        }
        current.get(last)
    }
}

/// Iterator over `(key, value)` pairs of a [`Document`]
#[derive(Debug, Clone)]
pub struct Elements<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Elements<'a> {
    fn next_element(&mut self) -> Result<Option<(&'a str, Value<'a>)>, DecodeError> {
        let bytes = self.bytes;
        let start = self.offset;
        let tag = *bytes
            .get(start)
            .ok_or_else(|| malformed(start, "unexpected end of document"))?;
        if tag == 0 {
            if start + 1 != bytes.len() {
                return Err(malformed(start, "terminator before declared end"));
            }
            return Ok(None);
        }

        let key_start = start + 1;
        let key_len = bytes[key_start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| malformed(key_start, "unterminated element name"))?;
        let key = std::str::from_utf8(&bytes[key_start..key_start + key_len])
            .map_err(|_| malformed(key_start, "element name is not UTF-8"))?;
        let value_start = key_start + key_len + 1;

        let (value, size) = read_value(bytes, tag, value_start)?;
        let next = value_start
            .checked_add(size)
            .filter(|n| *n < bytes.len())
            .ok_or_else(|| malformed(value_start, "element overruns document"))?;
        self.offset = next;
        Ok(Some((key, value)))
    }
}

impl<'a> Iterator for Elements<'a> {
    type Item = Result<(&'a str, Value<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn string_size(bytes: &[u8], offset: usize) -> Result<usize, DecodeError> {
    let len = read_i32_le(bytes, offset)?;
    if len < 1 {
        return Err(malformed(offset, format!("invalid string length {}", len)));
    }
    Ok(4 + len as usize)
}

fn cstring_size(bytes: &[u8], offset: usize) -> Result<usize, DecodeError> {
    bytes
        .get(offset..)
        .and_then(|rest| rest.iter().position(|b| *b == 0))
        .map(|n| n + 1)
        .ok_or_else(|| malformed(offset, "unterminated cstring"))
}

/// Decode the value of element type `tag` at `offset`, returning it with its size
fn read_value(bytes: &[u8], tag: u8, offset: usize) -> Result<(Value<'_>, usize), DecodeError> {
    use element::*;

    let value = match tag {
        DOUBLE => (Value::Double(f64::from_le_bytes(read_8(bytes, offset)?)), 8),
        STRING => {
            let size = string_size(bytes, offset)?;
            let raw = bytes
                .get(offset + 4..offset + size - 1)
                .ok_or_else(|| malformed(offset, "string overruns document"))?;
            let s = std::str::from_utf8(raw).map_err(|_| malformed(offset, "string is not UTF-8"))?;
            (Value::String(s), size)
        }
        DOCUMENT | ARRAY => {
            let doc = Document::from_bytes(
                bytes
                    .get(offset..)
                    .ok_or_else(|| malformed(offset, "sub-document overruns document"))?,
            )
            .map_err(|e| match e {
                DecodeError::BufferTooShort { .. } => malformed(offset, "sub-document overruns document"),
                other => other,
            })?;
            let size = doc.as_bytes().len();
            if tag == DOCUMENT {
                (Value::Document(doc), size)
            } else {
                (Value::Array(doc), size)
            }
        }
        BINARY => {
            let len = read_i32_le(bytes, offset)?;
            if len < 0 {
                return Err(malformed(offset, format!("invalid binary length {}", len)));
            }
            let len = len as usize;
            let subtype = *bytes
                .get(offset + 4)
                .ok_or_else(|| malformed(offset, "binary overruns document"))?;
            let data = bytes
                .get(offset + 5..offset + 5 + len)
                .ok_or_else(|| malformed(offset, "binary overruns document"))?;
            (Value::Binary { subtype, bytes: data }, 5 + len)
        }
        UNDEFINED | NULL | MIN_KEY | MAX_KEY => (Value::Null, 0),
        OBJECT_ID => {
            if offset + 12 > bytes.len() {
                return Err(malformed(offset, "object id overruns document"));
            }
            (Value::ObjectId, 12)
        }
        BOOL => {
            let b = *bytes
                .get(offset)
                .ok_or_else(|| malformed(offset, "bool overruns document"))?;
            (Value::Bool(b != 0), 1)
        }
        DATETIME => (Value::DateTime(i64::from_le_bytes(read_8(bytes, offset)?)), 8),
        REGEX => {
            let pattern = cstring_size(bytes, offset)?;
            let options = cstring_size(bytes, offset + pattern)?;
            (Value::Other(tag), pattern + options)
        }
        DB_POINTER => (Value::Other(tag), string_size(bytes, offset)? + 12),
        JAVASCRIPT | SYMBOL => (Value::Other(tag), string_size(bytes, offset)?),
        JAVASCRIPT_WITH_SCOPE => {
            let len = read_i32_le(bytes, offset)?;
            if len < 4 {
                return Err(malformed(offset, format!("invalid code-with-scope length {}", len)));
            }
            (Value::Other(tag), len as usize)
        }
        INT32 => (Value::Int32(read_i32_le(bytes, offset)?), 4),
        TIMESTAMP => {
            let raw = u64::from_le_bytes(read_8(bytes, offset)?);
            (
                Value::Timestamp {
                    time: (raw >> 32) as u32,
                    increment: raw as u32,
                },
                8,
            )
        }
        INT64 => (Value::Int64(i64::from_le_bytes(read_8(bytes, offset)?)), 8),
        DECIMAL128 => {
            if offset + 16 > bytes.len() {
                return Err(malformed(offset, "decimal128 overruns document"));
            }
            (Value::Other(tag), 16)
        }
        other => return Err(malformed(offset - 1, format!("unknown element type 0x{:02x}", other))),
    };
    Ok(value)
}

/// A decoded BSON value, borrowing from the document buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Double(f64),
    String(&'a str),
    Document(Document<'a>),
    Array(Document<'a>),
    Binary { subtype: u8, bytes: &'a [u8] },
    ObjectId,
    Bool(bool),
    DateTime(i64),
    Null,
    Int32(i32),
    Timestamp { time: u32, increment: u32 },
    Int64(i64),
    /// Any other element type, skipped by FTDC
    Other(u8),
}

impl<'a> Value<'a> {
    /// Numeric view of integer, double, bool and date values
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int32(v) => Some(v as i64),
            Value::Int64(v) => Some(v),
            Value::Double(v) => Some(v as i64),
            Value::DateTime(v) => Some(v),
            Value::Bool(b) => Some(b as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match *self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<Document<'a>> {
        match *self {
            Value::Document(d) | Value::Array(d) => Some(d),
            _ => None,
        }
    }
}

/// Writes BSON documents in element order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBuilder {
    body: Vec<u8>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&mut self, tag: u8, key: &str) {
        self.body.push(tag);
        self.body.extend(key.bytes().filter(|b| *b != 0));
        self.body.push(0);
    }

    pub fn double(mut self, key: &str, value: f64) -> Self {
        self.key(element::DOUBLE, key);
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn string(mut self, key: &str, value: &str) -> Self {
        self.key(element::STRING, key);
        self.body
            .extend_from_slice(&((value.len() + 1) as i32).to_le_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.push(0);
        self
    }

    pub fn document(mut self, key: &str, doc: DocumentBuilder) -> Self {
        self.key(element::DOCUMENT, key);
        self.body.extend_from_slice(&doc.build());
        self
    }

    /// Array of sub-documents, keyed `"0"`, `"1"`, ...
    pub fn array(self, key: &str, items: impl IntoIterator<Item = DocumentBuilder>) -> Self {
        let array = items
            .into_iter()
            .enumerate()
            .fold(DocumentBuilder::new(), |acc, (i, item)| {
                acc.document(&i.to_string(), item)
            });
        self.array_raw(key, array)
    }

    /// Array whose elements were written by the caller with index keys
    pub fn array_raw(mut self, key: &str, elements: DocumentBuilder) -> Self {
        self.key(element::ARRAY, key);
        self.body.extend_from_slice(&elements.build());
        self
    }

    pub fn binary(mut self, key: &str, subtype: u8, bytes: &[u8]) -> Self {
        self.key(element::BINARY, key);
        self.body
            .extend_from_slice(&(bytes.len() as i32).to_le_bytes());
        self.body.push(subtype);
        self.body.extend_from_slice(bytes);
        self
    }

    pub fn object_id(mut self, key: &str, oid: [u8; 12]) -> Self {
        self.key(element::OBJECT_ID, key);
        self.body.extend_from_slice(&oid);
        self
    }

    pub fn bool(mut self, key: &str, value: bool) -> Self {
        self.key(element::BOOL, key);
        self.body.push(value as u8);
        self
    }

    pub fn datetime(mut self, key: &str, epoch_ms: i64) -> Self {
        self.key(element::DATETIME, key);
        self.body.extend_from_slice(&epoch_ms.to_le_bytes());
        self
    }

    pub fn null(mut self, key: &str) -> Self {
        self.key(element::NULL, key);
        self
    }

    pub fn int32(mut self, key: &str, value: i32) -> Self {
        self.key(element::INT32, key);
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn timestamp(mut self, key: &str, time: u32, increment: u32) -> Self {
        self.key(element::TIMESTAMP, key);
        let raw = ((time as u64) << 32) | increment as u64;
        self.body.extend_from_slice(&raw.to_le_bytes());
        self
    }

    pub fn int64(mut self, key: &str, value: i64) -> Self {
        self.key(element::INT64, key);
        self.body.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Finish the document: length prefix, elements, terminator
    pub fn build(self) -> Vec<u8> {
        let total = 4 + self.body.len() + 1;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as i32).to_le_bytes());
        out.extend_from_slice(&self.body);
        out.push(0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document() {
        let bytes = DocumentBuilder::new().build();
        assert_eq!(bytes, vec![5, 0, 0, 0, 0]);
        let doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(doc.iter().count(), 0);
    }

    #[test]
    fn test_element_order_and_duplicates() {
        let bytes = DocumentBuilder::new()
            .int32("a", 1)
            .string("host", "db1")
            .int32("a", 2)
            .build();
        let doc = Document::from_bytes(&bytes).unwrap();
        let keys: Vec<&str> = doc.iter().map(|e| e.unwrap().0).collect();
        assert_eq!(keys, vec!["a", "host", "a"]);
        assert_eq!(doc.get("a").unwrap(), Some(Value::Int32(1)));
    }

    #[test]
    fn test_nested_path() {
        let bytes = DocumentBuilder::new()
            .document(
                "hostInfo",
                DocumentBuilder::new().document(
                    "system",
                    DocumentBuilder::new().int32("numCores", 8),
                ),
            )
            .build();
        let doc = Document::from_bytes(&bytes).unwrap();
        let cores = doc.get_path(&["hostInfo", "system", "numCores"]).unwrap();
        assert_eq!(cores.and_then(|v| v.as_i64()), Some(8));
        assert_eq!(doc.get_path(&["hostInfo", "os", "name"]).unwrap(), None);
    }

    #[test]
    fn test_timestamp_layout() {
        let bytes = DocumentBuilder::new().timestamp("ts", 1_700_000_000, 7).build();
        let doc = Document::from_bytes(&bytes).unwrap();
        assert_eq!(
            doc.get("ts").unwrap(),
            Some(Value::Timestamp {
                time: 1_700_000_000,
                increment: 7
            })
        );
    }

    #[test]
    fn test_skips_unhandled_types() {
        let mut inner = DocumentBuilder::new().int32("x", 3);
        inner.key(element::DECIMAL128, "dec");
        inner.body.extend_from_slice(&[0u8; 16]);
        let inner = inner.int64("y", 4);
        let bytes = inner.build();
        let doc = Document::from_bytes(&bytes).unwrap();
        let values: Vec<Value> = doc.iter().map(|e| e.unwrap().1).collect();
        assert_eq!(values[1], Value::Other(element::DECIMAL128));
        assert_eq!(values[2], Value::Int64(4));
    }

    #[test]
    fn test_truncated_document() {
        let bytes = DocumentBuilder::new().int64("a", 1).build();
        let err = Document::from_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, DecodeError::BufferTooShort { .. }));
    }

    #[test]
    fn test_element_overrun_is_malformed() {
        let mut bytes = DocumentBuilder::new().string("s", "hello").build();
        // Inflate the string length past the document end
        bytes[7] = 0x40;
        let doc = Document::from_bytes(&bytes).unwrap();
        let first = doc.iter().next().unwrap();
        assert!(matches!(first, Err(DecodeError::MalformedBson { .. })));
    }

    #[test]
    fn test_unknown_type() {
        let mut bytes = DocumentBuilder::new().int32("a", 1).build();
        bytes[4] = 0x42;
        let doc = Document::from_bytes(&bytes).unwrap();
        assert!(doc.iter().next().unwrap().is_err());
    }
}
