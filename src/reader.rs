// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! File reader
//!
//! Splits capture files into envelopes, inflates and decodes metrics
//! blocks on a bounded rayon pool, projects every sample, and merges the
//! per-file results in filename order.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use flate2::read::ZlibDecoder;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::attribs::Projector;
use crate::bson::{read_u32_le, Document, Value, MIN_DOCUMENT_SIZE};
use crate::config::ReaderConfig;
use crate::decoder::decode_block;
use crate::docs::{DiagnosticData, ReplSetStatus, ServerInfo, ServerStatus, SystemMetrics};
use crate::encoder::{TYPE_METADATA, TYPE_METRICS};
use crate::error::{DecodeError, FtdcError, Result};
use crate::legacy::{read_keyhole_file, KEYHOLE_PREFIX};

/// Basename prefix of binary capture files
pub const METRICS_PREFIX: &str = "metrics.";

/// Inflated blocks larger than this are rejected
const MAX_INFLATED_SIZE: usize = 256 * 1024 * 1024;

/// How a capture file is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Metrics,
    KeyholeStats,
}

impl FileKind {
    /// Route by basename; anything not `keyhole_stats.*` is binary
    pub fn of(path: &Path) -> Self {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if name.starts_with(KEYHOLE_PREFIX) => FileKind::KeyholeStats,
            _ => FileKind::Metrics,
        }
    }
}

fn is_capture_name(name: &str) -> bool {
    name.starts_with(METRICS_PREFIX) || name.starts_with(KEYHOLE_PREFIX)
}

/// Expand directories and keep `metrics.*` / `keyhole_stats.*` files, sorted.
///
/// Paths that cannot be read are skipped.
pub fn metrics_filenames<P: AsRef<Path>>(paths: &[P]) -> Vec<PathBuf> {
    let mut names = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable path");
                continue;
            }
        };
        if meta.is_dir() {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                if is_file && entry.file_name().to_str().map(is_capture_name).unwrap_or(false) {
                    names.push(entry.path());
                }
            }
        } else if meta.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .map(is_capture_name)
                .unwrap_or(false)
        {
            names.push(path.to_path_buf());
        }
    }
    sort_by_file_name(&mut names);
    names
}

/// Order by base name, then by full path. Capture names carry their start
/// time, so this is chronological across directories.
fn sort_by_file_name(files: &mut [PathBuf]) {
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
}

/// Split a file buffer into its length-prefixed envelope documents
pub fn split_envelopes(buffer: &[u8]) -> std::result::Result<Vec<Document<'_>>, DecodeError> {
    let mut envelopes = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let remaining = buffer.len() - offset;
        let size = read_u32_le(buffer, offset).map_err(|_| DecodeError::InvalidEnvelope {
            offset,
            reason: format!("{} trailing byte(s)", remaining),
        })? as usize;
        if size < MIN_DOCUMENT_SIZE || size > remaining {
            return Err(DecodeError::InvalidEnvelope {
                offset,
                reason: format!("length {} with {} byte(s) remaining", size, remaining),
            });
        }
        let doc = Document::from_bytes(&buffer[offset..offset + size]).map_err(|e| {
            DecodeError::InvalidEnvelope {
                offset,
                reason: e.to_string(),
            }
        })?;
        envelopes.push(doc);
        offset += size;
    }
    Ok(envelopes)
}

/// Strip the u32 size prefix of a `data` payload and inflate the zlib stream
pub fn inflate_payload(payload: &[u8]) -> std::result::Result<Vec<u8>, DecodeError> {
    let expected = read_u32_le(payload, 0)? as usize;
    if expected > MAX_INFLATED_SIZE {
        return Err(DecodeError::Inflate(format!(
            "declared size {} exceeds limit {}",
            expected, MAX_INFLATED_SIZE
        )));
    }
    let mut out = Vec::with_capacity(expected);
    ZlibDecoder::new(&payload[4..])
        .take(MAX_INFLATED_SIZE as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Inflate(e.to_string()))?;
    if out.len() != expected {
        debug!(expected, actual = out.len(), "inflated size differs from prefix");
    }
    Ok(out)
}

/// Samples projected out of one block
#[derive(Debug, Default)]
struct BlockSamples {
    server_status: Vec<ServerStatus>,
    system_metrics: Vec<SystemMetrics>,
    repl_status: Option<ReplSetStatus>,
}

fn decode_payload(payload: &[u8]) -> std::result::Result<BlockSamples, DecodeError> {
    let block = decode_block(&inflate_payload(payload)?)?;
    let projector = Projector::new(&block.data_points);
    let samples = block.sample_count();
    Ok(BlockSamples {
        server_status: (0..samples).map(|i| projector.server_status(i)).collect(),
        system_metrics: (0..samples).map(|i| projector.system_metrics(i)).collect(),
        repl_status: ReplSetStatus::from_reference(block.reference()?)?,
    })
}

/// Decode the bytes of one `metrics.*` file.
///
/// Blocks are decoded in parallel on the current rayon pool and merged in
/// file order.
pub fn parse_metrics_file(bytes: &[u8], config: &ReaderConfig) -> Result<DiagnosticData> {
    let mut data = DiagnosticData::default();
    let mut payloads: Vec<&[u8]> = Vec::new();

    for envelope in split_envelopes(bytes)? {
        let kind = envelope.get("type")?.and_then(|v| v.as_i64());
        match kind.map(|k| k as i32) {
            Some(TYPE_METADATA) => {
                if let Some(Value::Document(doc)) = envelope.get("doc")? {
                    data.server_info = Some(ServerInfo::from_document(doc)?);
                }
            }
            Some(TYPE_METRICS) => match envelope.get("data")? {
                Some(Value::Binary { bytes, .. }) => payloads.push(bytes),
                _ => {
                    return Err(DecodeError::InvalidEnvelope {
                        offset: 0,
                        reason: "metrics envelope without binary data".to_string(),
                    }
                    .into())
                }
            },
            _ => {}
        }
    }

    // collect keeps block k in slot k
    let decoded: Vec<std::result::Result<BlockSamples, DecodeError>> =
        payloads.par_iter().map(|p| decode_payload(p)).collect();

    for (index, result) in decoded.into_iter().enumerate() {
        match result {
            Ok(samples) => {
                data.server_status.extend(samples.server_status);
                data.system_metrics.extend(samples.system_metrics);
                data.repl_status.extend(samples.repl_status);
            }
            Err(e) if config.skip_corrupt_blocks => {
                warn!(block = index, error = %e, "skipping corrupt block");
            }
            Err(e) => return Err(e.into()),
        }
    }

    debug!(blocks = payloads.len(), samples = data.server_status.len(), "metrics file decoded");
    Ok(data)
}

fn read_metrics_file(path: &Path, config: &ReaderConfig) -> Result<DiagnosticData> {
    let started = Instant::now();
    let bytes = std::fs::read(path).map_err(|e| FtdcError::io(path.display().to_string(), &e))?;
    let data = parse_metrics_file(&bytes, config)?;
    debug!(
        file = %path.display(),
        samples = data.server_status.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "file loaded"
    );
    Ok(data)
}

/// Run `op` on a pool of `workers` threads, or inline if the pool cannot start
fn with_pool<R, F>(workers: usize, op: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(op),
        Err(e) => {
            warn!(error = %e, "decode pool unavailable, decoding on the caller's thread");
            op()
        }
    }
}

/// Read and merge capture files.
///
/// Paths are sorted by file name and optionally cut to the newest
/// `latest_files`. Binary files are decoded concurrently; legacy files
/// sequentially. A failing file is logged and skipped.
pub fn read_diagnostic_files<P: AsRef<Path>>(
    paths: &[P],
    config: &ReaderConfig,
) -> Result<DiagnosticData> {
    if paths.is_empty() {
        return Err(FtdcError::NoValidDataFile);
    }
    let started = Instant::now();

    let mut files: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    sort_by_file_name(&mut files);
    if config.latest_files > 0 && files.len() > config.latest_files {
        files.drain(..files.len() - config.latest_files);
    }

    let mut slots: Vec<Option<Result<DiagnosticData>>> = (0..files.len()).map(|_| None).collect();
    let binary: Vec<usize> = (0..files.len())
        .filter(|&i| FileKind::of(&files[i]) == FileKind::Metrics)
        .collect();

    let workers = config.worker_count();
    debug!(files = files.len(), workers, "reading capture files");
    let decoded: Vec<Result<DiagnosticData>> = with_pool(workers, || {
        binary
            .par_iter()
            .map(|&i| read_metrics_file(&files[i], config))
            .collect()
    });
    for (i, result) in binary.iter().zip(decoded) {
        slots[*i] = Some(result);
    }
    for (i, path) in files.iter().enumerate() {
        if FileKind::of(path) == FileKind::KeyholeStats {
            slots[i] = Some(read_keyhole_file(path));
        }
    }

    let mut merged = DiagnosticData::default();
    let mut failed = 0usize;
    let mut last_error = None;
    for (path, slot) in files.iter().zip(slots) {
        match slot {
            Some(Ok(data)) => merged.append(data),
            Some(Err(e)) => {
                warn!(file = %path.display(), error = %e, "skipping file");
                failed += 1;
                last_error = Some(e);
            }
            None => {}
        }
    }

    if failed == files.len() {
        return Err(FtdcError::AllFilesFailed {
            attempted: files.len(),
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        });
    }
    if merged.server_status.is_empty() {
        return Err(FtdcError::NoData);
    }

    info!(
        files = files.len(),
        failed,
        samples = merged.server_status.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "capture files loaded"
    );
    Ok(merged)
}
