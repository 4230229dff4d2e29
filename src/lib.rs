// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # ftdc - MongoDB Full-Time Diagnostic Data Capture decoder
//!
//! Reads the `metrics.*` files a `mongod` writes into `diagnostic.data`,
//! reconstructs every sample from the delta-compressed blocks, and derives
//! the named health series used for charts and scoring.
//!
//! ## Key Features
//!
//! - **Block codec**: reference document, zero-run varint deltas, zlib
//! - **Parallel reader**: bounded rayon pool, index-stable merge
//! - **Typed samples**: `serverStatus`, `systemMetrics`, `replSetGetStatus`
//! - **Derived series**: gauges, per-second rates, CPU/disk percentages, lag
//!
//! ## Quick Start
//!
//! ```rust
//! use ftdc::bson::DocumentBuilder;
//! use ftdc::{parse_metrics_file, FtdcStats, MetricsFileWriter, ReaderConfig};
//!
//! let mut writer = MetricsFileWriter::default();
//! for i in 0..3i64 {
//!     let sample = DocumentBuilder::new()
//!         .document(
//!             "serverStatus",
//!             DocumentBuilder::new()
//!                 .datetime("localTime", 1_000 * i)
//!                 .int64("uptime", 10 + i)
//!                 .document("opcounters", DocumentBuilder::new().int64("insert", 5 * i)),
//!         )
//!         .build();
//!     writer.write_sample(1_000 * i, sample).unwrap();
//! }
//! let bytes = writer.finish().unwrap();
//!
//! let data = parse_metrics_file(&bytes, &ReaderConfig::default()).unwrap();
//! assert_eq!(data.server_status.len(), 3);
//!
//! let stats = FtdcStats::from_data(data);
//! assert_eq!(stats.series("ops_insert").unwrap().values(), vec![5.0, 5.0]);
//! ```
//!
//! ## Modules
//!
//! - [`bson`]: the BSON element reader and writer FTDC needs
//! - [`decoder`]: metrics block decoding
//! - [`encoder`]: metrics block and file writing
//! - [`reader`]: envelopes, inflate, parallel file reading
//! - [`legacy`]: `keyhole_stats.*` JSON captures
//! - [`attribs`]: projection of series onto typed samples
//! - [`derive`]: named output series
//! - [`series`]: time series, window slicing, downsampling
//! - [`stats`]: aggregate store with incremental merge

// Modules
pub mod attribs;
pub mod bson;
pub mod config;
pub mod decoder;
pub mod derive;
pub mod docs;
pub mod encoder;
pub mod error;
pub mod legacy;
pub mod reader;
pub mod series;
pub mod stats;

// Re-exports for convenient access
pub use attribs::Projector;
pub use config::ReaderConfig;
pub use decoder::{decode_block, MetricsBlock};
pub use derive::{DiskStats, ReplicationLags};
pub use docs::{
    DiagnosticData, DiskMetrics, ReplMember, ReplSetStatus, ServerInfo, ServerStatus,
    SystemMetrics,
};
pub use encoder::{BlockEncoder, MetricsFileWriter};
pub use error::{DecodeError, EncodeError, FtdcError, Result};
pub use reader::{metrics_filenames, parse_metrics_file, read_diagnostic_files};
pub use series::{short_label, TimePoint, TimeSeries, MAX_POINTS};
pub use stats::FtdcStats;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
