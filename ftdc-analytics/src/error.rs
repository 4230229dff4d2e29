// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the analytics layer.
//!
//! Assessment and diagnosis never fail; only loading data and reading
//! configuration can.

use ftdc::FtdcError;
use thiserror::Error;

/// Result type alias for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    /// Configuration could not be read or parsed
    #[error("configuration error in {path}: {reason}")]
    Config { path: String, reason: String },

    /// Capture files could not be loaded
    #[error(transparent)]
    Ftdc(#[from] FtdcError),
}

impl AnalyticsError {
    pub fn config(path: impl Into<String>, reason: impl ToString) -> Self {
        AnalyticsError::Config {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
