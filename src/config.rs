// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Reader configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FtdcError, Result};

/// Controls how capture files are read and decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Decode pool size. `None` uses `max(available_parallelism - 1, 1)`.
    pub workers: Option<usize>,

    /// Keep only the newest N files after sorting (0 keeps all).
    pub latest_files: usize,

    /// Drop a corrupt block instead of the whole file.
    pub skip_corrupt_blocks: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            workers: None,
            latest_files: 0,
            skip_corrupt_blocks: false,
        }
    }
}

impl ReaderConfig {
    /// Parse from a JSON string; missing fields take defaults
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| FtdcError::Json {
            path: "<config>".to_string(),
            line: e.line(),
            reason: e.to_string(),
        })
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FtdcError::io(path.display().to_string(), &e))?;
        Self::from_json(&text).map_err(|e| match e {
            FtdcError::Json { line, reason, .. } => FtdcError::Json {
                path: path.display().to_string(),
                line,
                reason,
            },
            other => other,
        })
    }

    /// Worker count for the decode pool
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(1),
        }
    }

    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: Some(workers),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReaderConfig::default();
        assert_eq!(config.workers, None);
        assert_eq!(config.latest_files, 0);
        assert!(!config.skip_corrupt_blocks);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_json() {
        let config = ReaderConfig::from_json(r#"{"latest_files": 3}"#).unwrap();
        assert_eq!(config.latest_files, 3);
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_zero_workers_clamped() {
        assert_eq!(ReaderConfig::with_workers(0).worker_count(), 1);
        assert_eq!(ReaderConfig::with_workers(4).worker_count(), 4);
    }

    #[test]
    fn test_bad_json() {
        let err = ReaderConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, FtdcError::Json { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{"workers": 2, "skip_corrupt_blocks": true}"#).unwrap();
        let config = ReaderConfig::from_file(&path).unwrap();
        assert_eq!(config.workers, Some(2));
        assert!(config.skip_corrupt_blocks);
    }
}
