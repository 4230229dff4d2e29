// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Analytics configuration.

use std::path::Path;

use ftdc::{ReaderConfig, MAX_POINTS};
use serde::{Deserialize, Serialize};

use crate::anomaly::{default_thresholds, AnomalyThreshold};
use crate::error::{AnalyticsError, Result};

/// Master configuration for the analytics service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Capture file reading.
    pub reader: ReaderConfig,

    /// Points per series returned by range queries.
    pub max_points: usize,

    /// Percentile scoring.
    pub assessment: AssessmentConfig,

    /// Anomaly timeline.
    pub anomaly: AnomalyConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            reader: ReaderConfig::default(),
            max_points: MAX_POINTS,
            assessment: AssessmentConfig::default(),
            anomaly: AnomalyConfig::default(),
        }
    }
}

/// Assessment table settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Longest window that gets scored.
    pub max_window_hours: i64,

    /// Keep metrics that were not evaluated (score 101); also adds the
    /// hostname to the host info rows.
    pub verbose: bool,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            max_window_hours: 72,
            verbose: false,
        }
    }
}

/// Anomaly timeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Shortest range reported (ms).
    pub min_duration_ms: i64,

    /// Named metrics to scan.
    pub thresholds: Vec<AnomalyThreshold>,

    /// Disk utilization threshold (%), applied to every disk.
    pub disk_util_threshold: f64,

    /// Replication lag threshold (s), applied to every member.
    pub repl_lag_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: 10_000,
            thresholds: default_thresholds(),
            disk_util_threshold: 70.0,
            repl_lag_threshold: 5.0,
        }
    }
}

impl AnalyticsConfig {
    /// Parse from a JSON string; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AnalyticsError::config("<config>", e))
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|e| AnalyticsError::config(&name, e))?;
        serde_json::from_str(&text).map_err(|e| AnalyticsError::config(name, e))
    }
}
