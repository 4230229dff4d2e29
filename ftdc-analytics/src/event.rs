// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Severity levels, exceedance ranges and anomaly events.

use serde::{Deserialize, Serialize};

/// Severity of a finding or anomaly. Orders most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// A contiguous stretch of points past a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
    /// Worst value seen: the maximum above a threshold, the minimum below one
    pub peak: f64,
}

impl TimeRange {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// One entry of the anomaly timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ms: i64,
    pub metric: String,
    pub peak: f64,
    /// Threshold as shown to the reader, e.g. `> 20ms`
    pub threshold: String,
    pub severity: Severity,
}

impl AnomalyEvent {
    pub fn from_range(range: &TimeRange, metric: &str, threshold: &str, severity: Severity) -> Self {
        Self {
            start_ms: range.start_ms,
            end_ms: range.end_ms,
            duration_ms: range.duration_ms(),
            metric: metric.to_string(),
            peak: range.peak,
            threshold: threshold.to_string(),
            severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        let mut levels = vec![Severity::Info, Severity::Critical, Severity::Warning];
        levels.sort();
        assert_eq!(levels, vec![Severity::Critical, Severity::Warning, Severity::Info]);
    }

    #[test]
    fn test_severity_serialization() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let back: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }
}
