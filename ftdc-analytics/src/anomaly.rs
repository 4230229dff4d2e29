// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Threshold exceedance scanning and the anomaly timeline.
//!
//! The timeline is built from raw points and is independent of scoring, so
//! a short spike that never moves a percentile still shows up.

use ftdc::{FtdcStats, TimePoint};
use serde::{Deserialize, Serialize};

use crate::config::AnomalyConfig;
use crate::event::{AnomalyEvent, Severity, TimeRange};

/// Which side of the threshold is anomalous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

/// A metric watched for the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyThreshold {
    pub metric: String,
    pub threshold: f64,
    pub direction: Direction,
    pub severity: Severity,
    pub label: String,
}

impl AnomalyThreshold {
    pub fn above(metric: &str, threshold: f64, label: &str) -> Self {
        Self {
            metric: metric.to_string(),
            threshold,
            direction: Direction::Above,
            severity: Severity::Warning,
            label: label.to_string(),
        }
    }

    pub fn below(metric: &str, threshold: f64, label: &str) -> Self {
        Self {
            direction: Direction::Below,
            ..Self::above(metric, threshold, label)
        }
    }
}

/// Thresholds watched by default.
pub fn default_thresholds() -> Vec<AnomalyThreshold> {
    vec![
        AnomalyThreshold::above("latency_read", 20.0, "> 20ms"),
        AnomalyThreshold::above("latency_write", 20.0, "> 20ms"),
        AnomalyThreshold::above("latency_command", 20.0, "> 20ms"),
        AnomalyThreshold::above("scan_keys", 100_000.0, "> 100K/s"),
        AnomalyThreshold::above("scan_objects", 100_000.0, "> 100K/s"),
        AnomalyThreshold::below("cpu_idle", 30.0, "< 30%"),
        AnomalyThreshold::above("cpu_iowait", 15.0, "> 15%"),
        AnomalyThreshold::above("mem_page_faults", 20.0, "> 20/s"),
        AnomalyThreshold::above("q_queued_read", 10.0, "> 10"),
        AnomalyThreshold::above("q_queued_write", 10.0, "> 10"),
        AnomalyThreshold::above("write_conflicts/s", 10.0, "> 10/s"),
    ]
}

/// Contiguous ranges where points lie strictly past `threshold`.
///
/// A range spans from its first to its last offending point.
pub fn find_ranges(points: &[TimePoint], threshold: f64, direction: Direction) -> Vec<TimeRange> {
    let mut ranges = Vec::new();
    let mut current: Option<TimeRange> = None;

    for point in points {
        let offending = match direction {
            Direction::Above => point.value > threshold,
            Direction::Below => point.value < threshold,
        };
        if !offending {
            if let Some(range) = current.take() {
                ranges.push(range);
            }
            continue;
        }
        let range = current.get_or_insert(TimeRange {
            start_ms: point.timestamp_ms,
            end_ms: point.timestamp_ms,
            peak: point.value,
        });
        range.peak = match direction {
            Direction::Above => range.peak.max(point.value),
            Direction::Below => range.peak.min(point.value),
        };
        range.end_ms = point.timestamp_ms;
    }
    ranges.extend(current);
    ranges
}

/// Ranges above `threshold`
pub fn find_exceedances(points: &[TimePoint], threshold: f64) -> Vec<TimeRange> {
    find_ranges(points, threshold, Direction::Above)
}

/// Build the timeline for `[from_ms, to_ms]`, sorted by start time.
///
/// Covers the configured thresholds, every disk's utilization and every
/// member's replication lag. Ranges shorter than `min_duration_ms` are
/// dropped.
pub fn collect_anomalies(
    stats: &FtdcStats,
    from_ms: i64,
    to_ms: i64,
    config: &AnomalyConfig,
) -> Vec<AnomalyEvent> {
    let mut events = Vec::new();
    let mut keep = |ranges: Vec<TimeRange>, metric: &str, label: &str, severity: Severity| {
        events.extend(
            ranges
                .iter()
                .filter(|r| r.duration_ms() >= config.min_duration_ms)
                .map(|r| AnomalyEvent::from_range(r, metric, label, severity)),
        );
    };

    for t in &config.thresholds {
        if let Some(series) = stats.series(&t.metric) {
            let ranges = find_ranges(series.window(from_ms, to_ms), t.threshold, t.direction);
            keep(ranges, &t.metric, &t.label, t.severity);
        }
    }

    let disk_label = format!("> {}%", config.disk_util_threshold);
    for (disk, disk_stats) in &stats.disks {
        let points = disk_stats.utilization.window(from_ms, to_ms);
        keep(
            find_exceedances(points, config.disk_util_threshold),
            &format!("disk_util_{}", disk),
            &disk_label,
            Severity::Warning,
        );
    }

    let lag_label = format!("> {}s", config.repl_lag_threshold);
    for (host, lags) in &stats.replication.lags {
        let points = lags.window(from_ms, to_ms);
        keep(
            find_exceedances(points, config.repl_lag_threshold),
            &format!("repl_lag_{}", host),
            &lag_label,
            Severity::Critical,
        );
    }

    events.sort_by_key(|e| e.start_ms);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftdc::TimeSeries;

    fn points(values: &[f64]) -> Vec<TimePoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TimePoint::new(v, i as i64 * 1000))
            .collect()
    }

    #[test]
    fn test_find_exceedances() {
        let ranges = find_exceedances(&points(&[1.0, 25.0, 30.0, 5.0, 21.0]), 20.0);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0], TimeRange { start_ms: 1000, end_ms: 2000, peak: 30.0 });
        assert_eq!(ranges[1], TimeRange { start_ms: 4000, end_ms: 4000, peak: 21.0 });
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(find_exceedances(&points(&[20.0, 20.0]), 20.0).is_empty());
        assert!(find_ranges(&points(&[30.0]), 30.0, Direction::Below).is_empty());
    }

    #[test]
    fn test_below_tracks_minimum() {
        let ranges = find_ranges(&points(&[50.0, 20.0, 5.0, 25.0, 60.0]), 30.0, Direction::Below);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].peak, 5.0);
        assert_eq!(ranges[0].duration_ms(), 2000);
    }

    #[test]
    fn test_short_ranges_dropped() {
        let mut stats = FtdcStats::default();
        let mut ts = TimeSeries::new("latency_read");
        // 5 s above, then 12 s above
        for t in 0..40i64 {
            let v = if (2..=7).contains(&t) || (20..=32).contains(&t) { 50.0 } else { 1.0 };
            ts.push(v, t * 1000);
        }
        stats.series.insert("latency_read".to_string(), ts);

        let events = collect_anomalies(&stats, 0, 40_000, &AnomalyConfig::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_ms, 20_000);
        assert_eq!(events[0].duration_ms, 12_000);
        assert_eq!(events[0].threshold, "> 20ms");
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[test]
    fn test_replication_lag_is_critical() {
        let mut stats = FtdcStats::default();
        let mut ts = TimeSeries::new("db2:27017");
        for t in 0..20i64 {
            ts.push(if t >= 5 { 9.0 } else { 0.0 }, t * 1000);
        }
        stats.replication.lags.insert("db2:27017".to_string(), ts);

        let events = collect_anomalies(&stats, 0, 20_000, &AnomalyConfig::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].metric, "repl_lag_db2:27017");
        assert_eq!(events[0].threshold, "> 5s");
        assert_eq!(events[0].severity, Severity::Critical);
    }
}
