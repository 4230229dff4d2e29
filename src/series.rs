// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Named time series, window slicing and bucket-mean downsampling

use serde::{Deserialize, Serialize};

/// Points returned per series by default
pub const MAX_POINTS: usize = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub value: f64,
    pub timestamp_ms: i64,
}

impl TimePoint {
    pub fn new(value: f64, timestamp_ms: i64) -> Self {
        Self {
            value,
            timestamp_ms,
        }
    }
}

/// A named series with non-decreasing timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub target: String,
    pub points: Vec<TimePoint>,
}

impl TimeSeries {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            points: Vec::new(),
        }
    }

    /// Append a point, clamping negative values to zero
    pub fn push(&mut self, value: f64, timestamp_ms: i64) {
        let value = if value.is_finite() && value > 0.0 { value } else { 0.0 };
        self.points.push(TimePoint::new(value, timestamp_ms));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TimePoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TimePoint> {
        self.points.last()
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Points inside `[from_ms, to_ms]`
    pub fn window(&self, from_ms: i64, to_ms: i64) -> &[TimePoint] {
        window(&self.points, from_ms, to_ms)
    }

    /// Copy of the window, renamed, downsampled to `max_points`
    pub fn filter_range(&self, from_ms: i64, to_ms: i64, max_points: usize) -> TimeSeries {
        TimeSeries {
            target: self.target.clone(),
            points: downsample(self.window(from_ms, to_ms), max_points),
        }
    }
}

/// Index of the point whose timestamp is nearest to `target_ms`.
///
/// Ties resolve to the earlier point. `None` for an empty slice.
pub fn closest_index(points: &[TimePoint], target_ms: i64) -> Option<usize> {
    let last = points.len().checked_sub(1)?;
    let upper = points.partition_point(|p| p.timestamp_ms < target_ms);
    if upper == 0 {
        return Some(0);
    }
    if upper > last {
        return Some(last);
    }
    let below = target_ms - points[upper - 1].timestamp_ms;
    let above = points[upper].timestamp_ms - target_ms;
    Some(if below <= above { upper - 1 } else { upper })
}

/// Slice of `points` lying in `[from_ms, to_ms]`
pub fn window(points: &[TimePoint], from_ms: i64, to_ms: i64) -> &[TimePoint] {
    if from_ms > to_ms {
        return &[];
    }
    let (start, end) = match (closest_index(points, from_ms), closest_index(points, to_ms)) {
        (Some(start), Some(end)) => (start, end),
        _ => return &[],
    };
    let mut start = start;
    let mut end = end + 1;
    while start < end && points[start].timestamp_ms < from_ms {
        start += 1;
    }
    while end > start && points[end - 1].timestamp_ms > to_ms {
        end -= 1;
    }
    &points[start..end]
}

/// Reduce to at most `max_points` by averaging buckets of `ceil(len / max)`.
///
/// Each bucket keeps its last timestamp. A series already within the limit
/// is returned unchanged.
pub fn downsample(points: &[TimePoint], max_points: usize) -> Vec<TimePoint> {
    if max_points == 0 || points.len() <= max_points {
        return points.to_vec();
    }
    let bucket = (points.len() + max_points - 1) / max_points;
    points
        .chunks(bucket)
        .filter_map(|chunk| {
            let last = chunk.last()?;
            let mean = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
            Some(TimePoint::new(mean, last.timestamp_ms))
        })
        .collect()
}

/// Series label without its family prefix, for single-series charts
pub fn short_label(label: &str) -> &str {
    const PREFIXES: [&str; 12] = [
        "conns_",
        "cpu_",
        "latency_",
        "mem_",
        "net_",
        "ops_",
        "q_",
        "scan_",
        "ticket_",
        "wt_blkmgr_",
        "wt_cache_",
        "wt_",
    ];
    PREFIXES
        .iter()
        .find_map(|prefix| label.strip_prefix(prefix))
        .unwrap_or(label)
}
