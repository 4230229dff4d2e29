// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Acceptable ranges per metric, and the percentile and scoring helpers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Score of a metric without a formula: not evaluated, distinct from 100.
pub const NOT_EVALUATED: i32 = 101;

/// Acceptable range of one metric: healthy at or below `low`, failing at
/// or above `high`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub low: f64,
    pub high: f64,
}

impl ScoreRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn score(&self, value: f64) -> i32 {
        score_by_range(value, self.low, self.high)
    }
}

/// Metric families scored through one shared entry.
const FAMILY_PREFIXES: [&str; 4] = ["disku_", "iops_", "ops_", "repl_lag_"];

/// Immutable table of acceptable ranges, keyed by metric name or by family
/// prefix (`disku_`, `iops_`, `ops_`, `repl_lag_`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaTable {
    ranges: BTreeMap<String, ScoreRange>,
}

impl Default for FormulaTable {
    fn default() -> Self {
        let entries: [(&str, f64, f64); 32] = [
            ("conns_created/s", 0.0, 5.0),
            ("conns_current", 5.0, 20.0),
            ("cpu_idle", 50.0, 80.0),
            ("cpu_iowait", 5.0, 15.0),
            ("cpu_system", 5.0, 15.0),
            ("cpu_user", 50.0, 70.0),
            ("disku_", 50.0, 90.0),
            ("iops_", 2.0, 4.0),
            ("latency_command", 20.0, 100.0),
            ("latency_read", 20.0, 100.0),
            ("latency_write", 20.0, 100.0),
            ("mem_page_faults", 10.0, 20.0),
            ("mem_resident", 70.0, 90.0),
            ("ops_", 0.0, 64000.0),
            ("q_queued_read", 1.0, 5.0),
            ("q_queued_write", 1.0, 5.0),
            ("scan_keys", 0.0, 1024.0 * 1024.0),
            ("scan_objects", 2.0, 5.0),
            ("scan_sort", 0.0, 1000.0),
            ("wt_cache_used", 80.0, 95.0),
            ("wt_cache_dirty", 5.0, 20.0),
            ("wt_dhandles_active", 16000.0, 20000.0),
            ("wt_modified_evicted", 5.0, 10.0),
            ("wt_unmodified_evicted", 5.0, 10.0),
            ("query_targeting_keys", 10.0, 100.0),
            ("query_targeting_objects", 10.0, 100.0),
            ("write_conflicts/s", 10.0, 100.0),
            ("repl_lag_", 5.0, 30.0),
            ("queues_read_out", 50.0, 90.0),
            ("queues_write_out", 50.0, 90.0),
            ("txn_inactive", 5.0, 20.0),
            ("txn_aborted/s", 10.0, 50.0),
        ];
        let mut ranges: BTreeMap<String, ScoreRange> = entries
            .iter()
            .map(|&(name, low, high)| (name.to_string(), ScoreRange::new(low, high)))
            .collect();
        ranges.insert("tcmalloc_frag".to_string(), ScoreRange::new(20.0, 50.0));
        ranges.insert("flowctl_lagged_count".to_string(), ScoreRange::new(1.0, 3.0));
        ranges.insert("flowctl_acquiring_us".to_string(), ScoreRange::new(100.0, 1000.0));
        Self { ranges }
    }
}

impl FormulaTable {
    /// Table with exactly `ranges`; tests use it to substitute formulas.
    pub fn new(ranges: impl IntoIterator<Item = (String, ScoreRange)>) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
        }
    }

    /// Copy with the queue depth ranges scaled to the host's core count:
    /// `cores` to `5 * cores`. A zero core count keeps the defaults.
    pub fn for_host(&self, num_cores: u32) -> Self {
        let mut table = self.clone();
        if num_cores > 0 {
            let cores = num_cores as f64;
            for name in ["q_queued_read", "q_queued_write"] {
                if let Some(range) = table.ranges.get_mut(name) {
                    *range = ScoreRange::new(cores, 5.0 * cores);
                }
            }
        }
        table
    }

    /// Range for a metric, resolving family members to their prefix entry.
    pub fn get(&self, metric: &str) -> Option<ScoreRange> {
        let key = FAMILY_PREFIXES
            .iter()
            .find(|prefix| metric.starts_with(*prefix))
            .copied()
            .unwrap_or(metric);
        self.ranges.get(key).copied()
    }

    pub fn insert(&mut self, name: impl Into<String>, range: ScoreRange) {
        self.ranges.insert(name.into(), range);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Linear score: 100 at or below `low`, 0 at or above `high`.
pub fn score_by_range(value: f64, low: f64, high: f64) -> i32 {
    if value <= low {
        100
    } else if value >= high {
        0
    } else {
        (100.0 * (1.0 - (value - low) / (high - low))).round() as i32
    }
}

/// p5, median and p95 of a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub median: f64,
    pub p95: f64,
}

impl Percentiles {
    /// Rank percentiles: the value at 0-based index `floor(q * (n + 1))`,
    /// clamped to `n - 1`. All zero for an empty input.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let at = |q: f64| {
            let index = (q * (n + 1) as f64) as usize;
            sorted[index.min(n - 1)]
        };
        Self {
            p5: at(0.05),
            median: at(0.5),
            p95: at(0.95),
        }
    }
}
