// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Percentile assessment: p5/median/p95 per metric and a 0-100 score.
//!
//! Most metrics are scored on their p95 against the formula range. A few
//! are converted first:
//! - cache used/dirty as % of the configured cache
//! - resident memory as % of host RAM
//! - current connections as % of RAM at 1 MB each
//! - disk IOPS as the p95:median spike ratio
//! - evictions per 5%-of-cache page capacity
//! - tcmalloc fragmentation as `(heap - in_use) / heap`
//!
//! `cpu_idle` is bad when low and scores on its p5, inverted.

use ftdc::derive::{server_status_legends, CPU_LEGENDS, GB};
use ftdc::{FtdcStats, TimeSeries};
use serde::{Deserialize, Serialize};

use crate::config::AssessmentConfig;
use crate::formula::{FormulaTable, Percentiles, NOT_EVALUATED};

const PAGE_SIZE: f64 = 4096.0;

/// Note returned instead of rows for an over-long window.
pub const WINDOW_TOO_LONG: &str = "Assessment is available when date range is less than 3 days";

/// Percentiles and score of one metric over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub metric: String,
    pub label: String,
    /// 0-100, lower is worse; 101 when not evaluated
    pub score: i32,
    pub p5: f64,
    pub median: f64,
    pub p95: f64,
}

impl MetricScore {
    /// Placeholder for a metric this dataset does not carry.
    pub fn missing(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            label: metric.to_string(),
            score: NOT_EVALUATED,
            p5: 0.0,
            median: 0.0,
            p95: 0.0,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        self.score < NOT_EVALUATED
    }
}

/// Scored metrics of a window, worst first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentTable {
    pub rows: Vec<MetricScore>,
    /// Why no rows were produced
    pub reason: Option<String>,
}

impl AssessmentTable {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            rows: Vec::new(),
            reason: Some(reason.to_string()),
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        if self.reason.is_some() {
            &["Reason"]
        } else {
            &["Metric", "Score", "p5", "Median", "p95"]
        }
    }

    pub fn get(&self, metric: &str) -> Option<&MetricScore> {
        self.rows.iter().find(|row| row.metric == metric)
    }
}

fn window_values(series: Option<&TimeSeries>, from_ms: i64, to_ms: i64) -> Vec<f64> {
    series
        .map(|ts| ts.window(from_ms, to_ms).iter().map(|p| p.value).collect())
        .unwrap_or_default()
}

fn label_for(metric: &str) -> String {
    if metric.ends_with("modified_evicted") {
        metric.replace("modified_evicted", "mod_evicted")
    } else {
        metric.to_string()
    }
}

fn rounded(metric: &str, label: String, score: i32, p: Percentiles, scale: impl Fn(f64) -> f64) -> MetricScore {
    MetricScore {
        metric: metric.to_string(),
        label,
        score,
        p5: scale(p.p5).round(),
        median: scale(p.median).round(),
        p95: scale(p.p95).round(),
    }
}

/// Scores metrics of one dataset against a formula table.
pub struct Assessment<'a> {
    stats: &'a FtdcStats,
    formulas: FormulaTable,
    /// 5% of the configured cache, in 4 KiB pages
    max_cache_pages: f64,
}

impl<'a> Assessment<'a> {
    pub fn new(stats: &'a FtdcStats, formulas: &FormulaTable) -> Self {
        let max_cache_pages = (0.05 * stats.max_wt_cache * GB / PAGE_SIZE).trunc();
        Self {
            stats,
            formulas: formulas.for_host(stats.server_info.num_cores()),
            max_cache_pages,
        }
    }

    /// Percentiles of a named series over the window
    pub fn percentiles(&self, metric: &str, from_ms: i64, to_ms: i64) -> Percentiles {
        Percentiles::of(&window_values(self.stats.series(metric), from_ms, to_ms))
    }

    /// Percentiles and score of a named series
    pub fn metric_score(&self, metric: &str, from_ms: i64, to_ms: i64) -> MetricScore {
        let values = window_values(self.stats.series(metric), from_ms, to_ms);
        self.score_values(metric, &values, from_ms, to_ms)
    }

    /// Score raw window values; an empty window is not evaluated.
    fn score_values(&self, metric: &str, values: &[f64], from_ms: i64, to_ms: i64) -> MetricScore {
        let mut result = self.score_percentiles(metric, Percentiles::of(values), from_ms, to_ms);
        if values.is_empty() {
            result.score = NOT_EVALUATED;
        }
        result
    }

    /// Score precomputed percentiles, converting to percentages where the
    /// host or cache size is known.
    pub fn score_percentiles(&self, metric: &str, p: Percentiles, from_ms: i64, to_ms: i64) -> MetricScore {
        let label = label_for(metric);
        let max_cache = self.stats.max_wt_cache;
        let mem_mb = self.stats.server_info.mem_size_mb();

        if max_cache > 0.0 && (metric == "wt_cache_used" || metric == "wt_cache_dirty") {
            let pct = |v: f64| 100.0 * v / max_cache;
            let score = self.formula_score(metric, pct(p.p95));
            return rounded(metric, format!("{} %", label), score, p, pct);
        }
        if mem_mb > 0 && metric == "mem_resident" {
            let total_gb = mem_mb as f64 / 1024.0;
            let pct = |v: f64| 100.0 * v / total_gb;
            let score = self.formula_score(metric, pct(p.p95));
            return rounded(metric, format!("{} %", label), score, p, pct);
        }

        let score = self.score(metric, p, from_ms, to_ms);
        let label = if metric.starts_with("cpu_") || metric.starts_with("disku_") {
            format!("{} %", label)
        } else {
            label
        };
        rounded(metric, label, score, p, |v| v)
    }

    fn formula_score(&self, metric: &str, value: f64) -> i32 {
        self.formulas
            .get(metric)
            .map_or(NOT_EVALUATED, |range| range.score(value))
    }

    /// Score of a metric from its percentiles; 101 without a formula.
    pub fn score(&self, metric: &str, p: Percentiles, from_ms: i64, to_ms: i64) -> i32 {
        let range = match self.formulas.get(metric) {
            Some(range) => range,
            None => return NOT_EVALUATED,
        };
        match metric {
            "conns_created/s" => range.score(p.median),
            "conns_current" => match self.stats.server_info.mem_size_mb() {
                0 => NOT_EVALUATED,
                mem_mb => range.score(100.0 * p.p95 / mem_mb as f64),
            },
            "cpu_idle" if p.p5.is_nan() => NOT_EVALUATED,
            "cpu_idle" => 100 - range.score(p.p5),
            "scan_objects" if p.p95 < 1000.0 => 100,
            "scan_objects" => range.score(self.objects_per_key(from_ms, to_ms)),
            "wt_modified_evicted" | "wt_unmodified_evicted" if self.max_cache_pages > 0.0 => {
                range.score(p.p95 / self.max_cache_pages)
            }
            "wt_modified_evicted" | "wt_unmodified_evicted" => NOT_EVALUATED,
            "query_targeting_keys" | "query_targeting_objects" | "flowctl_lagged_count" => {
                if p.p95 > 0.0 {
                    range.score(p.p95)
                } else {
                    NOT_EVALUATED
                }
            }
            "queues_read_out" | "queues_write_out" => {
                let total = metric.replacen("_out", "_total", 1);
                match self.stats.series(&total).and_then(|ts| ts.first()) {
                    Some(first) if first.value > 0.0 => range.score(100.0 * p.p95 / first.value),
                    _ => NOT_EVALUATED,
                }
            }
            "flowctl_acquiring_us" => range.score(p.p95 / 1000.0),
            _ if metric.starts_with("iops_") => {
                if p.p95 < 100.0 {
                    NOT_EVALUATED
                } else {
                    range.score(p.p95 / p.median)
                }
            }
            _ => range.score(p.p95),
        }
    }

    /// Mean of `scan_objects / scan_keys` over points with keys scanned
    fn objects_per_key(&self, from_ms: i64, to_ms: i64) -> f64 {
        let keys = window_values(self.stats.series("scan_keys"), from_ms, to_ms);
        let objects = window_values(self.stats.series("scan_objects"), from_ms, to_ms);
        let ratios: Vec<f64> = keys
            .iter()
            .zip(&objects)
            .filter(|(k, _)| **k > 0.0)
            .map(|(k, o)| o / k)
            .collect();
        if ratios.is_empty() {
            0.0
        } else {
            ratios.iter().sum::<f64>() / ratios.len() as f64
        }
    }

    /// Fragmentation `100 * (heap - in_use) / heap` per point, scored on p95
    pub fn tcmalloc_fragmentation(&self, from_ms: i64, to_ms: i64) -> MetricScore {
        let heap = window_values(self.stats.series("tcmalloc_heap"), from_ms, to_ms);
        let in_use = window_values(self.stats.series("tcmalloc_in_use"), from_ms, to_ms);
        let ratios: Vec<f64> = heap
            .iter()
            .zip(&in_use)
            .filter(|(h, _)| **h > 0.0)
            .map(|(h, u)| 100.0 * (h - u) / h)
            .collect();

        let mut result = MetricScore::missing("tcmalloc_frag");
        result.label = "tcmalloc_frag %".to_string();
        if ratios.is_empty() {
            return result;
        }
        let p = Percentiles::of(&ratios);
        result.score = self.formula_score("tcmalloc_frag", p.p95);
        result.p5 = p.p5.round();
        result.median = p.median.round();
        result.p95 = p.p95.round();
        result
    }

    /// True when heap samples exist to compute fragmentation from
    pub fn has_tcmalloc(&self) -> bool {
        let present = |name: &str| self.stats.series(name).map_or(false, |ts| !ts.is_empty());
        present("tcmalloc_heap") && present("tcmalloc_in_use")
    }

    /// `iops_<disk>` and `disku_<disk>` scores, with the raw IOPS p95
    pub fn disk_scores(&self, disk: &str, from_ms: i64, to_ms: i64) -> Option<(MetricScore, MetricScore)> {
        let stats = self.stats.disks.get(disk)?;
        let iops = window_values(Some(&stats.iops), from_ms, to_ms);
        let util = window_values(Some(&stats.utilization), from_ms, to_ms);
        Some((
            self.score_values(&format!("iops_{}", disk), &iops, from_ms, to_ms),
            self.score_values(&format!("disku_{}", disk), &util, from_ms, to_ms),
        ))
    }

    /// `repl_lag_<host>` score
    pub fn lag_score(&self, host: &str, from_ms: i64, to_ms: i64) -> Option<MetricScore> {
        let lags = self.stats.replication.lags.get(host)?;
        let values = window_values(Some(lags), from_ms, to_ms);
        Some(self.score_values(&format!("repl_lag_{}", host), &values, from_ms, to_ms))
    }

    /// Names scored from the named series: every legend plus the CPU buckets
    pub fn metric_names() -> impl Iterator<Item = &'static str> {
        server_status_legends().chain(CPU_LEGENDS)
    }

    /// Assessment table for `[from_ms, to_ms]`.
    ///
    /// Unevaluated rows are dropped unless `verbose`. Disks and members
    /// whose p95 is zero are left out. Rows are sorted by score, then label.
    pub fn table(&self, from_ms: i64, to_ms: i64, config: &AssessmentConfig) -> AssessmentTable {
        if to_ms - from_ms > config.max_window_hours * 3_600_000 {
            return AssessmentTable::unavailable(WINDOW_TOO_LONG);
        }

        let mut rows = Vec::new();
        let mut keep = |row: MetricScore| {
            if row.is_evaluated() || config.verbose {
                rows.push(row);
            }
        };

        for metric in Self::metric_names() {
            keep(self.metric_score(metric, from_ms, to_ms));
        }
        if self.has_tcmalloc() {
            keep(self.tcmalloc_fragmentation(from_ms, to_ms));
        }
        for disk in self.stats.disks.keys() {
            if let Some((iops, util)) = self.disk_scores(disk, from_ms, to_ms) {
                if iops.p95 == 0.0 {
                    continue;
                }
                keep(iops);
                keep(util);
            }
        }
        for host in self.stats.replication.lags.keys() {
            if let Some(lag) = self.lag_score(host, from_ms, to_ms) {
                if lag.p95 == 0.0 {
                    continue;
                }
                keep(lag);
            }
        }

        rows.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.label.cmp(&b.label)));
        AssessmentTable { rows, reason: None }
    }
}
