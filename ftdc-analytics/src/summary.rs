// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Headline workload figures shown at the top of every report.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assessment::MetricScore;

/// Typical activity over the window. Rates use medians, latencies and scans
/// use p95. Percentages are -1 when the host or cache size is unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub ops_query: f64,
    pub ops_insert: f64,
    pub ops_update: f64,
    pub ops_delete: f64,
    pub ops_command: f64,
    pub ops_total: f64,

    /// Milliseconds, p95
    pub latency_read: f64,
    pub latency_write: f64,
    pub latency_command: f64,

    pub scan_keys: f64,
    pub scan_objects: f64,
    pub docs_returned: f64,

    pub cpu_user: f64,
    pub cpu_system: f64,
    pub cpu_idle: f64,
    /// % of host RAM
    pub mem_resident: f64,
    /// % of the configured cache
    pub cache_used: f64,
    /// Highest disk utilization p95 across disks
    pub disk_util: f64,

    pub net_requests_per_sec: f64,
    pub net_in_mbps: f64,
    pub net_out_mbps: f64,

    pub conns_active: f64,
    pub conns_current: f64,
}

impl ActivitySummary {
    /// Build from scored metrics.
    ///
    /// `mem_known` and `cache_known` tell whether `mem_resident` and
    /// `wt_cache_used` were converted to percentages.
    pub fn from_scores(
        metrics: &BTreeMap<String, MetricScore>,
        disk_util: impl IntoIterator<Item = f64>,
        mem_known: bool,
        cache_known: bool,
    ) -> Self {
        let median = |name: &str| metrics.get(name).map_or(0.0, |m| m.median);
        let p95 = |name: &str| metrics.get(name).map_or(0.0, |m| m.p95);

        let mut summary = ActivitySummary {
            ops_query: median("ops_query"),
            ops_insert: median("ops_insert"),
            ops_update: median("ops_update"),
            ops_delete: median("ops_delete"),
            ops_command: median("ops_command"),
            latency_read: p95("latency_read"),
            latency_write: p95("latency_write"),
            latency_command: p95("latency_command"),
            scan_keys: p95("scan_keys"),
            scan_objects: p95("scan_objects"),
            docs_returned: median("doc_returned/s"),
            cpu_user: median("cpu_user"),
            cpu_system: median("cpu_system"),
            cpu_idle: median("cpu_idle"),
            mem_resident: if mem_known { median("mem_resident") } else { -1.0 },
            cache_used: if cache_known { median("wt_cache_used") } else { -1.0 },
            disk_util: disk_util.into_iter().fold(0.0, f64::max),
            net_requests_per_sec: median("net_requests"),
            net_in_mbps: median("net_in"),
            net_out_mbps: median("net_out"),
            conns_active: median("conns_active"),
            conns_current: median("conns_current"),
            ..Default::default()
        };
        summary.ops_total = summary.ops_query
            + summary.ops_insert
            + summary.ops_update
            + summary.ops_delete
            + summary.ops_command;
        summary
    }

    /// CPU busy share: user plus system
    pub fn cpu_busy(&self) -> f64 {
        self.cpu_user + self.cpu_system
    }
}
