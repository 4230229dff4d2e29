// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Aggregate store of decoded samples and derived series

use std::collections::BTreeMap;

use tracing::debug;

use crate::derive::{
    derive_replication, derive_server_status, derive_system_metrics, DiskStats, ReplicationLags,
};
use crate::docs::{DiagnosticData, ReplSetStatus, ServerInfo, ServerStatus, SystemMetrics};
use crate::series::TimeSeries;

/// Everything loaded so far, with its derived series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FtdcStats {
    pub server_info: ServerInfo,
    pub server_status: Vec<ServerStatus>,
    pub system_metrics: Vec<SystemMetrics>,
    pub repl_status: Vec<ReplSetStatus>,
    /// Named series: server status families and CPU
    pub series: BTreeMap<String, TimeSeries>,
    pub disks: BTreeMap<String, DiskStats>,
    pub replication: ReplicationLags,
    /// First `wt_cache_max` value, GB
    pub max_wt_cache: f64,
}

/// Append the entries of `incoming` that fall strictly after the last
/// stored entry. `incoming` is stable-sorted by `key` first.
fn append_after<T, F>(stored: &mut Vec<T>, mut incoming: Vec<T>, key: F) -> usize
where
    F: Fn(&T) -> i64,
{
    incoming.sort_by_key(|item| key(item));
    let start = match stored.last() {
        Some(last) => {
            let last_key = key(last);
            incoming.partition_point(|item| key(item) <= last_key)
        }
        None => 0,
    };
    let added = incoming.len() - start;
    stored.extend(incoming.drain(start..));
    added
}

impl FtdcStats {
    pub fn from_data(data: DiagnosticData) -> Self {
        let mut stats = Self::default();
        stats.merge(data);
        stats
    }

    /// Merge newly read data and re-derive every series.
    ///
    /// Returns the number of new server status samples.
    pub fn merge(&mut self, data: DiagnosticData) -> usize {
        if let Some(info) = data.server_info {
            self.server_info = info;
        }
        let added = append_after(&mut self.server_status, data.server_status, |s| s.local_time_ms);
        append_after(&mut self.system_metrics, data.system_metrics, |s| s.start_ms);
        append_after(&mut self.repl_status, data.repl_status, |s| s.date_ms);
        self.derive();
        added
    }

    fn derive(&mut self) {
        let mut series = derive_server_status(&self.server_status);
        let (cpu, disks) = derive_system_metrics(&self.system_metrics);
        series.extend(cpu);
        self.series = series;
        self.disks = disks;
        self.replication = derive_replication(&self.repl_status);
        self.max_wt_cache = self
            .series
            .get("wt_cache_max")
            .and_then(|ts| ts.first())
            .map(|p| p.value)
            .unwrap_or(0.0);
        debug!(
            series = self.series.len(),
            disks = self.disks.len(),
            hosts = self.replication.hosts.len(),
            "series derived"
        );
    }

    pub fn is_empty(&self) -> bool {
        self.server_status.is_empty()
    }

    /// First and last sample times, epoch ms
    pub fn time_range(&self) -> Option<(i64, i64)> {
        let first = self.server_status.first()?;
        let last = self.server_status.last()?;
        Some((first.local_time_ms, last.local_time_ms))
    }

    pub fn series(&self, name: &str) -> Option<&TimeSeries> {
        self.series.get(name)
    }
}
