// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Time-series deriver
//!
//! Turns typed sample lists into named output series: gauges, per-second
//! rates, CPU and disk percentages, and replication lag per member. Every
//! pass is single-threaded and keeps only the previous sample as state.

use std::collections::{BTreeMap, HashSet};

use crate::docs::{
    ReplSetStatus, ServerStatus, SystemMetrics, STATE_ARBITER, STATE_PRIMARY,
};
use crate::series::TimeSeries;

/// Bytes per MiB
pub const MB: f64 = 1024.0 * 1024.0;
/// Bytes per GiB
pub const GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub const SERVER_STATUS_LEGENDS: [&str; 28] = [
    "mem_resident", "mem_virtual", "mem_page_faults",
    "conns_active", "conns_available", "conns_current", "conns_created/s",
    "latency_read", "latency_write", "latency_command",
    "net_in", "net_out", "net_requests", "net_physical_in", "net_physical_out",
    "ops_query", "ops_insert", "ops_update", "ops_delete", "ops_getmore", "ops_command",
    "q_active_read", "q_active_write", "q_queued_read", "q_queued_write",
    "scan_keys", "scan_objects", "scan_sort",
];

pub const WIRED_TIGER_LEGENDS: [&str; 13] = [
    "wt_blkmgr_read", "wt_blkmgr_written", "wt_blkmgr_written_checkpoint",
    "wt_cache_max", "wt_cache_used", "wt_cache_dirty",
    "wt_modified_evicted", "wt_unmodified_evicted", "wt_cache_read_in", "wt_cache_written_from",
    "wt_dhandles_active", "ticket_avail_read", "ticket_avail_write",
];

/// Admission control queues (7.0+)
pub const QUEUES_LEGENDS: [&str; 6] = [
    "queues_read_out", "queues_read_available", "queues_read_total",
    "queues_write_out", "queues_write_available", "queues_write_total",
];

pub const TRANSACTIONS_LEGENDS: [&str; 6] = [
    "txn_active", "txn_inactive", "txn_open",
    "txn_aborted/s", "txn_committed/s", "txn_started/s",
];

pub const TCMALLOC_LEGENDS: [&str; 4] = [
    "tcmalloc_in_use", "tcmalloc_allocated", "tcmalloc_heap", "tcmalloc_physical",
];

pub const FLOW_CONTROL_LEGENDS: [&str; 3] = [
    "flowctl_rate_limit", "flowctl_acquiring_us", "flowctl_lagged_count",
];

pub const QUERY_LEGENDS: [&str; 4] = [
    "write_conflicts/s", "doc_returned/s", "query_targeting_keys", "query_targeting_objects",
];

pub const CPU_LEGENDS: [&str; 7] = [
    "cpu_idle", "cpu_iowait", "cpu_nice", "cpu_softirq", "cpu_steal", "cpu_system", "cpu_user",
];

/// Targets that expand to one series per disk
pub const DISK_TARGETS: [&str; 6] = [
    "disks_utils", "disks_iops", "disks_queue_length",
    "read_time_ms", "write_time_ms", "io_queued_ms",
];

/// Target that expands to one series per replica member
pub const REPLICATION_TARGET: &str = "replication_lags";

/// Every series derived from `serverStatus`, in chart order
pub fn server_status_legends() -> impl Iterator<Item = &'static str> {
    SERVER_STATUS_LEGENDS
        .into_iter()
        .chain(WIRED_TIGER_LEGENDS)
        .chain(QUEUES_LEGENDS)
        .chain(TRANSACTIONS_LEGENDS)
        .chain(TCMALLOC_LEGENDS)
        .chain(FLOW_CONTROL_LEGENDS)
        .chain(QUERY_LEGENDS)
}

/// Per-disk output series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskStats {
    pub utilization: TimeSeries,
    pub iops: TimeSeries,
    pub io_in_progress: TimeSeries,
    pub read_time_ms: TimeSeries,
    pub write_time_ms: TimeSeries,
    pub io_queued_ms: TimeSeries,
}

impl DiskStats {
    fn new(device: &str) -> Self {
        Self {
            utilization: TimeSeries::new(device),
            iops: TimeSeries::new(device),
            io_in_progress: TimeSeries::new(device),
            read_time_ms: TimeSeries::new(device),
            write_time_ms: TimeSeries::new(device),
            io_queued_ms: TimeSeries::new(device),
        }
    }

    /// Series behind one of [`DISK_TARGETS`]
    pub fn by_target(&self, target: &str) -> Option<&TimeSeries> {
        Some(match target {
            "disks_utils" => &self.utilization,
            "disks_iops" => &self.iops,
            "disks_queue_length" => &self.io_in_progress,
            "read_time_ms" => &self.read_time_ms,
            "write_time_ms" => &self.write_time_ms,
            "io_queued_ms" => &self.io_queued_ms,
            _ => return None,
        })
    }
}

/// Replication lag per member, keyed by host label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicationLags {
    /// Labels of the current membership, sorted by member name
    pub hosts: Vec<String>,
    pub lags: BTreeMap<String, TimeSeries>,
}

/// Writes points stamped with one timestamp
struct Emitter<'a> {
    series: &'a mut BTreeMap<String, TimeSeries>,
    timestamp_ms: i64,
}

impl Emitter<'_> {
    fn put(&mut self, name: &str, value: f64) {
        match self.series.get_mut(name) {
            Some(ts) => ts.push(value, self.timestamp_ms),
            None => {
                let mut ts = TimeSeries::new(name);
                ts.push(value, self.timestamp_ms);
                self.series.insert(name.to_string(), ts);
            }
        }
    }
}

fn empty_series<'a>(legends: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, TimeSeries> {
    legends
        .into_iter()
        .map(|name| (name.to_string(), TimeSeries::new(name)))
        .collect()
}

/// Whole seconds between samples, at least one
fn interval_secs(current_ms: i64, previous_ms: i64) -> f64 {
    (current_ms.saturating_sub(previous_ms) as f64 / 1000.0).round().max(1.0)
}

fn per_sec(current: u64, previous: u64, seconds: f64) -> f64 {
    current.saturating_sub(previous) as f64 / seconds
}

fn latency_ms(latency_us: u64, ops: u64) -> f64 {
    if ops == 0 {
        0.0
    } else {
        latency_us as f64 / ops as f64 / 1000.0
    }
}

/// Derive gauges and rates from `serverStatus` samples.
///
/// A sample whose uptime does not exceed the previous one marks a restart:
/// it becomes the new baseline and emits nothing. The first sample emits
/// gauges only.
pub fn derive_server_status(samples: &[ServerStatus]) -> BTreeMap<String, TimeSeries> {
    let mut out = empty_series(server_status_legends());
    let mut previous = ServerStatus::default();

    for (i, stat) in samples.iter().enumerate() {
        if stat.uptime <= previous.uptime {
            previous = stat.clone();
            continue;
        }

        let mut emit = Emitter {
            series: &mut out,
            timestamp_ms: stat.local_time_ms,
        };

        emit.put("mem_resident", stat.mem.resident as f64 / 1024.0);
        emit.put("mem_virtual", stat.mem.virtual_ as f64 / 1024.0);
        emit.put("conns_active", stat.connections.active as f64);
        emit.put("conns_available", stat.connections.available as f64);
        emit.put("conns_current", stat.connections.current as f64);
        emit.put("q_active_read", stat.global_lock.active_clients.readers as f64);
        emit.put("q_active_write", stat.global_lock.active_clients.writers as f64);
        emit.put("q_queued_read", stat.global_lock.current_queue.readers as f64);
        emit.put("q_queued_write", stat.global_lock.current_queue.writers as f64);

        let lat = &stat.op_latencies;
        emit.put("latency_read", latency_ms(lat.reads.latency, lat.reads.ops));
        emit.put("latency_write", latency_ms(lat.writes.latency, lat.writes.ops));
        emit.put("latency_command", latency_ms(lat.commands.latency, lat.commands.ops));

        let wt = &stat.wired_tiger;
        emit.put("wt_cache_max", wt.cache.max_bytes_configured as f64 / GB);
        emit.put("wt_cache_used", wt.cache.currently_in_cache as f64 / GB);
        emit.put("wt_cache_dirty", wt.cache.tracked_dirty_bytes as f64 / GB);
        emit.put("wt_dhandles_active", wt.data_handles_active as f64);
        emit.put("ticket_avail_read", wt.concurrent_transactions.read_available as f64);
        emit.put("ticket_avail_write", wt.concurrent_transactions.write_available as f64);

        let q = &stat.queues;
        emit.put("queues_read_out", q.read.out as f64);
        emit.put("queues_read_available", q.read.available as f64);
        emit.put("queues_read_total", q.read.total_tickets as f64);
        emit.put("queues_write_out", q.write.out as f64);
        emit.put("queues_write_available", q.write.available as f64);
        emit.put("queues_write_total", q.write.total_tickets as f64);

        emit.put("txn_active", stat.transactions.current_active as f64);
        emit.put("txn_inactive", stat.transactions.current_inactive as f64);
        emit.put("txn_open", stat.transactions.current_open as f64);

        let tc = &stat.tcmalloc;
        emit.put("tcmalloc_in_use", tc.bytes_in_use_by_app as f64 / GB);
        emit.put("tcmalloc_allocated", tc.current_allocated_bytes as f64 / GB);
        emit.put("tcmalloc_heap", tc.heap_size as f64 / GB);
        emit.put("tcmalloc_physical", tc.physical_memory_used as f64 / GB);

        emit.put("flowctl_rate_limit", stat.flow_control.target_rate_limit as f64);

        if i > 0 {
            let p = &previous;
            let secs = interval_secs(stat.local_time_ms, p.local_time_ms);

            emit.put("mem_page_faults", per_sec(stat.page_faults, p.page_faults, secs));
            emit.put(
                "conns_created/s",
                per_sec(stat.connections.total_created, p.connections.total_created, secs),
            );

            let (n, pn) = (&stat.network, &p.network);
            emit.put("net_in", per_sec(n.bytes_in, pn.bytes_in, secs) / MB);
            emit.put("net_out", per_sec(n.bytes_out, pn.bytes_out, secs) / MB);
            emit.put("net_requests", per_sec(n.num_requests, pn.num_requests, secs));
            emit.put(
                "net_physical_in",
                per_sec(n.physical_bytes_in, pn.physical_bytes_in, secs) / MB,
            );
            emit.put(
                "net_physical_out",
                per_sec(n.physical_bytes_out, pn.physical_bytes_out, secs) / MB,
            );

            let (o, po) = (&stat.opcounters, &p.opcounters);
            emit.put("ops_query", per_sec(o.query, po.query, secs));
            emit.put("ops_insert", per_sec(o.insert, po.insert, secs));
            emit.put("ops_update", per_sec(o.update, po.update, secs));
            emit.put("ops_delete", per_sec(o.delete, po.delete, secs));
            emit.put("ops_getmore", per_sec(o.getmore, po.getmore, secs));
            emit.put("ops_command", per_sec(o.command, po.command, secs));

            let (m, pm) = (&stat.metrics, &p.metrics);
            let scanned = m.query_executor.scanned.saturating_sub(pm.query_executor.scanned);
            let scanned_objects = m
                .query_executor
                .scanned_objects
                .saturating_sub(pm.query_executor.scanned_objects);
            let returned = m.document.returned.saturating_sub(pm.document.returned);
            emit.put("scan_keys", scanned as f64 / secs);
            emit.put("scan_objects", scanned_objects as f64 / secs);
            emit.put(
                "scan_sort",
                per_sec(m.operation.scan_and_order, pm.operation.scan_and_order, secs),
            );
            emit.put(
                "write_conflicts/s",
                per_sec(m.operation.write_conflicts, pm.operation.write_conflicts, secs),
            );
            emit.put("doc_returned/s", returned as f64 / secs);
            if returned > 0 {
                emit.put("query_targeting_keys", scanned as f64 / returned as f64);
                emit.put("query_targeting_objects", scanned_objects as f64 / returned as f64);
            }

            let (w, pw) = (&stat.wired_tiger, &p.wired_tiger);
            emit.put(
                "wt_blkmgr_read",
                per_sec(w.block_manager.bytes_read, pw.block_manager.bytes_read, secs) / MB,
            );
            emit.put(
                "wt_blkmgr_written",
                per_sec(w.block_manager.bytes_written, pw.block_manager.bytes_written, secs) / MB,
            );
            emit.put(
                "wt_blkmgr_written_checkpoint",
                per_sec(
                    w.block_manager.bytes_written_checkpoint,
                    pw.block_manager.bytes_written_checkpoint,
                    secs,
                ) / MB,
            );
            emit.put(
                "wt_modified_evicted",
                per_sec(w.cache.modified_pages_evicted, pw.cache.modified_pages_evicted, secs),
            );
            emit.put(
                "wt_unmodified_evicted",
                per_sec(w.cache.unmodified_pages_evicted, pw.cache.unmodified_pages_evicted, secs),
            );
            emit.put(
                "wt_cache_read_in",
                per_sec(w.cache.bytes_read_into_cache, pw.cache.bytes_read_into_cache, secs) / MB,
            );
            emit.put(
                "wt_cache_written_from",
                per_sec(w.cache.bytes_written_from_cache, pw.cache.bytes_written_from_cache, secs)
                    / MB,
            );

            let (t, pt) = (&stat.transactions, &p.transactions);
            emit.put("txn_aborted/s", per_sec(t.total_aborted, pt.total_aborted, secs));
            emit.put("txn_committed/s", per_sec(t.total_committed, pt.total_committed, secs));
            emit.put("txn_started/s", per_sec(t.total_started, pt.total_started, secs));

            let (f, pf) = (&stat.flow_control, &p.flow_control);
            emit.put(
                "flowctl_acquiring_us",
                per_sec(f.time_acquiring_micros, pf.time_acquiring_micros, secs),
            );
            emit.put(
                "flowctl_lagged_count",
                per_sec(f.is_lagged_count, pf.is_lagged_count, secs),
            );
        }

        previous = stat.clone();
    }
    out
}

/// Derive CPU percentages and per-disk series from `systemMetrics` samples.
///
/// The first sample only seeds the baseline. A disk absent from the
/// previous sample gets no point for that interval.
pub fn derive_system_metrics(
    samples: &[SystemMetrics],
) -> (BTreeMap<String, TimeSeries>, BTreeMap<String, DiskStats>) {
    let mut out = empty_series(CPU_LEGENDS);
    let mut disks: BTreeMap<String, DiskStats> = BTreeMap::new();

    let mut iter = samples.iter();
    let mut previous = match iter.next() {
        Some(first) => first,
        None => return (out, disks),
    };

    for stat in iter {
        let t = stat.start_ms;
        let elapsed_ms = (stat.start_ms.saturating_sub(previous.start_ms) as f64).max(1000.0);
        let seconds = elapsed_ms / 1000.0;

        for (device, disk) in &stat.disks {
            let prev = match previous.disks.get(device) {
                Some(prev) => prev,
                None => continue,
            };
            let ds = disks
                .entry(device.clone())
                .or_insert_with(|| DiskStats::new(device));
            let io_ms = disk.io_time_ms.saturating_sub(prev.io_time_ms) as f64;
            let ops = disk
                .reads
                .saturating_add(disk.writes)
                .saturating_sub(prev.reads.saturating_add(prev.writes)) as f64;
            ds.utilization.push(100.0 * io_ms / elapsed_ms, t);
            ds.iops.push(ops / seconds, t);
            ds.io_in_progress.push(disk.io_in_progress as f64, t);
            ds.read_time_ms
                .push(disk.read_time_ms.saturating_sub(prev.read_time_ms) as f64, t);
            ds.write_time_ms
                .push(disk.write_time_ms.saturating_sub(prev.write_time_ms) as f64, t);
            ds.io_queued_ms
                .push(disk.io_queued_ms.saturating_sub(prev.io_queued_ms) as f64, t);
        }

        let (cpu, pcpu) = (&stat.cpu, &previous.cpu);
        let mut total = cpu.total_ms().saturating_sub(pcpu.total_ms()) as f64;
        if total == 0.0 {
            total = 1.0;
        }
        let pct = |cur: u64, prev: u64| 100.0 * cur.saturating_sub(prev) as f64 / total;
        let mut emit = Emitter {
            series: &mut out,
            timestamp_ms: t,
        };
        emit.put("cpu_idle", pct(cpu.idle_ms, pcpu.idle_ms));
        emit.put("cpu_iowait", pct(cpu.iowait_ms, pcpu.iowait_ms));
        emit.put("cpu_nice", pct(cpu.nice_ms, pcpu.nice_ms));
        emit.put("cpu_softirq", pct(cpu.softirq_ms, pcpu.softirq_ms));
        emit.put("cpu_steal", pct(cpu.steal_ms, pcpu.steal_ms));
        emit.put("cpu_system", pct(cpu.system_ms, pcpu.system_ms));
        emit.put("cpu_user", pct(cpu.user_ms, pcpu.user_ms));

        previous = stat;
    }
    (out, disks)
}

/// Short label for a member name: `db1.example.com:27017` becomes `db1:27017`.
///
/// Names without a domain or with a numeric first label (IP addresses)
/// are kept whole.
pub fn short_host(name: &str) -> String {
    let (dot, colon) = match (name.find('.'), name.rfind(':')) {
        (Some(dot), Some(colon)) if dot < colon => (dot, colon),
        _ => return name.to_string(),
    };
    let first = &name[..dot];
    if first.chars().all(|c| c.is_ascii_digit()) {
        return name.to_string();
    }
    format!("{}{}", first, &name[colon..])
}

fn host_labels(names: &[&str]) -> Vec<String> {
    let short: Vec<String> = names.iter().map(|n| short_host(n)).collect();
    let unique: HashSet<&String> = short.iter().collect();
    if unique.len() == short.len() {
        short
    } else {
        names.iter().map(|n| n.to_string()).collect()
    }
}

/// Derive lag per member, in seconds behind the primary.
///
/// Members are ordered by name. A change in member count re-establishes
/// the host labels and that snapshot emits nothing. Snapshots without a
/// primary are skipped; arbiters never get a point.
pub fn derive_replication(statuses: &[ReplSetStatus]) -> ReplicationLags {
    let mut result = ReplicationLags::default();

    for status in statuses {
        if status.members.is_empty() {
            continue;
        }
        let mut members: Vec<_> = status.members.iter().collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));

        if result.hosts.is_empty() || result.hosts.len() != members.len() {
            let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
            result.hosts = host_labels(&names);
            for host in &result.hosts {
                result
                    .lags
                    .entry(host.clone())
                    .or_insert_with(|| TimeSeries::new(host.as_str()));
            }
            continue;
        }

        let reference = match members
            .iter()
            .find(|m| m.state == STATE_PRIMARY)
            .map(|m| m.optime_secs)
        {
            Some(secs) if secs != 0 => secs,
            _ => continue,
        };

        for (member, host) in members.iter().zip(&result.hosts) {
            let lag = match member.state {
                STATE_ARBITER => continue,
                STATE_PRIMARY => 0.0,
                _ => reference.saturating_sub(member.optime_secs).max(0) as f64,
            };
            if let Some(series) = result.lags.get_mut(host) {
                series.push(lag, status.date_ms);
            }
        }
    }
    result
}
