// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Attribute projector
//!
//! Maps a `path -> series` map and a sample index onto typed records.
//! Absent paths and out-of-range indices read as zero.

use std::collections::{BTreeMap, HashMap};

use crate::docs::{DiskMetrics, ServerStatus, SystemMetrics};

const SS: &str = "serverStatus/";
const DISKS_PREFIX: &str = "systemMetrics/disks/";

const OPCOUNTERS: [&str; 6] = [
    "opcounters/query", "opcounters/insert", "opcounters/update",
    "opcounters/delete", "opcounters/getmore", "opcounters/command",
];
const OPCOUNTERS_REPL: [&str; 6] = [
    "opcountersRepl/query", "opcountersRepl/insert", "opcountersRepl/update",
    "opcountersRepl/delete", "opcountersRepl/getmore", "opcountersRepl/command",
];
const READ_QUEUE: [&str; 3] = [
    "queues/execution/read/out",
    "queues/execution/read/available",
    "queues/execution/read/totalTickets",
];
const WRITE_QUEUE: [&str; 3] = [
    "queues/execution/write/out",
    "queues/execution/write/available",
    "queues/execution/write/totalTickets",
];

/// Per-device stat selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiskStat {
    Reads,
    Writes,
    ReadTimeMs,
    WriteTimeMs,
    IoTimeMs,
    IoQueuedMs,
    IoInProgress,
}

impl DiskStat {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "reads" => DiskStat::Reads,
            "writes" => DiskStat::Writes,
            "read_time_ms" => DiskStat::ReadTimeMs,
            "write_time_ms" => DiskStat::WriteTimeMs,
            "io_time_ms" => DiskStat::IoTimeMs,
            "io_queued_ms" => DiskStat::IoQueuedMs,
            "io_in_progress" => DiskStat::IoInProgress,
            _ => return None,
        })
    }

    fn set(self, disk: &mut DiskMetrics, value: u64) {
        match self {
            DiskStat::Reads => disk.reads = value,
            DiskStat::Writes => disk.writes = value,
            DiskStat::ReadTimeMs => disk.read_time_ms = value,
            DiskStat::WriteTimeMs => disk.write_time_ms = value,
            DiskStat::IoTimeMs => disk.io_time_ms = value,
            DiskStat::IoQueuedMs => disk.io_queued_ms = value,
            DiskStat::IoInProgress => disk.io_in_progress = value,
        }
    }
}

/// Read-only view over one block's series
pub struct Projector<'a> {
    data: &'a HashMap<String, Vec<u64>>,
    /// `serverStatus` series keyed by the path below `serverStatus/`
    ss_index: HashMap<&'a str, &'a [u64]>,
    /// `(device, stat, path)`, built once per block
    disk_index: Vec<(&'a str, DiskStat, &'a str)>,
}

impl<'a> Projector<'a> {
    pub fn new(data: &'a HashMap<String, Vec<u64>>) -> Self {
        let mut disk_index: Vec<(&'a str, DiskStat, &'a str)> = data
            .keys()
            .filter_map(|path| {
                let rest = path.strip_prefix(DISKS_PREFIX)?;
                let mut parts = rest.split('/');
                let device = parts.next()?;
                let stat = DiskStat::parse(parts.next()?)?;
                if parts.next().is_some() {
                    return None;
                }
                Some((device, stat, path.as_str()))
            })
            .collect();
        disk_index.sort_by(|a, b| a.2.cmp(b.2));
        let ss_index = data
            .iter()
            .filter_map(|(path, series)| Some((path.strip_prefix(SS)?, series.as_slice())))
            .collect();
        Self {
            data,
            ss_index,
            disk_index,
        }
    }

    /// Value of `path` at sample `i`, zero when absent
    pub fn get(&self, path: &str, i: usize) -> u64 {
        self.data
            .get(path)
            .and_then(|series| series.get(i))
            .copied()
            .unwrap_or(0)
    }

    fn ss(&self, path: &str, i: usize) -> u64 {
        self.ss_index
            .get(path)
            .and_then(|series| series.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// `serverStatus` record for sample `i`
    pub fn server_status(&self, i: usize) -> ServerStatus {
        let mut ss = ServerStatus {
            local_time_ms: self.ss("localTime", i) as i64,
            uptime: self.ss("uptime", i),
            page_faults: self.ss("extra_info/page_faults", i),
            ..Default::default()
        };

        ss.mem.resident = self.ss("mem/resident", i);
        ss.mem.virtual_ = self.ss("mem/virtual", i);

        ss.network.bytes_in = self.ss("network/bytesIn", i);
        ss.network.bytes_out = self.ss("network/bytesOut", i);
        ss.network.num_requests = self.ss("network/numRequests", i);
        ss.network.physical_bytes_in = self.ss("network/physicalBytesIn", i);
        ss.network.physical_bytes_out = self.ss("network/physicalBytesOut", i);

        ss.connections.current = self.ss("connections/current", i);
        ss.connections.available = self.ss("connections/available", i);
        ss.connections.total_created = self.ss("connections/totalCreated", i);
        ss.connections.active = self.ss("connections/active", i);

        ss.global_lock.active_clients.readers = self.ss("globalLock/activeClients/readers", i);
        ss.global_lock.active_clients.writers = self.ss("globalLock/activeClients/writers", i);
        ss.global_lock.current_queue.readers = self.ss("globalLock/currentQueue/readers", i);
        ss.global_lock.current_queue.writers = self.ss("globalLock/currentQueue/writers", i);

        ss.op_latencies.reads.latency = self.ss("opLatencies/reads/latency", i);
        ss.op_latencies.reads.ops = self.ss("opLatencies/reads/ops", i);
        ss.op_latencies.writes.latency = self.ss("opLatencies/writes/latency", i);
        ss.op_latencies.writes.ops = self.ss("opLatencies/writes/ops", i);
        ss.op_latencies.commands.latency = self.ss("opLatencies/commands/latency", i);
        ss.op_latencies.commands.ops = self.ss("opLatencies/commands/ops", i);

        for (counters, paths) in [
            (&mut ss.opcounters, &OPCOUNTERS),
            (&mut ss.opcounters_repl, &OPCOUNTERS_REPL),
        ] {
            counters.query = self.ss(paths[0], i);
            counters.insert = self.ss(paths[1], i);
            counters.update = self.ss(paths[2], i);
            counters.delete = self.ss(paths[3], i);
            counters.getmore = self.ss(paths[4], i);
            counters.command = self.ss(paths[5], i);
        }

        let m = &mut ss.metrics;
        m.query_executor.scanned = self.ss("metrics/queryExecutor/scanned", i);
        m.query_executor.scanned_objects = self.ss("metrics/queryExecutor/scannedObjects", i);
        m.operation.scan_and_order = self.ss("metrics/operation/scanAndOrder", i);
        m.operation.write_conflicts = self.ss("metrics/operation/writeConflicts", i);
        m.document.returned = self.ss("metrics/document/returned", i);
        m.document.inserted = self.ss("metrics/document/inserted", i);
        m.document.updated = self.ss("metrics/document/updated", i);
        m.document.deleted = self.ss("metrics/document/deleted", i);
        m.cursor.total = self.ss("metrics/cursor/open/total", i);
        m.cursor.pinned = self.ss("metrics/cursor/open/pinned", i);
        m.cursor.no_timeout = self.ss("metrics/cursor/open/noTimeout", i);

        let wt = &mut ss.wired_tiger;
        wt.block_manager.bytes_read = self.ss("wiredTiger/block-manager/bytes read", i);
        wt.block_manager.bytes_written = self.ss("wiredTiger/block-manager/bytes written", i);
        wt.block_manager.bytes_written_checkpoint =
            self.ss("wiredTiger/block-manager/bytes written for checkpoint", i);
        wt.cache.max_bytes_configured = self.ss("wiredTiger/cache/maximum bytes configured", i);
        wt.cache.currently_in_cache = self.ss("wiredTiger/cache/bytes currently in the cache", i);
        wt.cache.tracked_dirty_bytes =
            self.ss("wiredTiger/cache/tracked dirty bytes in the cache", i);
        wt.cache.modified_pages_evicted = self.ss("wiredTiger/cache/modified pages evicted", i);
        wt.cache.unmodified_pages_evicted = self.ss("wiredTiger/cache/unmodified pages evicted", i);
        wt.cache.bytes_read_into_cache = self.ss("wiredTiger/cache/bytes read into cache", i);
        wt.cache.bytes_written_from_cache = self.ss("wiredTiger/cache/bytes written from cache", i);
        wt.data_handles_active =
            self.ss("wiredTiger/data-handle/connection data handles currently active", i);
        wt.concurrent_transactions.read_available =
            self.ss("wiredTiger/concurrentTransactions/read/available", i);
        wt.concurrent_transactions.write_available =
            self.ss("wiredTiger/concurrentTransactions/write/available", i);

        for (queue, paths) in [
            (&mut ss.queues.read, &READ_QUEUE),
            (&mut ss.queues.write, &WRITE_QUEUE),
        ] {
            queue.out = self.ss(paths[0], i);
            queue.available = self.ss(paths[1], i);
            queue.total_tickets = self.ss(paths[2], i);
        }

        let txn = &mut ss.transactions;
        txn.current_active = self.ss("transactions/currentActive", i);
        txn.current_inactive = self.ss("transactions/currentInactive", i);
        txn.current_open = self.ss("transactions/currentOpen", i);
        txn.total_aborted = self.ss("transactions/totalAborted", i);
        txn.total_committed = self.ss("transactions/totalCommitted", i);
        txn.total_started = self.ss("transactions/totalStarted", i);

        let tc = &mut ss.tcmalloc;
        tc.current_allocated_bytes = self.ss("tcmalloc/generic/current_allocated_bytes", i);
        tc.heap_size = self.ss("tcmalloc/generic/heap_size", i);
        tc.bytes_in_use_by_app = self.ss("tcmalloc/generic/bytes_in_use_by_app", i);
        tc.physical_memory_used = self.ss("tcmalloc/generic/physical_memory_used", i);

        ss.flow_control.target_rate_limit = self.ss("flowControl/targetRateLimit", i);
        ss.flow_control.time_acquiring_micros = self.ss("flowControl/timeAcquiringMicros", i);
        ss.flow_control.is_lagged_count = self.ss("flowControl/isLaggedCount", i);

        ss
    }

    /// `systemMetrics` record for sample `i`
    pub fn system_metrics(&self, i: usize) -> SystemMetrics {
        let mut sm = SystemMetrics {
            start_ms: self.ss("localTime", i) as i64,
            ..Default::default()
        };
        sm.cpu.idle_ms = self.get("systemMetrics/cpu/idle_ms", i);
        sm.cpu.user_ms = self.get("systemMetrics/cpu/user_ms", i);
        sm.cpu.iowait_ms = self.get("systemMetrics/cpu/iowait_ms", i);
        sm.cpu.nice_ms = self.get("systemMetrics/cpu/nice_ms", i);
        sm.cpu.softirq_ms = self.get("systemMetrics/cpu/softirq_ms", i);
        sm.cpu.steal_ms = self.get("systemMetrics/cpu/steal_ms", i);
        sm.cpu.system_ms = self.get("systemMetrics/cpu/system_ms", i);

        let mut disks: BTreeMap<String, DiskMetrics> = BTreeMap::new();
        for (device, stat, path) in &self.disk_index {
            let disk = disks.entry((*device).to_string()).or_default();
            stat.set(disk, self.get(path, i));
        }
        sm.disks = disks;
        sm
    }

    /// Devices seen under `systemMetrics/disks`
    pub fn devices(&self) -> Vec<&'a str> {
        let mut devices: Vec<&'a str> = self.disk_index.iter().map(|(d, _, _)| *d).collect();
        devices.dedup();
        devices
    }
}
