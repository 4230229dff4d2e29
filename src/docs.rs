// FTDC - MongoDB Full-Time Diagnostic Data Capture decoder
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed sample records
//!
//! Projected views of one FTDC sample: server status counters, host
//! metrics, replica set status, and the server info taken from the
//! metadata envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bson::{Document, Value};
use crate::error::DecodeError;

/// Replica member state of a primary
pub const STATE_PRIMARY: i32 = 1;
/// Replica member state of a secondary
pub const STATE_SECONDARY: i32 = 2;
/// Replica member state of an arbiter
pub const STATE_ARBITER: i32 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemStats {
    /// MB
    pub resident: u64,
    /// MB
    pub virtual_: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub num_requests: u64,
    pub physical_bytes_in: u64,
    pub physical_bytes_out: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub current: u64,
    pub available: u64,
    pub total_created: u64,
    pub active: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReadersWriters {
    pub readers: u64,
    pub writers: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GlobalLockStats {
    pub active_clients: ReadersWriters,
    pub current_queue: ReadersWriters,
}

/// Cumulative latency (microseconds) and operation count
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub latency: u64,
    pub ops: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpLatencies {
    pub reads: LatencyStats,
    pub writes: LatencyStats,
    pub commands: LatencyStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OpCounters {
    pub query: u64,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
    pub getmore: u64,
    pub command: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueryExecutorStats {
    pub scanned: u64,
    pub scanned_objects: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub scan_and_order: u64,
    pub write_conflicts: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DocumentStats {
    pub returned: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CursorStats {
    pub total: u64,
    pub pinned: u64,
    pub no_timeout: u64,
}

/// `serverStatus.metrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ServerMetrics {
    pub query_executor: QueryExecutorStats,
    pub operation: OperationStats,
    pub document: DocumentStats,
    pub cursor: CursorStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BlockManagerStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_written_checkpoint: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub max_bytes_configured: u64,
    pub currently_in_cache: u64,
    pub tracked_dirty_bytes: u64,
    pub modified_pages_evicted: u64,
    pub unmodified_pages_evicted: u64,
    pub bytes_read_into_cache: u64,
    pub bytes_written_from_cache: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TicketStats {
    pub read_available: u64,
    pub write_available: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WiredTigerStats {
    pub block_manager: BlockManagerStats,
    pub cache: CacheStats,
    pub data_handles_active: u64,
    pub concurrent_transactions: TicketStats,
}

/// One execution queue of the admission control layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionQueue {
    pub out: u64,
    pub available: u64,
    pub total_tickets: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExecutionQueues {
    pub read: ExecutionQueue,
    pub write: ExecutionQueue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TransactionStats {
    pub current_active: u64,
    pub current_inactive: u64,
    pub current_open: u64,
    pub total_aborted: u64,
    pub total_committed: u64,
    pub total_started: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TcmallocStats {
    pub current_allocated_bytes: u64,
    pub heap_size: u64,
    pub bytes_in_use_by_app: u64,
    pub physical_memory_used: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FlowControlStats {
    pub target_rate_limit: u64,
    pub time_acquiring_micros: u64,
    pub is_lagged_count: u64,
}

/// Projected `serverStatus` sample
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerStatus {
    /// Sample time, epoch ms
    pub local_time_ms: i64,
    /// Seconds since process start
    pub uptime: u64,
    pub mem: MemStats,
    pub network: NetworkStats,
    pub connections: ConnectionStats,
    pub page_faults: u64,
    pub global_lock: GlobalLockStats,
    pub op_latencies: OpLatencies,
    pub opcounters: OpCounters,
    pub opcounters_repl: OpCounters,
    pub metrics: ServerMetrics,
    pub wired_tiger: WiredTigerStats,
    pub queues: ExecutionQueues,
    pub transactions: TransactionStats,
    pub tcmalloc: TcmallocStats,
    pub flow_control: FlowControlStats,
}

/// Cumulative CPU time per category, ms
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuMetrics {
    pub idle_ms: u64,
    pub user_ms: u64,
    pub iowait_ms: u64,
    pub nice_ms: u64,
    pub softirq_ms: u64,
    pub steal_ms: u64,
    pub system_ms: u64,
}

impl CpuMetrics {
    pub fn total_ms(&self) -> u64 {
        self.idle_ms
            .wrapping_add(self.user_ms)
            .wrapping_add(self.iowait_ms)
            .wrapping_add(self.nice_ms)
            .wrapping_add(self.softirq_ms)
            .wrapping_add(self.steal_ms)
            .wrapping_add(self.system_ms)
    }
}

/// Cumulative per-device counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiskMetrics {
    pub reads: u64,
    pub writes: u64,
    pub read_time_ms: u64,
    pub write_time_ms: u64,
    pub io_time_ms: u64,
    pub io_queued_ms: u64,
    pub io_in_progress: u64,
}

/// Projected `systemMetrics` sample
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Sample time, epoch ms
    pub start_ms: i64,
    pub cpu: CpuMetrics,
    pub disks: BTreeMap<String, DiskMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplMember {
    pub name: String,
    pub state: i32,
    /// Seconds part of the member's last applied optime
    pub optime_secs: i64,
}

/// One `replSetGetStatus` snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplSetStatus {
    /// Snapshot time, epoch ms
    pub date_ms: i64,
    pub members: Vec<ReplMember>,
}

impl ReplSetStatus {
    /// Read `replSetGetStatus` from a reference document.
    ///
    /// `None` when the section is absent or lists no members.
    pub fn from_reference(doc: Document<'_>) -> Result<Option<Self>, DecodeError> {
        let status = match doc.get("replSetGetStatus")? {
            Some(Value::Document(status)) => status,
            _ => return Ok(None),
        };
        let date_ms = match status.get("date")? {
            Some(Value::DateTime(ms)) => ms,
            Some(v) => v.as_i64().unwrap_or(0),
            None => 0,
        };
        let members_doc = match status.get("members")? {
            Some(Value::Array(members)) => members,
            _ => return Ok(None),
        };

        let mut members = Vec::new();
        for element in members_doc.iter() {
            let (_, value) = element?;
            let member = match value.as_document() {
                Some(member) => member,
                None => continue,
            };
            let name = member
                .get("name")?
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let state = member.get("state")?.and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            let optime_secs = match member.get("optime")? {
                Some(optime) => optime_seconds(optime)?,
                None => 0,
            };
            members.push(ReplMember {
                name,
                state,
                optime_secs,
            });
        }

        if members.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { date_ms, members }))
    }
}

/// Seconds of an optime given as a bare timestamp or as `{ts, t}`
fn optime_seconds(optime: Value<'_>) -> Result<i64, DecodeError> {
    Ok(match optime {
        Value::Timestamp { time, .. } => time as i64,
        Value::Document(doc) => match doc.get("ts")? {
            Some(Value::Timestamp { time, .. }) => time as i64,
            _ => 0,
        },
        _ => 0,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSystem {
    pub hostname: String,
    pub num_cores: u32,
    #[serde(rename = "memSizeMB")]
    pub mem_size_mb: u64,
    pub cpu_arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostOs {
    pub name: String,
    #[serde(rename = "type")]
    pub os_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostInfo {
    pub system: HostSystem,
    pub os: HostOs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildInfo {
    pub version: String,
}

/// Host and build description from the metadata envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerInfo {
    pub host_info: HostInfo,
    pub build_info: BuildInfo,
}

impl ServerInfo {
    /// Read the `doc` of a `type: 0` envelope; absent fields stay empty
    pub fn from_document(doc: Document<'_>) -> Result<Self, DecodeError> {
        let text = |path: &[&str]| -> Result<String, DecodeError> {
            Ok(doc
                .get_path(path)?
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string())
        };
        let number = |path: &[&str]| -> Result<i64, DecodeError> {
            Ok(doc.get_path(path)?.and_then(|v| v.as_i64()).unwrap_or(0))
        };

        Ok(Self {
            host_info: HostInfo {
                system: HostSystem {
                    hostname: text(&["hostInfo", "system", "hostname"])?,
                    num_cores: number(&["hostInfo", "system", "numCores"])?.max(0) as u32,
                    mem_size_mb: number(&["hostInfo", "system", "memSizeMB"])?.max(0) as u64,
                    cpu_arch: text(&["hostInfo", "system", "cpuArch"])?,
                },
                os: HostOs {
                    name: text(&["hostInfo", "os", "name"])?,
                    os_type: text(&["hostInfo", "os", "type"])?,
                    version: text(&["hostInfo", "os", "version"])?,
                },
            },
            build_info: BuildInfo {
                version: text(&["buildInfo", "version"])?,
            },
        })
    }

    pub fn num_cores(&self) -> u32 {
        self.host_info.system.num_cores
    }

    pub fn mem_size_mb(&self) -> u64 {
        self.host_info.system.mem_size_mb
    }
}

/// Everything read from a set of capture files
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticData {
    pub server_info: Option<ServerInfo>,
    pub server_status: Vec<ServerStatus>,
    pub system_metrics: Vec<SystemMetrics>,
    pub repl_status: Vec<ReplSetStatus>,
}

impl DiagnosticData {
    pub fn is_empty(&self) -> bool {
        self.server_status.is_empty()
    }

    /// Append another file's records; a later server info wins
    pub fn append(&mut self, other: DiagnosticData) {
        if other.server_info.is_some() {
            self.server_info = other.server_info;
        }
        self.server_status.extend(other.server_status);
        self.system_metrics.extend(other.system_metrics);
        self.repl_status.extend(other.repl_status);
    }
}
