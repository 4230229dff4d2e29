// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Problem patterns recognized by the diagnosis engine.
//!
//! A rule is a condition over metric scores plus a function rendering the
//! evidence. The default [`RuleSet`] holds ten patterns; callers can build
//! their own.

use std::fmt;

use crate::diagnosis::{summarize_exceedances, Diagnosis};
use crate::event::Severity;

pub type Condition = fn(&Diagnosis<'_>) -> bool;
pub type Symptoms = fn(&Diagnosis<'_>) -> Vec<String>;

/// A problem pattern.
#[derive(Clone)]
pub struct DiagnosisRule {
    pub name: &'static str,
    pub description: &'static str,
    pub severity: Severity,
    pub condition: Condition,
    pub symptoms: Symptoms,
    pub suggestion: &'static str,
}

impl fmt::Debug for DiagnosisRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosisRule")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .finish()
    }
}

/// Immutable, ordered list of rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<DiagnosisRule>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl RuleSet {
    pub fn new(rules: Vec<DiagnosisRule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiagnosisRule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// `base` followed by ` - timing` when there is a timing summary
fn with_timing(base: String, timing: String) -> String {
    if timing.is_empty() {
        base
    } else {
        format!("{} - {}", base, timing)
    }
}

fn connection_pool_condition(d: &Diagnosis<'_>) -> bool {
    let conn = d.metric("conns_current").score;
    let mem = d.metric("mem_resident").score;
    conn < 50 || (conn < 70 && mem < 50)
}

fn connection_pool_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    let conn = d.metric("conns_current");
    if conn.score < 70 {
        // spikes 50% above the median
        let timing = summarize_exceedances(&d.metric_exceedances("conns_current", conn.median * 1.5));
        symptoms.push(with_timing(
            format!("High connections: p95={:.0} (score: {})", conn.p95, conn.score),
            timing,
        ));
    }
    let created = d.metric("conns_created/s");
    if created.score < 50 {
        symptoms.push(format!(
            "Frequent connection churn: {:.1} new conns/s (score: {})",
            created.median, created.score
        ));
    }
    let mem = d.metric("mem_resident");
    if mem.score < 70 {
        symptoms.push(format!("Memory pressure: p95={:.0}% (score: {})", mem.p95, mem.score));
    }
    let latency = d.metric("latency_read");
    if latency.score < 50 {
        symptoms.push(format!(
            "Elevated read latency: p95={:.0}ms (score: {})",
            latency.p95, latency.score
        ));
    }
    symptoms
}

fn replication_lag_condition(d: &Diagnosis<'_>) -> bool {
    d.repl_metrics().values().any(|lag| lag.score < 50)
}

fn replication_lag_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    for (host, lag) in d.repl_metrics() {
        if lag.is_evaluated() && lag.p95 > 0.0 {
            let timing = summarize_exceedances(&d.repl_lag_exceedances(host, 5.0));
            symptoms.push(with_timing(
                format!("Replication lag on {}: p95={:.1}s (score: {})", host, lag.p95, lag.score),
                timing,
            ));
        }
    }
    let insert = d.metric("ops_insert");
    if insert.p95 > 1000.0 {
        symptoms.push(format!("High insert rate: {:.0} ops/s", insert.p95));
    }
    let update = d.metric("ops_update");
    if update.p95 > 1000.0 {
        symptoms.push(format!("High update rate: {:.0} ops/s", update.p95));
    }
    symptoms
}

fn working_set_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("wt_cache_used").score < 30
        || (d.metric("wt_modified_evicted").score < 50 && d.metric("wt_unmodified_evicted").score < 50)
        || d.metric("mem_page_faults").score < 50
}

fn working_set_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let checks = [
        ("wt_cache_used", "WiredTiger cache saturated", "%"),
        ("wt_modified_evicted", "High dirty page evictions", ""),
        ("wt_unmodified_evicted", "High clean page evictions", ""),
        ("mem_page_faults", "High page faults", ""),
    ];
    let mut symptoms: Vec<String> = checks
        .iter()
        .filter_map(|(metric, text, unit)| {
            let m = d.metric(metric);
            (m.score < 50).then(|| format!("{}: p95={:.0}{} (score: {})", text, m.p95, unit, m.score))
        })
        .collect();
    for (disk, scores) in d.disk_metrics() {
        if scores.util.score < 50 {
            symptoms.push(format!(
                "High disk utilization on {}: p95={:.0}% (score: {})",
                disk, scores.util.p95, scores.util.score
            ));
        }
    }
    symptoms
}

fn write_contention_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("write_conflicts/s").score < 50 || d.metric("txn_aborted/s").score < 50
}

fn write_contention_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    let conflicts = d.metric("write_conflicts/s");
    if conflicts.is_evaluated() && conflicts.p95 > 0.0 {
        symptoms.push(format!("Write conflicts: p95={:.0}/s (score: {})", conflicts.p95, conflicts.score));
    }
    let aborted = d.metric("txn_aborted/s");
    if aborted.is_evaluated() && aborted.p95 > 0.0 {
        symptoms.push(format!("Transaction aborts: p95={:.0}/s (score: {})", aborted.p95, aborted.score));
    }
    let inactive = d.metric("txn_inactive");
    if inactive.is_evaluated() && inactive.p95 > 0.0 {
        symptoms.push(format!("Inactive transactions: p95={:.0} (score: {})", inactive.p95, inactive.score));
    }
    let queued = d.metric("q_queued_write");
    if queued.score < 50 {
        symptoms.push(format!("Write queue depth: p95={:.0} (score: {})", queued.p95, queued.score));
    }
    symptoms
}

fn missing_indexes_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("query_targeting_keys").score < 50
        || d.metric("query_targeting_objects").score < 50
        || d.metric("scan_keys").score < 50
}

fn missing_indexes_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    let keys = d.metric("query_targeting_keys");
    if keys.is_evaluated() && keys.p95 > 1.0 {
        symptoms.push(format!(
            "Keys examined per doc returned: p95={:.0}:1 (score: {})",
            keys.p95, keys.score
        ));
    }
    let objects = d.metric("query_targeting_objects");
    if objects.is_evaluated() && objects.p95 > 1.0 {
        symptoms.push(format!(
            "Docs examined per doc returned: p95={:.0}:1 (score: {})",
            objects.p95, objects.score
        ));
    }
    let scan_keys = d.metric("scan_keys");
    if scan_keys.score < 50 {
        symptoms.push(format!("Keys scanned: p95={:.0}/s (score: {})", scan_keys.p95, scan_keys.score));
    }
    let scan_objects = d.metric("scan_objects");
    if scan_objects.score < 50 {
        symptoms.push(format!(
            "Objects scanned per key: avg={:.0}:1 (score: {})",
            scan_objects.p95, scan_objects.score
        ));
    }
    symptoms
}

fn fragmentation_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("tcmalloc_frag").score < 50
}

fn fragmentation_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let frag = d.metric("tcmalloc_frag");
    if frag.is_evaluated() {
        vec![format!("Memory fragmentation: p95={:.0}% (score: {})", frag.p95, frag.score)]
    } else {
        Vec::new()
    }
}

fn cpu_saturation_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("cpu_idle").score < 30 || d.metric("cpu_user").score < 30 || d.metric("cpu_system").score < 30
}

fn cpu_saturation_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    let idle = d.metric("cpu_idle");
    if idle.score < 50 && idle.p5 < 100.0 {
        symptoms.push(format!("Low CPU idle: p5={:.0}% (score: {})", idle.p5, idle.score));
    }
    for (metric, text) in [
        ("cpu_user", "High CPU user"),
        ("cpu_system", "High CPU system"),
        ("cpu_iowait", "High CPU I/O wait"),
    ] {
        let m = d.metric(metric);
        if m.score < 50 {
            symptoms.push(format!("{}: p95={:.0}% (score: {})", text, m.p95, m.score));
        }
    }
    symptoms
}

fn disk_io_condition(d: &Diagnosis<'_>) -> bool {
    d.disk_metrics().values().any(|scores| scores.util.score < 30)
}

fn disk_io_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    for (disk, scores) in d.disk_metrics() {
        if scores.util.score < 50 {
            symptoms.push(format!(
                "Disk {} utilization: p95={:.0}% (score: {})",
                disk, scores.util.p95, scores.util.score
            ));
        }
        if scores.iops.score < 50 {
            symptoms.push(format!(
                "Disk {} IOPS spikes: p95={:.0} (score: {})",
                disk, scores.iops.p95, scores.iops.score
            ));
        }
    }
    let iowait = d.metric("cpu_iowait");
    if iowait.score < 50 {
        symptoms.push(format!("CPU I/O wait: p95={:.0}%", iowait.p95));
    }
    symptoms
}

fn flow_control_condition(d: &Diagnosis<'_>) -> bool {
    let lagged = d.metric("flowctl_lagged_count");
    (lagged.is_evaluated() && lagged.p95 > 0.0) || d.metric("flowctl_acquiring_us").score < 50
}

fn flow_control_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    let mut symptoms = Vec::new();
    let lagged = d.metric("flowctl_lagged_count");
    if lagged.is_evaluated() && lagged.p95 > 0.0 {
        symptoms.push(format!("Lagged members: p95={:.0} (score: {})", lagged.p95, lagged.score));
    }
    let acquiring = d.metric("flowctl_acquiring_us");
    if acquiring.is_evaluated() && acquiring.p95 > 0.0 {
        symptoms.push(format!(
            "Flow control wait: p95={:.0}ms (score: {})",
            acquiring.p95 / 1000.0,
            acquiring.score
        ));
    }
    symptoms
}

fn admission_control_condition(d: &Diagnosis<'_>) -> bool {
    d.metric("queues_read_out").score < 50 || d.metric("queues_write_out").score < 50
}

fn admission_control_symptoms(d: &Diagnosis<'_>) -> Vec<String> {
    [("queues_read_out", "Read"), ("queues_write_out", "Write")]
        .iter()
        .filter_map(|(metric, kind)| {
            let m = d.metric(metric);
            (m.is_evaluated() && m.p95 > 0.0)
                .then(|| format!("{} tickets in use: p95={:.0} (score: {})", kind, m.p95, m.score))
        })
        .collect()
}

/// The ten built-in problem patterns.
pub fn default_rules() -> Vec<DiagnosisRule> {
    vec![
        DiagnosisRule {
            name: "Connection Pool Misconfiguration",
            description: "High connection count consuming memory - each connection uses ~1MB RAM",
            severity: Severity::Warning,
            condition: connection_pool_condition,
            symptoms: connection_pool_symptoms,
            suggestion: "Reduce maxPoolSize in application connection strings. Consider using connection pooling middleware. Each connection uses ~1MB RAM.",
        },
        DiagnosisRule {
            name: "Replication Lag Issues",
            description: "Secondary nodes falling behind primary, potentially causing stale reads",
            severity: Severity::Critical,
            condition: replication_lag_condition,
            symptoms: replication_lag_symptoms,
            suggestion: "Check network latency between nodes. Consider upgrading secondary hardware. Review oplog size. For Atlas, consider scaling up the cluster.",
        },
        DiagnosisRule {
            name: "Working Set Exceeds RAM",
            description: "Active data larger than available memory causing excessive disk I/O",
            severity: Severity::Critical,
            condition: working_set_condition,
            symptoms: working_set_symptoms,
            suggestion: "Add more RAM or scale up instance. Create indexes to reduce working set. Archive old data. Consider sharding for horizontal scaling.",
        },
        DiagnosisRule {
            name: "Write Contention",
            description: "High transaction conflicts and aborts indicate hot documents or poor schema design",
            severity: Severity::Warning,
            condition: write_contention_condition,
            symptoms: write_contention_symptoms,
            suggestion: "Review document update patterns to avoid hot documents. Use optimistic concurrency control. Consider redesigning schema to distribute writes. Reduce transaction scope.",
        },
        DiagnosisRule {
            name: "Missing Indexes",
            description: "High query targeting ratios indicate collection scans or inefficient index usage",
            severity: Severity::Warning,
            condition: missing_indexes_condition,
            symptoms: missing_indexes_symptoms,
            suggestion: "Run explain() on slow queries. Create compound indexes matching query patterns. Use covered queries where possible. Consider using $hint for query plan control.",
        },
        DiagnosisRule {
            name: "Memory Fragmentation",
            description: "tcmalloc memory fragmentation causing inefficient memory usage",
            severity: Severity::Info,
            condition: fragmentation_condition,
            symptoms: fragmentation_symptoms,
            suggestion: "Consider restarting mongod during maintenance window. This is often caused by varied allocation sizes. Monitor for memory growth over time.",
        },
        DiagnosisRule {
            name: "CPU Saturation",
            description: "High CPU usage may indicate inefficient queries or under-provisioned hardware",
            severity: Severity::Warning,
            condition: cpu_saturation_condition,
            symptoms: cpu_saturation_symptoms,
            suggestion: "Profile slow queries. Add appropriate indexes. Consider upgrading CPU or scaling horizontally. Check for runaway operations with currentOp().",
        },
        DiagnosisRule {
            name: "Disk I/O Bottleneck",
            description: "Storage subsystem struggling to keep up with I/O demands",
            severity: Severity::Warning,
            condition: disk_io_condition,
            symptoms: disk_io_symptoms,
            suggestion: "Upgrade to faster storage (NVMe SSD). Increase IOPS provisioning. Reduce working set size. Ensure readahead is optimized for MongoDB workload.",
        },
        DiagnosisRule {
            name: "Flow Control Activated",
            description: "MongoDB 7.0+ flow control is throttling writes due to lagging members",
            severity: Severity::Warning,
            condition: flow_control_condition,
            symptoms: flow_control_symptoms,
            suggestion: "Address replication lag on secondary nodes. Check network connectivity. Consider upgrading secondary hardware to match primary.",
        },
        DiagnosisRule {
            name: "Admission Control Queuing",
            description: "MongoDB 7.0+ admission control is queuing operations",
            severity: Severity::Warning,
            condition: admission_control_condition,
            symptoms: admission_control_symptoms,
            suggestion: "High ticket usage indicates system under load. Scale up resources or optimize queries. Review concurrent operation patterns.",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnomalyConfig;
    use crate::formula::FormulaTable;
    use ftdc::{FtdcStats, TimeSeries};

    fn stats_with(entries: &[(&str, f64)]) -> FtdcStats {
        let mut stats = FtdcStats::default();
        for (name, value) in entries {
            let mut ts = TimeSeries::new(*name);
            for t in 0..20i64 {
                ts.push(*value, t * 1000);
            }
            stats.series.insert(name.to_string(), ts);
        }
        stats
    }

    fn fired(stats: &FtdcStats) -> Vec<String> {
        let d = Diagnosis::new(stats, 0, 20_000, &FormulaTable::default(), &AnomalyConfig::default());
        d.run(&RuleSet::default()).into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_default_rule_set() {
        let rules = RuleSet::default();
        assert_eq!(rules.len(), 10);
        let critical = rules.iter().filter(|r| r.severity == Severity::Critical).count();
        assert_eq!(critical, 2);
    }

    #[test]
    fn test_write_contention() {
        let stats = stats_with(&[("write_conflicts/s", 80.0), ("txn_aborted/s", 3.0)]);
        let d = Diagnosis::new(&stats, 0, 20_000, &FormulaTable::default(), &AnomalyConfig::default());
        let symptoms = write_contention_symptoms(&d);
        assert_eq!(symptoms.len(), 2);
        assert_eq!(symptoms[0], "Write conflicts: p95=80/s (score: 22)");
        assert_eq!(fired(&stats), vec!["Write Contention"]);
    }

    #[test]
    fn test_missing_indexes() {
        let stats = stats_with(&[("query_targeting_keys", 250.0), ("scan_keys", 50.0)]);
        assert_eq!(fired(&stats), vec!["Missing Indexes"]);
    }

    #[test]
    fn test_flow_control_lagged_members() {
        let stats = stats_with(&[("flowctl_lagged_count", 1.0), ("flowctl_acquiring_us", 50_000.0)]);
        let d = Diagnosis::new(&stats, 0, 20_000, &FormulaTable::default(), &AnomalyConfig::default());
        assert!(flow_control_condition(&d));
        assert_eq!(
            flow_control_symptoms(&d),
            vec!["Lagged members: p95=1 (score: 100)", "Flow control wait: p95=50ms (score: 100)"]
        );
    }

    #[test]
    fn test_condition_without_symptoms_does_not_fire() {
        let rule = DiagnosisRule {
            name: "Silent",
            description: "",
            severity: Severity::Info,
            condition: |_| true,
            symptoms: |_| Vec::new(),
            suggestion: "",
        };
        let stats = FtdcStats::default();
        let d = Diagnosis::new(&stats, 0, 1000, &FormulaTable::default(), &AnomalyConfig::default());
        assert!(d.run(&RuleSet::new(vec![rule])).is_empty());
    }

    #[test]
    fn test_healthy_window_fires_nothing() {
        let stats = stats_with(&[("cpu_idle", 90.0), ("cpu_user", 5.0), ("latency_read", 1.0)]);
        assert!(fired(&stats).is_empty());
    }
}
