// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Plain-text rendering of a [`DiagnosisReport`].

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::diagnosis::DiagnosisReport;

/// Anomalies listed in the text report
const TIMELINE_LIMIT: usize = 10;

const RULE: &str =
    "--------------------------------------------------------------------------------";

/// UTC time of an epoch-milliseconds timestamp; the epoch when out of range.
pub fn utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Peak value with the unit its metric implies.
pub fn format_peak_value(peak: f64, metric: &str) -> String {
    if metric.contains("latency") {
        format!("{:.1}ms", peak)
    } else if metric.contains("cpu") || metric.contains("disk_util") {
        format!("{:.0}%", peak)
    } else if metric.contains("repl_lag") {
        format!("{:.1}s", peak)
    } else if peak >= 1_000_000.0 {
        format!("{:.1}M", peak / 1_000_000.0)
    } else if peak >= 1000.0 {
        format!("{:.1}K", peak / 1000.0)
    } else {
        format!("{:.0}", peak)
    }
}

/// Duration rounded to whole seconds, as `1h2m3s`, `4m5s` or `6s`.
pub fn format_duration(ms: i64) -> String {
    let secs = ((ms as f64) / 1000.0).round() as i64;
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Human-readable byte size, binary units.
pub fn format_storage_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn percent_or_na(value: f64) -> String {
    if value >= 0.0 {
        format!("{:.0}%", value)
    } else {
        "N/A".to_string()
    }
}

fn section(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f, "{}", RULE)?;
    writeln!(f, "{}", title)?;
    writeln!(f, "{}", RULE)?;
    writeln!(f)
}

impl fmt::Display for DiagnosisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = |ms: i64| utc(ms).format("%Y-%m-%d %H:%M:%S");

        writeln!(f, "FTDC DIAGNOSTIC REPORT")?;
        writeln!(f, "{}", "=".repeat(RULE.len()))?;
        writeln!(f)?;
        writeln!(f, "Analysis Period: {} to {}", time(self.from_ms), time(self.to_ms))?;
        writeln!(f, "Duration: {}", format_duration(self.to_ms - self.from_ms))?;
        writeln!(f, "Host: {}", self.hostname)?;
        writeln!(f, "MongoDB: v{}", self.version)?;
        writeln!(f)?;

        let s = &self.summary;
        section(f, "ACTIVITY SUMMARY")?;
        writeln!(
            f,
            "   Operations/sec:   query={:.0}  insert={:.0}  update={:.0}  delete={:.0}  cmd={:.0}  (total={:.0})",
            s.ops_query, s.ops_insert, s.ops_update, s.ops_delete, s.ops_command, s.ops_total
        )?;
        writeln!(
            f,
            "   Latency p95 (ms): read={:.1}  write={:.1}  command={:.1}",
            s.latency_read, s.latency_write, s.latency_command
        )?;
        writeln!(
            f,
            "   Scans p95/s:      keys={:.0}  objects={:.0}  docs_returned={:.0}",
            s.scan_keys, s.scan_objects, s.docs_returned
        )?;
        writeln!(
            f,
            "   Resources:        CPU={:.0}%  RAM={}  Cache={}  Disk={:.0}%",
            s.cpu_busy(),
            percent_or_na(s.mem_resident),
            percent_or_na(s.cache_used),
            s.disk_util
        )?;
        writeln!(
            f,
            "   Network:          requests={:.0}/s  in={:.1} MB/s  out={:.1} MB/s",
            s.net_requests_per_sec, s.net_in_mbps, s.net_out_mbps
        )?;
        writeln!(
            f,
            "   Connections:      active={:.0}  current={:.0}",
            s.conns_active, s.conns_current
        )?;
        writeln!(f)?;

        if !self.anomalies.is_empty() {
            section(f, "ANOMALY TIMELINE (for slow query log correlation)")?;
            for a in self.anomalies.iter().take(TIMELINE_LIMIT) {
                writeln!(
                    f,
                    "   {}  {:<20}  peak={:<10}  duration={}",
                    utc(a.start_ms).format("%b %d %H:%M:%S"),
                    a.metric,
                    format_peak_value(a.peak, &a.metric),
                    format_duration(a.duration_ms)
                )?;
            }
            if self.anomalies.len() > TIMELINE_LIMIT {
                writeln!(f, "   ... and {} more events", self.anomalies.len() - TIMELINE_LIMIT)?;
            }
            writeln!(f)?;
        }

        if self.results.is_empty() {
            writeln!(f, "No significant issues detected!")?;
            return writeln!(f);
        }

        writeln!(f, "Found {} potential issue(s):", self.results.len())?;
        writeln!(f)?;
        for (i, result) in self.results.iter().enumerate() {
            section(
                f,
                &format!(
                    "[{}] {} ({})",
                    i + 1,
                    result.name,
                    result.severity.as_str().to_uppercase()
                ),
            )?;
            writeln!(f, "   {}", result.description)?;
            writeln!(f)?;
            writeln!(f, "   Symptoms:")?;
            for symptom in &result.symptoms {
                writeln!(f, "   - {}", symptom)?;
            }
            writeln!(f)?;
            writeln!(f, "   Suggestion: {}", result.suggestion)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::DiagnosisResult;
    use crate::event::{AnomalyEvent, Severity};

    #[test]
    fn test_format_peak_value() {
        assert_eq!(format_peak_value(25.55, "latency_read"), "25.6ms");
        assert_eq!(format_peak_value(91.2, "cpu_idle"), "91%");
        assert_eq!(format_peak_value(88.0, "disk_util_sda"), "88%");
        assert_eq!(format_peak_value(12.0, "repl_lag_db2:27017"), "12.0s");
        assert_eq!(format_peak_value(2_500_000.0, "scan_keys"), "2.5M");
        assert_eq!(format_peak_value(150_000.0, "scan_objects"), "150.0K");
        assert_eq!(format_peak_value(42.0, "q_queued_read"), "42");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(15_000), "15s");
        assert_eq!(format_duration(14_600), "15s");
        assert_eq!(format_duration(125_000), "2m5s");
        assert_eq!(format_duration(3_723_000), "1h2m3s");
        assert_eq!(format_duration(0), "0s");
    }

    #[test]
    fn test_format_storage_size() {
        assert_eq!(format_storage_size(512), "512 B");
        assert_eq!(format_storage_size(16 * 1024 * 1024 * 1024), "16.0 GB");
    }

    #[test]
    fn test_report_without_findings() {
        let report = DiagnosisReport {
            from_ms: 0,
            to_ms: 3_600_000,
            hostname: "db1".to_string(),
            version: "7.0.4".to_string(),
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("Analysis Period: 1970-01-01 00:00:00 to 1970-01-01 01:00:00"));
        assert!(text.contains("Duration: 1h0m0s"));
        assert!(text.contains("MongoDB: v7.0.4"));
        assert!(text.contains("RAM=0%"));
        assert!(text.contains("No significant issues detected!"));
        assert!(!text.contains("ANOMALY TIMELINE"));
    }

    #[test]
    fn test_report_with_findings() {
        let anomalies: Vec<AnomalyEvent> = (0..12)
            .map(|i| AnomalyEvent {
                start_ms: i * 60_000,
                end_ms: i * 60_000 + 15_000,
                duration_ms: 15_000,
                metric: "latency_read".to_string(),
                peak: 35.0,
                threshold: "> 20ms".to_string(),
                severity: Severity::Warning,
            })
            .collect();
        let mut report = DiagnosisReport {
            anomalies,
            results: vec![DiagnosisResult {
                name: "CPU Saturation".to_string(),
                description: "High CPU usage".to_string(),
                severity: Severity::Warning,
                symptoms: vec!["Low CPU idle: p5=10% (score: 0)".to_string()],
                suggestion: "Profile slow queries.".to_string(),
                score: 0,
            }],
            ..Default::default()
        };
        report.summary.mem_resident = -1.0;

        let text = report.to_string();
        assert!(text.contains("RAM=N/A"));
        assert!(text.contains("Jan 01 00:00:00  latency_read          peak=35.0ms      duration=15s"));
        assert!(text.contains("... and 2 more events"));
        assert!(text.contains("Found 1 potential issue(s):"));
        assert!(text.contains("[1] CPU Saturation (WARNING)"));
        assert!(text.contains("   - Low CPU idle: p5=10% (score: 0)"));
    }
}
