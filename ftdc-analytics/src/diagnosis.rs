// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Diagnosis engine.
//!
//! A [`Diagnosis`] scores every metric of a window once, then evaluates a
//! [`RuleSet`] against those scores. Rules that hold and produce at least
//! one symptom become [`DiagnosisResult`]s. The anomaly timeline is
//! collected alongside from the raw series.

use std::collections::BTreeMap;

use ftdc::FtdcStats;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anomaly::{collect_anomalies, find_exceedances};
use crate::assessment::{Assessment, MetricScore};
use crate::config::AnomalyConfig;
use crate::event::{AnomalyEvent, Severity, TimeRange};
use crate::formula::FormulaTable;
use crate::report::utc;
use crate::rules::{DiagnosisRule, RuleSet};
use crate::summary::ActivitySummary;

/// Scores of one disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskScores {
    pub iops: MetricScore,
    pub util: MetricScore,
}

/// A rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub name: String,
    pub description: String,
    pub severity: Severity,
    pub symptoms: Vec<String>,
    pub suggestion: String,
    /// Worst related score, 0-100
    pub score: i32,
}

/// Findings and timeline for one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisReport {
    pub from_ms: i64,
    pub to_ms: i64,
    pub hostname: String,
    pub version: String,
    pub summary: ActivitySummary,
    pub anomalies: Vec<AnomalyEvent>,
    pub results: Vec<DiagnosisResult>,
}

/// Scored view of a window that rules inspect.
pub struct Diagnosis<'a> {
    stats: &'a FtdcStats,
    from_ms: i64,
    to_ms: i64,
    metrics: BTreeMap<String, MetricScore>,
    disk_metrics: BTreeMap<String, DiskScores>,
    repl_metrics: BTreeMap<String, MetricScore>,
    summary: ActivitySummary,
    anomalies: Vec<AnomalyEvent>,
}

impl<'a> Diagnosis<'a> {
    pub fn new(
        stats: &'a FtdcStats,
        from_ms: i64,
        to_ms: i64,
        formulas: &FormulaTable,
        anomaly: &AnomalyConfig,
    ) -> Self {
        let assessment = Assessment::new(stats, formulas);

        let mut metrics: BTreeMap<String, MetricScore> = Assessment::metric_names()
            .map(|name| (name.to_string(), assessment.metric_score(name, from_ms, to_ms)))
            .collect();
        if stats.series("tcmalloc_heap").map_or(false, |ts| !ts.is_empty()) {
            metrics.insert(
                "tcmalloc_frag".to_string(),
                assessment.tcmalloc_fragmentation(from_ms, to_ms),
            );
        }

        let disk_metrics: BTreeMap<String, DiskScores> = stats
            .disks
            .keys()
            .filter_map(|disk| {
                let (iops, util) = assessment.disk_scores(disk, from_ms, to_ms)?;
                Some((disk.clone(), DiskScores { iops, util }))
            })
            .collect();

        let repl_metrics: BTreeMap<String, MetricScore> = stats
            .replication
            .lags
            .keys()
            .filter_map(|host| Some((host.clone(), assessment.lag_score(host, from_ms, to_ms)?)))
            .collect();

        let summary = ActivitySummary::from_scores(
            &metrics,
            disk_metrics.values().map(|d| d.util.p95),
            stats.server_info.mem_size_mb() > 0,
            stats.max_wt_cache > 0.0,
        );
        let anomalies = collect_anomalies(stats, from_ms, to_ms, anomaly);

        debug!(
            metrics = metrics.len(),
            disks = disk_metrics.len(),
            hosts = repl_metrics.len(),
            anomalies = anomalies.len(),
            "window scored"
        );

        Self {
            stats,
            from_ms,
            to_ms,
            metrics,
            disk_metrics,
            repl_metrics,
            summary,
            anomalies,
        }
    }

    /// Score of a metric; a not-evaluated placeholder when absent.
    pub fn metric(&self, name: &str) -> MetricScore {
        self.metrics
            .get(name)
            .cloned()
            .unwrap_or_else(|| MetricScore::missing(name))
    }

    pub fn metrics(&self) -> &BTreeMap<String, MetricScore> {
        &self.metrics
    }

    pub fn disk_metrics(&self) -> &BTreeMap<String, DiskScores> {
        &self.disk_metrics
    }

    pub fn repl_metrics(&self) -> &BTreeMap<String, MetricScore> {
        &self.repl_metrics
    }

    pub fn summary(&self) -> &ActivitySummary {
        &self.summary
    }

    pub fn anomalies(&self) -> &[AnomalyEvent] {
        &self.anomalies
    }

    /// Ranges in the window where a named series exceeds `threshold`
    pub fn metric_exceedances(&self, metric: &str, threshold: f64) -> Vec<TimeRange> {
        self.stats
            .series(metric)
            .map(|ts| find_exceedances(ts.window(self.from_ms, self.to_ms), threshold))
            .unwrap_or_default()
    }

    /// Ranges in the window where a member's lag exceeds `threshold` seconds
    pub fn repl_lag_exceedances(&self, host: &str, threshold: f64) -> Vec<TimeRange> {
        self.stats
            .replication
            .lags
            .get(host)
            .map(|ts| find_exceedances(ts.window(self.from_ms, self.to_ms), threshold))
            .unwrap_or_default()
    }

    /// Evaluate every rule; sorted by severity, then ascending score.
    pub fn run(&self, rules: &RuleSet) -> Vec<DiagnosisResult> {
        let mut results: Vec<DiagnosisResult> = rules
            .iter()
            .filter(|rule| (rule.condition)(self))
            .filter_map(|rule| {
                let symptoms = (rule.symptoms)(self);
                if symptoms.is_empty() {
                    return None;
                }
                Some(DiagnosisResult {
                    name: rule.name.to_string(),
                    description: rule.description.to_string(),
                    severity: rule.severity,
                    symptoms,
                    suggestion: rule.suggestion.to_string(),
                    score: self.rule_score(rule),
                })
            })
            .collect();
        results.sort_by(|a, b| a.severity.cmp(&b.severity).then(a.score.cmp(&b.score)));
        results
    }

    /// Worst score below 100 among metrics whose first `_` token appears in
    /// the rule name, else the worst overall, else 100.
    fn rule_score(&self, rule: &DiagnosisRule) -> i32 {
        let rule_name = rule.name.to_lowercase();
        let worst = |related_only: bool| {
            self.metrics
                .iter()
                .filter(|(_, m)| m.score < 100)
                .filter(|(name, _)| {
                    !related_only || rule_name.contains(name.split('_').next().unwrap_or_default())
                })
                .map(|(_, m)| m.score)
                .min()
        };
        worst(true).or_else(|| worst(false)).unwrap_or(100)
    }

    /// Run the rules and package everything into a report.
    pub fn into_report(self, rules: &RuleSet) -> DiagnosisReport {
        let results = self.run(rules);
        let system = &self.stats.server_info.host_info.system;
        DiagnosisReport {
            from_ms: self.from_ms,
            to_ms: self.to_ms,
            hostname: system.hostname.clone(),
            version: self.stats.server_info.build_info.version.clone(),
            summary: self.summary,
            anomalies: self.anomalies,
            results,
        }
    }
}

/// When a problem happened, in a few words.
///
/// One short range: `at HH:MM:SS (peak: x)`. One range of a minute or
/// more: `Mon DD HH:MM to HH:MM (Nm, peak: x)`. Several ranges: count,
/// total minutes and highest peak. Empty for no ranges.
pub fn summarize_exceedances(ranges: &[TimeRange]) -> String {
    match ranges {
        [] => String::new(),
        [r] if r.duration_ms() < 60_000 => {
            format!("at {} (peak: {:.1})", utc(r.start_ms).format("%H:%M:%S"), r.peak)
        }
        [r] => format!(
            "{} to {} ({:.0}m, peak: {:.1})",
            utc(r.start_ms).format("%b %d %H:%M"),
            utc(r.end_ms).format("%H:%M"),
            r.duration_ms() as f64 / 60_000.0,
            r.peak
        ),
        _ => {
            let total_ms: i64 = ranges.iter().map(TimeRange::duration_ms).sum();
            let peak = ranges.iter().map(|r| r.peak).fold(0.0, f64::max);
            format!(
                "{} occurrences over {:.0}m (peak: {:.1})",
                ranges.len(),
                total_ms as f64 / 60_000.0,
                peak
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftdc::TimeSeries;

    fn range(start_s: i64, end_s: i64, peak: f64) -> TimeRange {
        TimeRange {
            start_ms: start_s * 1000,
            end_ms: end_s * 1000,
            peak,
        }
    }

    fn stats_with(entries: &[(&str, f64)], len: i64) -> FtdcStats {
        let mut stats = FtdcStats::default();
        for (name, value) in entries {
            let mut ts = TimeSeries::new(*name);
            for t in 0..len {
                ts.push(*value, t * 1000);
            }
            stats.series.insert(name.to_string(), ts);
        }
        stats
    }

    #[test]
    fn test_summarize_single_short() {
        // 1970-01-01 01:02:03 UTC
        let text = summarize_exceedances(&[range(3723, 3733, 42.0)]);
        assert_eq!(text, "at 01:02:03 (peak: 42.0)");
    }

    #[test]
    fn test_summarize_single_long() {
        let text = summarize_exceedances(&[range(3600, 3600 + 300, 7.5)]);
        assert_eq!(text, "Jan 01 01:00 to 01:05 (5m, peak: 7.5)");
    }

    #[test]
    fn test_summarize_many() {
        let text = summarize_exceedances(&[range(0, 60, 3.0), range(120, 240, 9.0)]);
        assert_eq!(text, "2 occurrences over 3m (peak: 9.0)");
        assert_eq!(summarize_exceedances(&[]), "");
    }

    #[test]
    fn test_missing_metric_not_evaluated() {
        let stats = FtdcStats::default();
        let d = Diagnosis::new(&stats, 0, 1000, &FormulaTable::default(), &AnomalyConfig::default());
        let m = d.metric("does_not_exist");
        assert_eq!(m.score, 101);
        assert!(d.run(&RuleSet::default()).is_empty());
    }

    #[test]
    fn test_cpu_saturation_fires() {
        let stats = stats_with(&[("cpu_idle", 10.0), ("cpu_user", 85.0)], 60);
        let d = Diagnosis::new(&stats, 0, 60_000, &FormulaTable::default(), &AnomalyConfig::default());
        let results = d.run(&RuleSet::default());
        let cpu = results.iter().find(|r| r.name == "CPU Saturation").unwrap();
        assert_eq!(cpu.severity, Severity::Warning);
        assert_eq!(cpu.score, 0);
        assert!(cpu.symptoms.iter().any(|s| s.starts_with("Low CPU idle: p5=10%")));
        assert!(cpu.symptoms.iter().any(|s| s.starts_with("High CPU user: p95=85%")));
    }

    #[test]
    fn test_results_sorted_by_severity() {
        let mut stats = stats_with(&[("cpu_idle", 5.0), ("tcmalloc_heap", 10.0), ("tcmalloc_in_use", 3.0)], 30);
        let mut lag = TimeSeries::new("db2:27017");
        for t in 0..30i64 {
            lag.push(60.0, t * 1000);
        }
        stats.replication.lags.insert("db2:27017".to_string(), lag);

        let d = Diagnosis::new(&stats, 0, 30_000, &FormulaTable::default(), &AnomalyConfig::default());
        let results = d.run(&RuleSet::default());
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Replication Lag Issues", "CPU Saturation", "Memory Fragmentation"]
        );
        assert!(results[0].symptoms[0].starts_with("Replication lag on db2:27017: p95=60.0s (score: 0)"));
        assert!(results[0].symptoms[0].contains("at 00:00:00"));
    }

    #[test]
    fn test_rule_score_falls_back_to_global_worst() {
        let stats = stats_with(&[("latency_read", 60.0)], 10);
        let d = Diagnosis::new(&stats, 0, 10_000, &FormulaTable::default(), &AnomalyConfig::default());
        let rule = DiagnosisRule {
            name: "Unrelated Name",
            description: "",
            severity: Severity::Info,
            condition: |_| true,
            symptoms: |_| vec!["always".to_string()],
            suggestion: "",
        };
        let results = d.run(&RuleSet::new(vec![rule]));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].score, 50);
    }

    #[test]
    fn test_into_report() {
        let mut stats = stats_with(&[("ops_query", 40.0)], 10);
        stats.server_info.host_info.system.hostname = "db1.example.com".to_string();
        stats.server_info.build_info.version = "7.0.4".to_string();
        let d = Diagnosis::new(&stats, 0, 10_000, &FormulaTable::default(), &AnomalyConfig::default());
        let report = d.into_report(&RuleSet::default());
        assert_eq!(report.hostname, "db1.example.com");
        assert_eq!(report.version, "7.0.4");
        assert_eq!(report.summary.ops_query, 40.0);
        assert!(report.results.is_empty());
    }
}
