// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Assessment, diagnosis and service integration tests

use std::fs;
use std::path::Path;

use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use ftdc::bson::DocumentBuilder;
use ftdc::{FtdcStats, MetricsFileWriter, TimeSeries};
use ftdc_analytics::assessment::WINDOW_TOO_LONG;
use ftdc_analytics::{
    AnalyticsConfig, AnomalyConfig, Assessment, AssessmentConfig, Diagnosis, DiagnosisRule,
    FormulaTable, FtdcService, Percentiles, RuleSet, ScoreRange, Severity,
};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000_000;

fn stats_with_series(name: &str, values: impl IntoIterator<Item = f64>) -> FtdcStats {
    let mut ts = TimeSeries::new(name);
    for (i, v) in values.into_iter().enumerate() {
        ts.push(v, i as i64 * 1000);
    }
    let mut stats = FtdcStats::default();
    stats.series.insert(name.to_string(), ts);
    stats
}

/// One sample per second with a busy CPU: 90% user, 10% idle
fn write_busy_capture(dir: &Path, seconds: i64) {
    let mut writer = MetricsFileWriter::default();
    writer.write_metadata(
        T0,
        DocumentBuilder::new()
            .document(
                "hostInfo",
                DocumentBuilder::new()
                    .document(
                        "system",
                        DocumentBuilder::new()
                            .string("hostname", "db1.example.net")
                            .int32("numCores", 4)
                            .int64("memSizeMB", 8192)
                            .string("cpuArch", "x86_64"),
                    )
                    .document(
                        "os",
                        DocumentBuilder::new()
                            .string("name", "Ubuntu 22.04")
                            .string("type", "Linux")
                            .string("version", "5.15"),
                    ),
            )
            .document("buildInfo", DocumentBuilder::new().string("version", "7.0.4")),
    );
    for s in 0..seconds {
        let t = T0 + s * 1000;
        let sample = DocumentBuilder::new()
            .document(
                "serverStatus",
                DocumentBuilder::new()
                    .datetime("localTime", t)
                    .int64("uptime", 500 + s)
                    .document("connections", DocumentBuilder::new().int32("current", 40))
                    .document("opcounters", DocumentBuilder::new().int64("query", 200 * s)),
            )
            .document(
                "systemMetrics",
                DocumentBuilder::new().document(
                    "cpu",
                    DocumentBuilder::new()
                        .int64("user_ms", 900 * s)
                        .int64("idle_ms", 100 * s),
                ),
            )
            .build();
        writer.write_sample(t, sample).unwrap();
    }
    fs::write(dir.join("metrics.2023-11-14T22-13-20Z-00000"), writer.finish().unwrap()).unwrap();
}

// ============================================================================
// Section 1: Scoring
// ============================================================================

#[test]
fn test_scenario_d_saturated_cpu_scores_zero() {
    let stats = stats_with_series("cpu_idle", (0..100).map(|i| if i < 50 { 10.0 } else { 40.0 }));
    let assessment = Assessment::new(&stats, &FormulaTable::default());

    let score = assessment.metric_score("cpu_idle", 0, 99_000);
    assert_eq!(score.p5, 10.0);
    assert_eq!(score.score, 0);
    assert_eq!(score.label, "cpu_idle %");
}

#[test]
fn test_rank_percentiles() {
    let values: Vec<f64> = (1..=20).map(f64::from).collect();
    let p = Percentiles::of(&values);
    // floor(q * 21): indexes 1, 10 and 19
    assert_eq!((p.p5, p.median, p.p95), (2.0, 11.0, 20.0));

    // q * (n + 1) exactly whole picks the element at that index
    let nineteen: Vec<f64> = (1..=19).map(f64::from).collect();
    assert_eq!(Percentiles::of(&nineteen).median, 11.0);
    let thirty_nine: Vec<f64> = (1..=39).map(f64::from).collect();
    assert_eq!(Percentiles::of(&thirty_nine).p95, 39.0);
}

#[test]
fn test_injected_formula_changes_score() {
    let stats = stats_with_series("latency_read", vec![30.0; 50]);
    let default_score = Assessment::new(&stats, &FormulaTable::default())
        .metric_score("latency_read", 0, 49_000)
        .score;
    assert_eq!(default_score, 88);

    let strict = FormulaTable::new([("latency_read".to_string(), ScoreRange::new(1.0, 10.0))]);
    let strict_score = Assessment::new(&stats, &strict)
        .metric_score("latency_read", 0, 49_000)
        .score;
    assert_eq!(strict_score, 0);
}

#[test]
fn test_assessment_window_limit() {
    let stats = stats_with_series("cpu_idle", vec![90.0; 10]);
    let assessment = Assessment::new(&stats, &FormulaTable::default());
    let config = AssessmentConfig::default();

    let too_long = assessment.table(0, 73 * 3_600_000, &config);
    assert_eq!(too_long.reason.as_deref(), Some(WINDOW_TOO_LONG));
    assert!(too_long.rows.is_empty());

    let table = assessment.table(0, 9_000, &config);
    assert!(table.reason.is_none());
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.get("cpu_idle").unwrap().score, 100);
}

// ============================================================================
// Section 2: Anomaly timeline
// ============================================================================

#[test]
fn test_scenario_e_three_windows_three_events() {
    let stats = stats_with_series(
        "latency_read",
        (0..120).map(|t| match t {
            10..=25 | 40..=55 | 80..=95 => 45.0,
            // too short to report
            100..=104 => 80.0,
            _ => 3.0,
        }),
    );
    let diagnosis = Diagnosis::new(&stats, 0, 119_000, &FormulaTable::default(), &AnomalyConfig::default());

    let events = diagnosis.anomalies();
    assert_eq!(events.len(), 3);
    let starts: Vec<i64> = events.iter().map(|e| e.start_ms).collect();
    assert_eq!(starts, vec![10_000, 40_000, 80_000]);
    for event in events {
        assert_eq!(event.duration_ms, 15_000);
        assert!(event.duration_ms >= 10_000);
        assert_eq!(event.metric, "latency_read");
        assert_eq!(event.threshold, "> 20ms");
        assert_eq!(event.peak, 45.0);
    }
}

#[test]
fn test_anomalies_limited_to_window() {
    let stats = stats_with_series("cpu_idle", (0..120).map(|t| if t >= 60 { 5.0 } else { 95.0 }));
    let early = Diagnosis::new(&stats, 0, 50_000, &FormulaTable::default(), &AnomalyConfig::default());
    assert!(early.anomalies().is_empty());

    let late = Diagnosis::new(&stats, 0, 119_000, &FormulaTable::default(), &AnomalyConfig::default());
    assert_eq!(late.anomalies().len(), 1);
    assert_eq!(late.anomalies()[0].peak, 5.0);
}

// ============================================================================
// Section 3: Rules
// ============================================================================

fn always(_: &Diagnosis<'_>) -> bool {
    true
}

fn busy_reads(d: &Diagnosis<'_>) -> Vec<String> {
    let m = d.metric("ops_query");
    if m.is_evaluated() {
        vec![format!("Queries: median={:.0}/s", m.median)]
    } else {
        Vec::new()
    }
}

fn no_symptoms(_: &Diagnosis<'_>) -> Vec<String> {
    Vec::new()
}

#[test]
fn test_custom_rule_set() {
    let rules = RuleSet::new(vec![
        DiagnosisRule {
            name: "Busy Reads",
            description: "Many queries",
            severity: Severity::Info,
            condition: always,
            symptoms: busy_reads,
            suggestion: "Nothing to do.",
        },
        DiagnosisRule {
            name: "Silent",
            description: "Never has evidence",
            severity: Severity::Critical,
            condition: always,
            symptoms: no_symptoms,
            suggestion: "",
        },
    ]);
    let stats = stats_with_series("ops_query", vec![250.0; 30]);
    let report = Diagnosis::new(&stats, 0, 29_000, &FormulaTable::default(), &AnomalyConfig::default())
        .into_report(&rules);

    assert_eq!(report.results.len(), 1);
    let result = &report.results[0];
    assert_eq!(result.name, "Busy Reads");
    assert_eq!(result.symptoms, vec!["Queries: median=250/s"]);
    assert_eq!(result.score, 100);
}

#[test]
fn test_empty_data_fires_nothing() {
    let stats = FtdcStats::default();
    let diagnosis = Diagnosis::new(&stats, 0, 60_000, &FormulaTable::default(), &AnomalyConfig::default());
    assert!(diagnosis.run(&RuleSet::default()).is_empty());
    assert!(diagnosis.anomalies().is_empty());
}

// ============================================================================
// Section 4: Service over capture files
// ============================================================================

#[test]
fn test_service_load_and_diagnose() {
    let dir = TempDir::new().unwrap();
    write_busy_capture(dir.path(), 120);
    let service = FtdcService::new(AnalyticsConfig::default());

    let summary = service.load(&[dir.path()]).unwrap();
    assert_eq!(summary.files, 1);
    assert_eq!(summary.samples_added, 120);
    assert_eq!(summary.total_samples, 120);
    let (from, to) = summary.time_range.unwrap();
    assert_eq!(from.timestamp_millis(), T0);
    assert_eq!(to.timestamp_millis(), T0 + 119_000);

    // same directory again adds nothing
    assert_eq!(service.load(&[dir.path()]).unwrap().samples_added, 0);

    let report = service.diagnose();
    assert_eq!(report.hostname, "db1.example.net");
    assert_eq!(report.version, "7.0.4");
    assert!(report.results.iter().any(|r| r.name == "CPU Saturation"));
    assert!(report.anomalies.iter().any(|e| e.metric == "cpu_idle"));
    assert_eq!(report.summary.ops_query, 200.0);

    let text = report.to_string();
    assert!(text.starts_with("FTDC DIAGNOSTIC REPORT"));
    assert!(text.contains("Host: db1.example.net"));
    assert!(text.contains("(WARNING)"));
}

#[test]
fn test_service_queries() {
    let dir = TempDir::new().unwrap();
    write_busy_capture(dir.path(), 60);
    let service = FtdcService::new(AnalyticsConfig::default());
    service.load(&[dir.path()]).unwrap();

    let targets = service.targets();
    assert!(targets.iter().any(|t| t == "cpu_idle"));
    assert!(targets.iter().any(|t| t == "ops_query"));

    let from = Utc.timestamp_millis_opt(T0 + 10_000).single().unwrap();
    let to = Utc.timestamp_millis_opt(T0 + 19_000).single().unwrap();
    let idle = service.series("cpu_idle", from, to);
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].target, "idle");
    assert_eq!(idle[0].len(), 10);
    for p in &idle[0].points {
        assert_relative_eq!(p.value, 10.0);
    }

    let table = service.assessment(from, to);
    assert_eq!(table.get("cpu_idle").unwrap().score, 0);
    assert_eq!(table.rows[0].score, 0);

    let window = service.diagnose_window(from, to);
    assert_eq!(window.from_ms, T0 + 10_000);
    assert!(window.anomalies.is_empty() || window.anomalies[0].start_ms >= T0 + 10_000);

    let info = service.host_info();
    assert_eq!(info[0], "MongoDB v7.0.4");
    assert_eq!(info[1], "CPU: 4 cores (x86_64)");
    assert!(info.contains(&"Memory: 8.0 GB".to_string()));
}
