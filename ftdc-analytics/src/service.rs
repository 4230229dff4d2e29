// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Query boundary over loaded diagnostic data.
//!
//! [`FtdcService`] owns the aggregate store. Loading decodes without the
//! lock and only takes the write lock to merge; every query runs under a
//! read lock, so charts and reports can be served while files are added.

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ftdc::derive::{server_status_legends, CPU_LEGENDS, DISK_TARGETS, MB, REPLICATION_TARGET};
use ftdc::{metrics_filenames, read_diagnostic_files, short_label, FtdcStats, TimeSeries};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assessment::{Assessment, AssessmentTable};
use crate::config::AnalyticsConfig;
use crate::diagnosis::{Diagnosis, DiagnosisReport};
use crate::error::Result;
use crate::formula::FormulaTable;
use crate::report::{format_storage_size, utc};
use crate::rules::RuleSet;

/// Outcome of one [`FtdcService::load`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Capture files found under the given paths
    pub files: usize,
    /// Server status samples new to the store
    pub samples_added: usize,
    pub total_samples: usize,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Loaded diagnostic data plus the tables used to judge it.
pub struct FtdcService {
    config: AnalyticsConfig,
    formulas: FormulaTable,
    rules: RuleSet,
    stats: RwLock<FtdcStats>,
}

impl FtdcService {
    /// Service with the default formula and rule tables.
    pub fn new(config: AnalyticsConfig) -> Self {
        Self::with_rules(config, FormulaTable::default(), RuleSet::default())
    }

    pub fn with_rules(config: AnalyticsConfig, formulas: FormulaTable, rules: RuleSet) -> Self {
        Self {
            config,
            formulas,
            rules,
            stats: RwLock::new(FtdcStats::default()),
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Read capture files and directories, merging them into the store.
    ///
    /// Samples at or before the stored last timestamp are ignored, so
    /// loading the same directory twice adds nothing.
    pub fn load<P: AsRef<Path>>(&self, paths: &[P]) -> Result<LoadSummary> {
        let started = Instant::now();
        let files = metrics_filenames(paths);
        debug!(files = files.len(), "capture files found");

        let data = read_diagnostic_files(&files, &self.config.reader)?;

        let mut stats = self.stats.write();
        let samples_added = stats.merge(data);
        let summary = LoadSummary {
            files: files.len(),
            samples_added,
            total_samples: stats.server_status.len(),
            time_range: stats.time_range().map(|(a, b)| (utc(a), utc(b))),
        };
        drop(stats);

        info!(
            files = summary.files,
            samples_added,
            total_samples = summary.total_samples,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diagnostic data loaded"
        );
        Ok(summary)
    }

    /// First and last sample times.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.stats
            .read()
            .time_range()
            .map(|(a, b)| (utc(a), utc(b)))
    }

    /// Targets that currently hold data.
    pub fn targets(&self) -> Vec<String> {
        let stats = self.stats.read();
        let mut targets: Vec<String> = server_status_legends()
            .chain(CPU_LEGENDS)
            .filter(|name| stats.series(name).map_or(false, |ts| !ts.is_empty()))
            .map(str::to_string)
            .collect();
        if !stats.disks.is_empty() {
            targets.extend(DISK_TARGETS.iter().map(|t| t.to_string()));
        }
        if !stats.replication.lags.is_empty() {
            targets.push(REPLICATION_TARGET.to_string());
        }
        targets
    }

    /// Series of `target` inside `[from, to]`, downsampled.
    ///
    /// Disk targets and `replication_lags` yield one series per disk or
    /// member, named after it. Other targets yield a single series with
    /// its family prefix stripped. Unknown targets yield nothing.
    pub fn series(&self, target: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<TimeSeries> {
        let (from_ms, to_ms) = (from.timestamp_millis(), to.timestamp_millis());
        let max_points = self.config.max_points;
        let stats = self.stats.read();

        if target == REPLICATION_TARGET {
            return stats
                .replication
                .hosts
                .iter()
                .filter_map(|host| stats.replication.lags.get(host))
                .map(|ts| ts.filter_range(from_ms, to_ms, max_points))
                .collect();
        }
        if DISK_TARGETS.contains(&target) {
            return stats
                .disks
                .values()
                .filter_map(|disk| disk.by_target(target))
                .map(|ts| ts.filter_range(from_ms, to_ms, max_points))
                .collect();
        }
        stats
            .series(target)
            .map(|ts| {
                let mut out = ts.filter_range(from_ms, to_ms, max_points);
                out.target = short_label(target).to_string();
                vec![out]
            })
            .unwrap_or_default()
    }

    /// Scored metrics of `[from, to]`.
    pub fn assessment(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AssessmentTable {
        let stats = self.stats.read();
        Assessment::new(&stats, &self.formulas).table(
            from.timestamp_millis(),
            to.timestamp_millis(),
            &self.config.assessment,
        )
    }

    /// Diagnosis over everything loaded. Empty store: empty report.
    pub fn diagnose(&self) -> DiagnosisReport {
        let stats = self.stats.read();
        match stats.time_range() {
            Some((from_ms, to_ms)) => self.report(&stats, from_ms, to_ms),
            None => DiagnosisReport::default(),
        }
    }

    pub fn diagnose_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> DiagnosisReport {
        let stats = self.stats.read();
        self.report(&stats, from.timestamp_millis(), to.timestamp_millis())
    }

    fn report(&self, stats: &FtdcStats, from_ms: i64, to_ms: i64) -> DiagnosisReport {
        let started = Instant::now();
        let report = Diagnosis::new(stats, from_ms, to_ms, &self.formulas, &self.config.anomaly)
            .into_report(&self.rules);
        info!(
            findings = report.results.len(),
            anomalies = report.anomalies.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "diagnosis complete"
        );
        report
    }

    /// Host and build description, one row per fact.
    pub fn host_info(&self) -> Vec<String> {
        let stats = self.stats.read();
        let info = &stats.server_info;
        let system = &info.host_info.system;
        let os = &info.host_info.os;

        let mut rows = vec![
            format!("MongoDB v{}", info.build_info.version),
            format!("CPU: {} cores ({})", system.num_cores, system.cpu_arch),
        ];
        if self.config.assessment.verbose {
            rows.push(format!("Host: {}", system.hostname));
        }
        rows.push(format!(
            "Memory: {}",
            format_storage_size((system.mem_size_mb as f64 * MB) as u64)
        ));
        rows.push(format!("{} ({})", os.os_type, os.version));
        rows.push(os.name.clone());
        rows
    }
}
