// FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FTDC Analytics - Assessment and diagnosis of MongoDB diagnostic data
//!
//! Judges the series decoded by the `ftdc` crate: percentile scoring of
//! every metric, a rule-based diagnosis of common problem patterns, and an
//! anomaly timeline for correlating with slow query logs.
//!
//! ## Features
//!
//! - **Assessment**: p5/median/p95 per metric, scored 0-100 against ranges
//! - **Diagnosis**: ten default rules, replaceable with your own
//! - **Anomaly timeline**: sustained threshold crossings with their peaks
//! - **Service**: a shared store that loads files and answers range queries
//!
//! ## Quick Start
//!
//! ```rust
//! use ftdc::{FtdcStats, TimeSeries};
//! use ftdc_analytics::{AnomalyConfig, Diagnosis, FormulaTable, RuleSet};
//!
//! let mut stats = FtdcStats::default();
//! let mut idle = TimeSeries::new("cpu_idle");
//! for t in 0..60 {
//!     idle.push(10.0, t * 1000);
//! }
//! stats.series.insert("cpu_idle".to_string(), idle);
//!
//! let report = Diagnosis::new(&stats, 0, 59_000, &FormulaTable::default(), &AnomalyConfig::default())
//!     .into_report(&RuleSet::default());
//!
//! assert_eq!(report.results[0].name, "CPU Saturation");
//! assert_eq!(report.anomalies[0].metric, "cpu_idle");
//! println!("{}", report);
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! capture files ──► ftdc::FtdcStats ──► Assessment ──► AssessmentTable
//!                         │                  │
//!                         │                  ▼
//!                         │              Diagnosis ──► DiagnosisReport
//!                         │                  ▲
//!                         └── anomaly scan ──┘
//! ```

pub mod anomaly;
pub mod assessment;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod event;
pub mod formula;
pub mod report;
pub mod rules;
pub mod service;
pub mod summary;

// Public API
pub use anomaly::{collect_anomalies, default_thresholds, AnomalyThreshold, Direction};
pub use assessment::{Assessment, AssessmentTable, MetricScore};
pub use config::{AnalyticsConfig, AnomalyConfig, AssessmentConfig};
pub use diagnosis::{Diagnosis, DiagnosisReport, DiagnosisResult, DiskScores};
pub use error::{AnalyticsError, Result};
pub use event::{AnomalyEvent, Severity, TimeRange};
pub use formula::{score_by_range, FormulaTable, Percentiles, ScoreRange, NOT_EVALUATED};
pub use rules::{default_rules, DiagnosisRule, RuleSet};
pub use service::{FtdcService, LoadSummary};
pub use summary::ActivitySummary;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
