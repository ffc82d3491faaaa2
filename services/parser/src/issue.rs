//! Findings produced by normalization and validation.
//!
//! Issues are a report, not a correction: nothing downstream mutates records
//! based on them, and they are regenerated on every run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metric::CanonicalMetric;
use crate::period::{PropertyType, ReportingPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    // normalization
    UnresolvedRegion,
    UnmappedColumn,
    MetricOutOfEra,
    MissingExpectedMetric,
    DuplicateColumn,
    NumericFailure,
    DuplicateRecord,
    RepeatedHeader,
    // region conformance
    NullRegion,
    UnknownRegion,
    BrokenHierarchy,
    IncompleteCoverage,
    TooFewRegions,
    // numeric sanity
    OutOfRange,
    HighMissingRate,
    // cross-column consistency
    Inconsistent,
    // time-series continuity
    ContinuityGap,
    ImplausibleJump,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCategory::UnresolvedRegion => "unresolved_region",
            IssueCategory::UnmappedColumn => "unmapped_column",
            IssueCategory::MetricOutOfEra => "metric_out_of_era",
            IssueCategory::MissingExpectedMetric => "missing_expected_metric",
            IssueCategory::DuplicateColumn => "duplicate_column",
            IssueCategory::NumericFailure => "numeric_failure",
            IssueCategory::DuplicateRecord => "duplicate_record",
            IssueCategory::RepeatedHeader => "repeated_header",
            IssueCategory::NullRegion => "null_region",
            IssueCategory::UnknownRegion => "unknown_region",
            IssueCategory::BrokenHierarchy => "broken_hierarchy",
            IssueCategory::IncompleteCoverage => "incomplete_coverage",
            IssueCategory::TooFewRegions => "too_few_regions",
            IssueCategory::OutOfRange => "out_of_range",
            IssueCategory::HighMissingRate => "high_missing_rate",
            IssueCategory::Inconsistent => "inconsistent",
            IssueCategory::ContinuityGap => "continuity_gap",
            IssueCategory::ImplausibleJump => "implausible_jump",
        }
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points at a canonical record, or at the raw row it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub period: ReportingPeriod,
    pub property_type: PropertyType,
    pub region_id: Option<String>,
    pub source_id: String,
    /// Zero-based data row within the source table.
    pub row: Option<usize>,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.period,
            self.property_type,
            self.region_id.as_deref().unwrap_or("<null>")
        )?;
        match self.row {
            Some(row) => write!(f, " ({} row {})", self.source_id, row + 1),
            None if !self.source_id.is_empty() => write!(f, " ({})", self.source_id),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub category: IssueCategory,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RecordRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<CanonicalMetric>,
    /// Offending raw text (header, cell, region name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    pub description: String,
}

impl ValidationIssue {
    pub fn new(severity: Severity, category: IssueCategory, description: impl Into<String>) -> Self {
        Self {
            severity,
            category,
            records: Vec::new(),
            metric: None,
            raw: None,
            description: description.into(),
        }
    }

    pub fn warning(category: IssueCategory, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, category, description)
    }

    pub fn error(category: IssueCategory, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, category, description)
    }

    pub fn with_record(mut self, record: RecordRef) -> Self {
        self.records.push(record);
        self
    }

    pub fn with_metric(mut self, metric: CanonicalMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "WARN ",
            Severity::Error => "ERROR",
        };
        write!(f, "[{level}] {}: {}", self.category, self.description)?;
        if let Some(first) = self.records.first() {
            write!(f, " @ {first}")?;
            if self.records.len() > 1 {
                write!(f, " (+{} more)", self.records.len() - 1)?;
            }
        }
        Ok(())
    }
}
