//! TRREB market report normalization and validation.
//!
//! Extracted report tables (`RawTable`) from every report era are reconciled
//! into one longitudinal dataset of `CanonicalRecord`s:
//! - region names resolve to period-invariant identities in a fixed hierarchy
//! - column headers map to canonical metrics through per-era tables
//! - cells normalize by the metric's numeric kind
//!
//! The resulting dataset is then validated (`validate`) and every finding is
//! reported as a `ValidationIssue`. Era tables, region variants and policy
//! thresholds are data (`config/schema.json`), not code.

pub mod columns;
pub mod config;
pub mod economic;
pub mod era;
pub mod error;
pub mod issue;
pub mod metric;
pub mod numeric;
pub mod output;
pub mod period;
pub mod raw;
pub mod record;
pub mod region;
pub mod schema;
pub mod validate;

pub use columns::{header_key, ColumnMapper, HeaderMatch};
pub use config::{load_schema, PipelineConfig, ValidationPolicy};
pub use economic::{IndicatorCache, IndicatorTable};
pub use error::{LoadError, SchemaError};
pub use issue::{IssueCategory, RecordRef, Severity, ValidationIssue};
pub use metric::{CanonicalMetric, MetricValue, NumericKind};
pub use numeric::{normalize, FailureReason, NormalizationFailure};
pub use period::{PropertyType, ReportingPeriod};
pub use raw::{ExtractionMethod, RawTable};
pub use record::{merge_outcomes, CanonicalRecord, NormalizedBatch, RecordNormalizer, RowStats, TableOutcome};
pub use region::{RegionHierarchy, RegionIdentity, RegionLevel, RegionResolver, ResolutionFailure};
pub use schema::Schema;
pub use validate::{validate, ValidationResult, ValidationSummary, Validator};
