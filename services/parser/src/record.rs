//! RawTable -> canonical records.
//!
//! Normalization is a pure function of the table and the shared schema. Every
//! data problem becomes a `ValidationIssue`; a bad row or cell never aborts
//! the table.
//!
//! Duplicate policy: within a table, first row wins. Across tables, outcomes
//! are merged in input order, so the result never depends on which worker
//! finished first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::columns::{header_key, HeaderMatch};
use crate::issue::{IssueCategory, RecordRef, ValidationIssue};
use crate::metric::{CanonicalMetric, MetricValue};
use crate::numeric::{is_placeholder, normalize};
use crate::period::{PropertyType, ReportingPeriod};
use crate::raw::RawTable;
use crate::region::{RegionIdentity, RegionLevel};
use crate::schema::Schema;

/// Uniqueness key: at most one record per (period, property type, region).
pub type RecordKey = (ReportingPeriod, PropertyType, String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub period: ReportingPeriod,
    pub property_type: PropertyType,
    /// `None` when the raw name could not be resolved.
    pub region: Option<RegionIdentity>,
    pub region_level: Option<RegionLevel>,
    /// Ancestor ids from the root down, excluding the region itself.
    pub hierarchy_path: Vec<String>,
    pub metrics: BTreeMap<CanonicalMetric, MetricValue>,
    pub source_id: String,
    pub row: Option<usize>,
}

impl CanonicalRecord {
    pub fn period_key(&self) -> String {
        self.period.key()
    }

    pub fn year(&self) -> i32 {
        self.period.year()
    }

    pub fn month(&self) -> u32 {
        self.period.month()
    }

    pub fn quarter(&self) -> u32 {
        self.period.quarter()
    }

    pub fn region_id(&self) -> Option<&str> {
        self.region.as_ref().map(|r| r.id.as_str())
    }

    pub fn key(&self) -> Option<RecordKey> {
        self.region
            .as_ref()
            .map(|r| (self.period, self.property_type, r.id.clone()))
    }

    pub fn get(&self, metric: CanonicalMetric) -> Option<&MetricValue> {
        self.metrics.get(&metric)
    }

    /// Numeric value of `metric`, if present.
    pub fn value(&self, metric: CanonicalMetric) -> Option<f64> {
        self.get(metric).and_then(MetricValue::value)
    }

    pub fn reference(&self) -> RecordRef {
        RecordRef {
            period: self.period,
            property_type: self.property_type,
            region_id: self.region_id().map(String::from),
            source_id: self.source_id.clone(),
            row: self.row,
        }
    }
}

/// Row reconciliation for one table or a batch:
/// `rows_in == records + duplicates + repeated_headers + blank_rows`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStats {
    pub rows_in: usize,
    pub records: usize,
    pub duplicates: usize,
    pub repeated_headers: usize,
    pub blank_rows: usize,
    pub unresolved_regions: usize,
    pub unmapped_columns: usize,
    pub numeric_failures: usize,
}

impl RowStats {
    pub fn add(&mut self, other: &RowStats) {
        self.rows_in += other.rows_in;
        self.records += other.records;
        self.duplicates += other.duplicates;
        self.repeated_headers += other.repeated_headers;
        self.blank_rows += other.blank_rows;
        self.unresolved_regions += other.unresolved_regions;
        self.unmapped_columns += other.unmapped_columns;
        self.numeric_failures += other.numeric_failures;
    }

    pub fn reconciles(&self) -> bool {
        self.rows_in == self.records + self.duplicates + self.repeated_headers + self.blank_rows
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub source_id: String,
    pub period: ReportingPeriod,
    pub property_type: PropertyType,
    pub records: Vec<CanonicalRecord>,
    pub issues: Vec<ValidationIssue>,
    pub stats: RowStats,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    pub issues: Vec<ValidationIssue>,
    pub stats: RowStats,
    pub tables: usize,
}

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    schema: Arc<Schema>,
}

impl RecordNormalizer {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn normalize_table(&self, table: &RawTable) -> TableOutcome {
        let schema = &*self.schema;
        let period = table.period;
        let table_ref = RecordRef {
            period,
            property_type: table.property_type,
            region_id: None,
            source_id: table.source_id.clone(),
            row: None,
        };

        let mut issues = Vec::new();
        let mut stats = RowStats {
            rows_in: table.rows.len(),
            ..RowStats::default()
        };

        let region_col = self.region_column(table);

        // ---------------------------------------------------------------------
        // Columns
        // ---------------------------------------------------------------------
        let mut columns: BTreeMap<CanonicalMetric, usize> = BTreeMap::new();
        for (col, header) in table.headers.iter().enumerate() {
            if col == region_col {
                continue;
            }
            match schema.columns().classify(header, period) {
                HeaderMatch::Mapped(metric) => {
                    if let Some(&first) = columns.get(&metric) {
                        issues.push(
                            ValidationIssue::warning(
                                IssueCategory::DuplicateColumn,
                                format!(
                                    "column '{header}' maps to {metric} already read from '{}'; keeping the first",
                                    table.headers[first]
                                ),
                            )
                            .with_record(table_ref.clone())
                            .with_metric(metric)
                            .with_raw(header.clone()),
                        );
                    } else {
                        columns.insert(metric, col);
                    }
                }
                HeaderMatch::OutOfPeriod(metric) => {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::MetricOutOfEra,
                            format!("column '{header}' looks like {metric}, which is not collected in {period}"),
                        )
                        .with_record(table_ref.clone())
                        .with_metric(metric)
                        .with_raw(header.clone()),
                    );
                }
                HeaderMatch::Unmapped => {
                    stats.unmapped_columns += 1;
                    if header_key(header).is_empty() {
                        tracing::debug!(source = %table.source_id, col, "skipping blank header column");
                        continue;
                    }
                    tracing::warn!(source = %table.source_id, header = %header, "unmapped column");
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::UnmappedColumn,
                            format!("column '{header}' has no canonical mapping"),
                        )
                        .with_record(table_ref.clone())
                        .with_raw(header.clone()),
                    );
                }
            }
        }

        let expected: HashSet<CanonicalMetric> = schema
            .columns()
            .expected_metrics(period, table.property_type)
            .into_iter()
            .collect();
        for metric in CanonicalMetric::ALL {
            if expected.contains(&metric) && !columns.contains_key(&metric) {
                issues.push(
                    ValidationIssue::warning(
                        IssueCategory::MissingExpectedMetric,
                        format!("{metric} is expected in {period} but no column maps to it"),
                    )
                    .with_record(table_ref.clone())
                    .with_metric(metric),
                );
            }
        }

        // ---------------------------------------------------------------------
        // Rows
        // ---------------------------------------------------------------------
        let mut records = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for (row_idx, row) in table.rows.iter().enumerate() {
            let row_ref = RecordRef {
                row: Some(row_idx),
                ..table_ref.clone()
            };

            if row.iter().all(|cell| cell.trim().is_empty()) {
                stats.blank_rows += 1;
                continue;
            }
            if is_repeated_header(&table.headers, row) {
                stats.repeated_headers += 1;
                issues.push(
                    ValidationIssue::warning(IssueCategory::RepeatedHeader, "repeated header row skipped")
                        .with_record(row_ref),
                );
                continue;
            }

            let raw_region = row.get(region_col).map(String::as_str).unwrap_or("");
            let (region, region_level, hierarchy_path) =
                match schema.regions().resolve(raw_region, period) {
                    Ok(resolution) => {
                        let id = &resolution.region.id;
                        (
                            Some(resolution.region.clone()),
                            schema.hierarchy().level(id),
                            schema.hierarchy().path(id).unwrap_or_default(),
                        )
                    }
                    Err(failure) => {
                        stats.unresolved_regions += 1;
                        issues.push(
                            ValidationIssue::warning(IssueCategory::UnresolvedRegion, failure.to_string())
                                .with_record(row_ref.clone())
                                .with_raw(raw_region),
                        );
                        (None, None, Vec::new())
                    }
                };

            if let Some(region) = &region {
                if let Some(&first) = seen.get(&region.id) {
                    stats.duplicates += 1;
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::DuplicateRecord,
                            format!(
                                "'{raw_region}' duplicates {} from row {}; keeping the first",
                                region.id,
                                first + 1
                            ),
                        )
                        .with_record(RecordRef {
                            region_id: Some(region.id.clone()),
                            row: Some(first),
                            ..table_ref.clone()
                        })
                        .with_record(RecordRef {
                            region_id: Some(region.id.clone()),
                            ..row_ref
                        }),
                    );
                    continue;
                }
                seen.insert(region.id.clone(), row_idx);
            }

            let record_ref = RecordRef {
                region_id: region.as_ref().map(|r| r.id.clone()),
                ..row_ref
            };
            let mut metrics = BTreeMap::new();
            for metric in CanonicalMetric::ALL {
                let is_expected = expected.contains(&metric);
                let cell = columns.get(&metric).and_then(|&col| row.get(col));
                let value = match cell {
                    Some(cell) if !is_placeholder(cell) => {
                        match normalize(cell, schema.kind_of(metric)) {
                            Ok(Some(v)) => MetricValue::Value(v),
                            Ok(None) => MetricValue::NoData,
                            Err(failure) => {
                                stats.numeric_failures += 1;
                                issues.push(
                                    ValidationIssue::warning(
                                        IssueCategory::NumericFailure,
                                        format!("{metric}: {failure}"),
                                    )
                                    .with_record(record_ref.clone())
                                    .with_metric(metric)
                                    .with_raw(cell.clone()),
                                );
                                MetricValue::NoData
                            }
                        }
                    }
                    _ if is_expected => MetricValue::NoData,
                    _ => MetricValue::NotApplicable,
                };
                metrics.insert(metric, value);
            }

            records.push(CanonicalRecord {
                period,
                property_type: table.property_type,
                region,
                region_level,
                hierarchy_path,
                metrics,
                source_id: table.source_id.clone(),
                row: Some(row_idx),
            });
        }

        stats.records = records.len();
        tracing::debug!(
            source = %table.source_id,
            period = %period,
            rows = stats.rows_in,
            records = stats.records,
            issues = issues.len(),
            "normalized table"
        );

        TableOutcome {
            source_id: table.source_id.clone(),
            period,
            property_type: table.property_type,
            records,
            issues,
            stats,
        }
    }

    /// Normalize tables in order on the current thread.
    pub fn normalize_batch(&self, tables: &[RawTable]) -> NormalizedBatch {
        merge_outcomes(tables.iter().map(|t| self.normalize_table(t)).enumerate().collect())
    }

    /// A named region header, else a blank header that carries data, else
    /// the first column.
    fn region_column(&self, table: &RawTable) -> usize {
        let wanted = self.schema.region_headers();
        let keys: Vec<String> = table.headers.iter().map(|h| header_key(h)).collect();
        if let Some(col) = keys
            .iter()
            .position(|k| !k.is_empty() && wanted.contains(k))
        {
            return col;
        }
        if wanted.iter().any(String::is_empty) {
            let blank_with_data = keys.iter().enumerate().position(|(col, k)| {
                k.is_empty()
                    && table
                        .rows
                        .iter()
                        .any(|row| row.get(col).is_some_and(|cell| !cell.trim().is_empty()))
            });
            if let Some(col) = blank_with_data {
                return col;
            }
        }
        0
    }
}

/// A data row whose non-empty cells all repeat their column header.
fn is_repeated_header(headers: &[String], row: &[String]) -> bool {
    let mut matched = 0;
    for (header, cell) in headers.iter().zip(row) {
        if cell.trim().is_empty() {
            continue;
        }
        if header_key(cell) != header_key(header) {
            return false;
        }
        matched += 1;
    }
    matched > 0
}

/// Combine per-table outcomes tagged with their input index.
///
/// Outcomes are ordered by index before merging, so cross-table duplicates are
/// resolved by (table index, row index) regardless of completion order.
pub fn merge_outcomes(mut outcomes: Vec<(usize, TableOutcome)>) -> NormalizedBatch {
    outcomes.sort_by_key(|(index, _)| *index);

    let mut batch = NormalizedBatch {
        tables: outcomes.len(),
        ..NormalizedBatch::default()
    };
    let mut seen: HashMap<RecordKey, RecordRef> = HashMap::new();
    let mut cross_duplicates = Vec::new();

    for (_, outcome) in outcomes {
        batch.stats.add(&outcome.stats);
        batch.issues.extend(outcome.issues);
        for record in outcome.records {
            if let Some(key) = record.key() {
                if let Some(first) = seen.get(&key) {
                    batch.stats.duplicates += 1;
                    batch.stats.records -= 1;
                    cross_duplicates.push(
                        ValidationIssue::warning(
                            IssueCategory::DuplicateRecord,
                            format!(
                                "{} already present from {}; keeping the first",
                                key.2, first.source_id
                            ),
                        )
                        .with_record(first.clone())
                        .with_record(record.reference()),
                    );
                    continue;
                }
                seen.insert(key, record.reference());
            }
            batch.records.push(record);
        }
    }
    batch.issues.extend(cross_duplicates);

    tracing::info!(
        tables = batch.tables,
        rows = batch.stats.rows_in,
        records = batch.stats.records,
        duplicates = batch.stats.duplicates,
        issues = batch.issues.len(),
        "merged normalization batch"
    );
    batch
}
