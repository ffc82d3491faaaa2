//! Persisted artefacts: the canonical table and the validation report.
//!
//! The canonical table is the hand-off to economic integration and
//! forecasting: one row per record, date parts, hierarchy columns, then one
//! column per canonical metric. Empty cell = no data, `n/a` = not applicable.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LoadError;
use crate::metric::{CanonicalMetric, MetricValue};
use crate::period::{PropertyType, ReportingPeriod};
use crate::record::{CanonicalRecord, RowStats};
use crate::region::{RegionHierarchy, RegionIdentity, RegionLevel};
use crate::validate::ValidationResult;

pub const FIXED_COLUMNS: [&str; 11] = [
    "period_key",
    "year",
    "month",
    "quarter",
    "property_type",
    "region_id",
    "region",
    "parent_region_id",
    "region_level",
    "hierarchy_path",
    "source_id",
];

const NOT_APPLICABLE: &str = "n/a";

pub fn canonical_path(dir: &Path, property_type: PropertyType) -> PathBuf {
    dir.join(format!("normalized_{property_type}.csv"))
}

pub fn report_path(dir: &Path, property_type: PropertyType) -> PathBuf {
    dir.join(format!("validation_{property_type}.json"))
}

/// Canonical output order: period, then hierarchy order; unresolved regions last.
pub fn sort_records(records: &mut [CanonicalRecord], hierarchy: &RegionHierarchy) {
    records.sort_by_key(|r| {
        (
            r.period,
            r.property_type,
            r.region_id()
                .and_then(|id| hierarchy.order(id))
                .unwrap_or(usize::MAX),
            r.source_id.clone(),
            r.row,
        )
    });
}

fn format_value(value: Option<&MetricValue>) -> String {
    match value {
        Some(MetricValue::Value(v)) => v.to_string(),
        Some(MetricValue::NotApplicable) => NOT_APPLICABLE.to_string(),
        Some(MetricValue::NoData) | None => String::new(),
    }
}

pub fn write_canonical(path: &Path, records: &[CanonicalRecord]) -> Result<(), LoadError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
    }
    let mut writer = csv::Writer::from_path(path)?;

    let header: Vec<&str> = FIXED_COLUMNS
        .iter()
        .copied()
        .chain(CanonicalMetric::ALL.iter().map(|m| m.as_str()))
        .collect();
    writer.write_record(&header)?;

    for record in records {
        let region = record.region.as_ref();
        let mut row = vec![
            record.period_key(),
            record.year().to_string(),
            record.month().to_string(),
            record.quarter().to_string(),
            record.property_type.to_string(),
            region.map(|r| r.id.clone()).unwrap_or_default(),
            region.map(|r| r.name.clone()).unwrap_or_default(),
            region.and_then(|r| r.parent.clone()).unwrap_or_default(),
            record.region_level.map(|l| l.to_string()).unwrap_or_default(),
            record.hierarchy_path.join("/"),
            record.source_id.clone(),
        ];
        row.extend(CanonicalMetric::ALL.iter().map(|m| format_value(record.get(*m))));
        writer.write_record(&row)?;
    }
    writer.flush().map_err(|e| LoadError::io(path, e))?;

    tracing::info!(path = %path.display(), records = records.len(), "wrote canonical table");
    Ok(())
}

/// Read a canonical table back. A column that is neither fixed nor a known
/// metric is a schema error.
pub fn read_canonical(path: &Path) -> Result<Vec<CanonicalRecord>, LoadError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LoadError::MissingHeader(path.to_path_buf()))
    };
    let period_col = column("period_key")?;
    let type_col = column("property_type")?;
    let id_col = column("region_id")?;
    let name_col = column("region")?;
    let parent_col = column("parent_region_id")?;
    let level_col = column("region_level")?;
    let path_col = column("hierarchy_path")?;
    let source_col = column("source_id")?;

    let mut metric_cols = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if FIXED_COLUMNS.contains(&header) {
            continue;
        }
        metric_cols.push((header.parse::<CanonicalMetric>()?, i));
    }

    let malformed = |column: &str, value: &str| LoadError::MalformedValue {
        path: path.to_path_buf(),
        column: column.to_string(),
        value: value.to_string(),
    };

    let mut records = Vec::new();
    for (row_idx, row) in reader.records().enumerate() {
        let row = row?;
        let cell = |i: usize| row.get(i).unwrap_or("").trim();

        let period: ReportingPeriod = cell(period_col)
            .parse()
            .map_err(|_| malformed("period_key", cell(period_col)))?;
        let property_type: PropertyType = cell(type_col)
            .parse()
            .map_err(|_| malformed("property_type", cell(type_col)))?;

        let region = match cell(id_col) {
            "" => None,
            id => Some(RegionIdentity {
                id: id.to_string(),
                name: cell(name_col).to_string(),
                parent: Some(cell(parent_col))
                    .filter(|p| !p.is_empty())
                    .map(String::from),
            }),
        };
        let region_level = match cell(level_col) {
            "total" => Some(RegionLevel::Total),
            "region" => Some(RegionLevel::Region),
            "municipality" => Some(RegionLevel::Municipality),
            "" => None,
            other => return Err(malformed("region_level", other)),
        };
        let hierarchy_path = cell(path_col)
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        let mut metrics = BTreeMap::new();
        for (metric, i) in &metric_cols {
            let value = match cell(*i) {
                "" => MetricValue::NoData,
                NOT_APPLICABLE => MetricValue::NotApplicable,
                raw => MetricValue::Value(
                    raw.parse()
                        .map_err(|_| malformed(metric.as_str(), raw))?,
                ),
            };
            metrics.insert(*metric, value);
        }

        records.push(CanonicalRecord {
            period,
            property_type,
            region,
            region_level,
            hierarchy_path,
            metrics,
            source_id: cell(source_col).to_string(),
            row: Some(row_idx),
        });
    }

    tracing::info!(path = %path.display(), records = records.len(), "read canonical table");
    Ok(records)
}

/// Machine-readable validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub property_type: PropertyType,
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<RowStats>,
    #[serde(flatten)]
    pub result: ValidationResult,
}

impl ValidationReport {
    pub fn new(
        property_type: PropertyType,
        schema_version: &str,
        rows: Option<RowStats>,
        result: ValidationResult,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            property_type,
            schema_version: schema_version.to_string(),
            rows,
            result,
        }
    }

    pub fn write(&self, path: &Path) -> Result<(), LoadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
        }
        let file = std::fs::File::create(path).map_err(|e| LoadError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| LoadError::io(path, e.into()))?;
        writer.flush().map_err(|e| LoadError::io(path, e))?;
        tracing::info!(path = %path.display(), run_id = %self.run_id, "wrote validation report");
        Ok(())
    }
}
