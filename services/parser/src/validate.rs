//! Dataset validation over canonical records.
//!
//! Four independent check families run concurrently on scoped threads:
//! region conformance, numeric sanity, cross-column consistency and
//! time-series continuity. Their issues are concatenated in that fixed order
//! so the report is deterministic. Data problems never fail validation; only
//! a record missing a metric slot does.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::columns::header_key;
use crate::error::SchemaError;
use crate::issue::{IssueCategory, RecordRef, Severity, ValidationIssue};
use crate::metric::{CanonicalMetric, MetricValue};
use crate::period::{PropertyType, ReportingPeriod};
use crate::record::CanonicalRecord;
use crate::schema::Schema;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub records: usize,
    pub errors: usize,
    pub warnings: usize,
    pub by_category: BTreeMap<IssueCategory, usize>,
    /// Unmapped header -> number of distinct tables it appeared in.
    pub unmapped_headers: BTreeMap<String, usize>,
    /// Unmapped headers frequent enough to suggest the mapping table is stale.
    pub stale_headers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub summary: ValidationSummary,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn from_issues(records: usize, issues: Vec<ValidationIssue>, stale_min_tables: usize) -> Self {
        let mut summary = ValidationSummary {
            records,
            ..ValidationSummary::default()
        };

        // Folded header -> (first raw spelling seen, tables it appeared in).
        let mut header_tables: BTreeMap<String, (String, BTreeSet<String>)> = BTreeMap::new();
        for issue in &issues {
            match issue.severity {
                Severity::Error => summary.errors += 1,
                Severity::Warning => summary.warnings += 1,
            }
            *summary.by_category.entry(issue.category).or_default() += 1;

            if issue.category == IssueCategory::UnmappedColumn {
                if let Some(raw) = &issue.raw {
                    let (_, tables) = header_tables
                        .entry(header_key(raw))
                        .or_insert_with(|| (raw.trim().to_string(), BTreeSet::new()));
                    tables.extend(issue.records.iter().map(|r| r.source_id.clone()));
                }
            }
        }

        summary.unmapped_headers = header_tables
            .into_values()
            .map(|(label, tables)| (label, tables.len()))
            .collect();
        summary.stale_headers = summary
            .unmapped_headers
            .iter()
            .filter(|(_, tables)| **tables >= stale_min_tables)
            .map(|(header, _)| header.clone())
            .collect();

        Self { summary, issues }
    }

    /// Put normalization findings ahead of validation findings and recount.
    pub fn with_normalization_issues(
        self,
        mut normalization: Vec<ValidationIssue>,
        stale_min_tables: usize,
    ) -> Self {
        normalization.extend(self.issues);
        Self::from_issues(self.summary.records, normalization, stale_min_tables)
    }

    pub fn has_errors(&self) -> bool {
        self.summary.errors > 0
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_error())
    }

    /// Human-readable report, listing at most `max_issues` issues (errors first).
    pub fn render_text(&self, max_issues: usize) -> String {
        let s = &self.summary;
        let mut out = String::new();
        let _ = writeln!(out, "Validation summary");
        let _ = writeln!(out, "  records:  {}", s.records);
        let _ = writeln!(out, "  errors:   {}", s.errors);
        let _ = writeln!(out, "  warnings: {}", s.warnings);
        if !s.by_category.is_empty() {
            let _ = writeln!(out, "  by category:");
            for (category, count) in &s.by_category {
                let _ = writeln!(out, "    {category:<24} {count}");
            }
        }
        if !s.stale_headers.is_empty() {
            let _ = writeln!(out, "  possibly stale header mappings:");
            for header in &s.stale_headers {
                let tables = s.unmapped_headers.get(header).copied().unwrap_or(0);
                let _ = writeln!(out, "    '{header}' unmapped in {tables} tables");
            }
        }

        if max_issues > 0 && !self.issues.is_empty() {
            let mut ordered: Vec<&ValidationIssue> = self.issues.iter().collect();
            ordered.sort_by_key(|i| std::cmp::Reverse(i.severity));
            let _ = writeln!(out, "Issues:");
            for issue in ordered.iter().take(max_issues) {
                let _ = writeln!(out, "  {issue}");
            }
            if self.issues.len() > max_issues {
                let _ = writeln!(out, "  ... {} more", self.issues.len() - max_issues);
            }
        }
        out
    }
}

pub fn validate(schema: &Schema, records: &[CanonicalRecord]) -> Result<ValidationResult, SchemaError> {
    Validator::new(schema).validate(records)
}

pub struct Validator<'a> {
    schema: &'a Schema,
}

impl<'a> Validator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn validate(&self, records: &[CanonicalRecord]) -> Result<ValidationResult, SchemaError> {
        for record in records {
            if let Some(missing) = CanonicalMetric::ALL
                .iter()
                .find(|m| !record.metrics.contains_key(*m))
            {
                return Err(SchemaError::IncompleteRecord(
                    record.reference().to_string(),
                    missing.to_string(),
                ));
            }
        }

        let families: [Vec<ValidationIssue>; 4] = std::thread::scope(|s| {
            let regions = s.spawn(|| self.check_regions(records));
            let ranges = s.spawn(|| self.check_ranges(records));
            let consistency = s.spawn(|| self.check_consistency(records));
            let continuity = s.spawn(|| self.check_continuity(records));
            [regions, ranges, consistency, continuity]
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
        });

        let issues: Vec<ValidationIssue> = families.into_iter().flatten().collect();
        let result = ValidationResult::from_issues(
            records.len(),
            issues,
            self.schema.policy().stale_header_min_tables,
        );
        tracing::info!(
            records = records.len(),
            errors = result.summary.errors,
            warnings = result.summary.warnings,
            "validation finished"
        );
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Region conformance
    // -------------------------------------------------------------------------

    fn check_regions(&self, records: &[CanonicalRecord]) -> Vec<ValidationIssue> {
        let hierarchy = self.schema.hierarchy();
        let root = &hierarchy.root().id;
        let mut issues = Vec::new();
        let mut present: BTreeMap<(ReportingPeriod, PropertyType), BTreeSet<&str>> = BTreeMap::new();

        for record in records {
            let slice = present.entry((record.period, record.property_type)).or_default();
            let Some(region) = &record.region else {
                issues.push(
                    ValidationIssue::error(IssueCategory::NullRegion, "record has no resolved region")
                        .with_record(record.reference()),
                );
                continue;
            };

            let Some(known) = hierarchy.get(&region.id) else {
                issues.push(
                    ValidationIssue::error(
                        IssueCategory::UnknownRegion,
                        format!("region id '{}' is not in the hierarchy", region.id),
                    )
                    .with_record(record.reference())
                    .with_raw(region.id.clone()),
                );
                continue;
            };
            slice.insert(known.id.as_str());

            let expected = hierarchy.path(&known.id).unwrap_or_default();
            let path_ok = record.hierarchy_path == expected
                && record.hierarchy_path.first().map_or(known.id == *root, |first| first == root);
            if known.parent != region.parent || !path_ok {
                issues.push(
                    ValidationIssue::error(
                        IssueCategory::BrokenHierarchy,
                        format!(
                            "path [{}] for '{}' does not lead to root '{root}' as [{}]",
                            record.hierarchy_path.join("/"),
                            region.id,
                            expected.join("/")
                        ),
                    )
                    .with_record(record.reference()),
                );
            }
        }

        let min_regions = self.schema.policy().min_regions;
        for ((period, property_type), regions) in &present {
            if regions.len() < min_regions {
                issues.push(
                    ValidationIssue::warning(
                        IssueCategory::TooFewRegions,
                        format!(
                            "only {} regions in {period} {property_type}, expected at least {min_regions}",
                            regions.len()
                        ),
                    )
                    .with_record(RecordRef {
                        period: *period,
                        property_type: *property_type,
                        region_id: None,
                        source_id: String::new(),
                        row: None,
                    }),
                );
            }
            for key in &self.schema.policy().key_regions {
                if !regions.contains(key.as_str()) {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::IncompleteCoverage,
                            format!("key region '{key}' missing from {period} {property_type}"),
                        )
                        .with_record(RecordRef {
                            period: *period,
                            property_type: *property_type,
                            region_id: Some(key.clone()),
                            source_id: String::new(),
                            row: None,
                        }),
                    );
                }
            }
        }
        issues
    }

    // -------------------------------------------------------------------------
    // Numeric sanity
    // -------------------------------------------------------------------------

    fn check_ranges(&self, records: &[CanonicalRecord]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        // (applicable, missing) cells per slice and metric
        let mut missing: BTreeMap<(ReportingPeriod, PropertyType, CanonicalMetric), (usize, usize)> =
            BTreeMap::new();
        for record in records {
            for (metric, value) in &record.metrics {
                if *value == MetricValue::NotApplicable {
                    continue;
                }
                let counts = missing
                    .entry((record.period, record.property_type, *metric))
                    .or_default();
                counts.0 += 1;
                if *value == MetricValue::NoData {
                    counts.1 += 1;
                }
            }
        }
        // A metric missing from every record has no column at all; normalization
        // already reports that as a missing expected metric.
        let max_ratio = self.schema.policy().max_missing_ratio;
        for ((period, property_type, metric), (applicable, absent)) in missing {
            if absent == 0 || absent == applicable {
                continue;
            }
            let ratio = absent as f64 / applicable as f64;
            if ratio > max_ratio {
                issues.push(
                    ValidationIssue::warning(
                        IssueCategory::HighMissingRate,
                        format!(
                            "{metric} missing in {absent} of {applicable} records ({:.1}%) for {period} {property_type}",
                            ratio * 100.0
                        ),
                    )
                    .with_record(RecordRef {
                        period,
                        property_type,
                        region_id: None,
                        source_id: String::new(),
                        row: None,
                    })
                    .with_metric(metric),
                );
            }
        }

        for record in records {
            for (metric, value) in &record.metrics {
                let Some(v) = value.value() else { continue };
                let (lo, hi) = self.schema.metric_spec(*metric).range;
                if v < lo || v > hi {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::OutOfRange,
                            format!("{metric} = {v} outside plausible range [{lo}, {hi}]"),
                        )
                        .with_record(record.reference())
                        .with_metric(*metric)
                        .with_raw(v.to_string()),
                    );
                }
            }
        }
        issues
    }

    // -------------------------------------------------------------------------
    // Cross-column consistency
    // -------------------------------------------------------------------------

    fn check_consistency(&self, records: &[CanonicalRecord]) -> Vec<ValidationIssue> {
        let tolerance = self.schema.policy().volume_tolerance;
        let mut issues = Vec::new();
        for record in records {
            let (Some(sales), Some(volume), Some(average)) = (
                record.value(CanonicalMetric::SalesCount),
                record.value(CanonicalMetric::DollarVolume),
                record.value(CanonicalMetric::AveragePrice),
            ) else {
                continue;
            };
            let implied = sales * average;
            if sales <= 0.0 || implied <= 0.0 {
                continue;
            }
            let deviation = (volume - implied).abs() / implied;
            if deviation > tolerance {
                issues.push(
                    ValidationIssue::warning(
                        IssueCategory::Inconsistent,
                        format!(
                            "dollar_volume {volume} differs from sales_count x average_price ({implied}) by {:.2}%",
                            deviation * 100.0
                        ),
                    )
                    .with_record(record.reference())
                    .with_metric(CanonicalMetric::DollarVolume),
                );
            }
        }
        issues
    }

    // -------------------------------------------------------------------------
    // Time-series continuity
    // -------------------------------------------------------------------------

    fn check_continuity(&self, records: &[CanonicalRecord]) -> Vec<ValidationIssue> {
        let policy = self.schema.policy();
        let columns = self.schema.columns();

        type SeriesKey<'r> = (&'r str, PropertyType, CanonicalMetric);
        let mut series: BTreeMap<SeriesKey<'_>, BTreeMap<ReportingPeriod, f64>> = BTreeMap::new();
        let mut sources: HashMap<(&str, PropertyType, ReportingPeriod), &CanonicalRecord> = HashMap::new();
        for record in records {
            let Some(region) = record.region_id() else { continue };
            sources
                .entry((region, record.property_type, record.period))
                .or_insert(record);
            for (metric, value) in &record.metrics {
                if let Some(v) = value.value() {
                    series
                        .entry((region, record.property_type, *metric))
                        .or_default()
                        .insert(record.period, v);
                }
            }
        }

        let mut issues = Vec::new();
        for ((region, property_type, metric), points) in &series {
            let (Some((&first, _)), Some((&last, _))) = (points.first_key_value(), points.last_key_value())
            else {
                continue;
            };

            let reference = |period: ReportingPeriod| {
                sources
                    .get(&(*region, *property_type, period))
                    .map(|r| r.reference())
                    .unwrap_or_else(|| RecordRef {
                        period,
                        property_type: *property_type,
                        region_id: Some(region.to_string()),
                        source_id: String::new(),
                        row: None,
                    })
            };

            // Gaps strictly inside the series' own span; leading and trailing
            // absence is censoring, not a gap.
            let mut run: Vec<ReportingPeriod> = Vec::new();
            let flush = |run: &mut Vec<ReportingPeriod>, issues: &mut Vec<ValidationIssue>| {
                if let (Some(start), Some(end)) = (run.first(), run.last()) {
                    let span = if start == end {
                        start.to_string()
                    } else {
                        format!("{start}..{end}")
                    };
                    let mut issue = ValidationIssue::warning(
                        IssueCategory::ContinuityGap,
                        format!("{metric} for {region} ({property_type}) missing {span}"),
                    )
                    .with_metric(*metric);
                    for period in run.iter() {
                        issue = issue.with_record(reference(*period));
                    }
                    issues.push(issue);
                }
                run.clear();
            };
            for period in first.through(last) {
                if points.contains_key(&period) || !columns.is_expected(*metric, period, *property_type) {
                    flush(&mut run, &mut issues);
                } else {
                    run.push(period);
                }
            }
            flush(&mut run, &mut issues);

            let observed: Vec<(&ReportingPeriod, &f64)> = points.iter().collect();
            for pair in observed.windows(2) {
                let (prev_period, prev) = pair[0];
                let (cur_period, cur) = pair[1];
                if *prev < policy.jump_min_base || *cur < policy.jump_min_base {
                    continue;
                }
                let factor = (cur / prev).max(prev / cur);
                if factor > policy.jump_multiplier {
                    issues.push(
                        ValidationIssue::warning(
                            IssueCategory::ImplausibleJump,
                            format!(
                                "{metric} for {region} ({property_type}) changed {factor:.1}x from {prev} ({prev_period}) to {cur} ({cur_period})"
                            ),
                        )
                        .with_record(reference(*prev_period))
                        .with_record(reference(*cur_period))
                        .with_metric(*metric),
                    );
                }
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::RegionLevel;

    fn p(s: &str) -> ReportingPeriod {
        s.parse().unwrap()
    }

    fn schema() -> Schema {
        Schema::default_schema().unwrap()
    }

    fn record(schema: &Schema, region: &str, period: &str, values: &[(CanonicalMetric, f64)]) -> CanonicalRecord {
        let hierarchy = schema.hierarchy();
        let identity = hierarchy.get(region).cloned();
        let mut metrics: BTreeMap<CanonicalMetric, MetricValue> = CanonicalMetric::ALL
            .into_iter()
            .map(|m| (m, MetricValue::NoData))
            .collect();
        for (metric, value) in values {
            metrics.insert(*metric, MetricValue::Value(*value));
        }
        CanonicalRecord {
            period: p(period),
            property_type: PropertyType::Detached,
            hierarchy_path: hierarchy.path(region).unwrap_or_default(),
            region_level: identity.as_ref().and(Some(RegionLevel::Municipality)),
            region: identity,
            metrics,
            source_id: format!("{period}.csv"),
            row: Some(0),
        }
    }

    fn categories(result: &ValidationResult, category: IssueCategory) -> Vec<&ValidationIssue> {
        result.issues.iter().filter(|i| i.category == category).collect()
    }

    // -------------------------------------------------------------------------
    // MALFORMED INPUT
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_metric_slot_fails_loudly() {
        let schema = schema();
        let mut r = record(&schema, "ajax", "2019-11", &[]);
        r.metrics.remove(&CanonicalMetric::AvgDom);
        let err = validate(&schema, &[r]).unwrap_err();
        assert!(matches!(err, SchemaError::IncompleteRecord(_, ref m) if m == "avg_dom"));
    }

    #[test]
    fn test_empty_dataset_is_clean() {
        let result = validate(&schema(), &[]).unwrap();
        assert_eq!(result.summary.records, 0);
        assert!(result.issues.is_empty());
        assert!(!result.has_errors());
    }

    // -------------------------------------------------------------------------
    // REGION CONFORMANCE
    // -------------------------------------------------------------------------

    #[test]
    fn test_null_region_is_error() {
        let schema = schema();
        let r = record(&schema, "nowhere", "2019-11", &[]);
        assert!(r.region.is_none());
        let result = validate(&schema, &[r]).unwrap();
        assert_eq!(categories(&result, IssueCategory::NullRegion).len(), 1);
        assert!(result.has_errors());
    }

    #[test]
    fn test_unknown_region_and_broken_path_are_errors() {
        let schema = schema();
        let mut unknown = record(&schema, "ajax", "2019-11", &[]);
        unknown.region = Some(crate::region::RegionIdentity {
            id: "hamilton".into(),
            name: "Hamilton".into(),
            parent: Some("trreb_total".into()),
        });

        let mut broken = record(&schema, "whitby", "2019-11", &[]);
        broken.hierarchy_path = vec!["durham_region".into()];

        let result = validate(&schema, &[unknown, broken]).unwrap();
        assert_eq!(categories(&result, IssueCategory::UnknownRegion).len(), 1);
        assert_eq!(categories(&result, IssueCategory::BrokenHierarchy).len(), 1);
        assert_eq!(result.summary.errors, 2);
    }

    #[test]
    fn test_key_region_coverage() {
        let schema = schema();
        let records: Vec<_> = ["trreb_total", "halton_region", "peel_region"]
            .iter()
            .map(|id| record(&schema, id, "2019-11", &[]))
            .collect();
        let result = validate(&schema, &records).unwrap();
        let coverage = categories(&result, IssueCategory::IncompleteCoverage);
        assert_eq!(coverage.len(), 1);
        assert_eq!(coverage[0].records[0].region_id.as_deref(), Some("city_of_toronto"));
        assert_eq!(coverage[0].severity, Severity::Warning);
    }

    #[test]
    fn test_too_few_regions_in_slice() {
        let schema = schema();
        let ids: Vec<String> = schema.hierarchy().iter().map(|r| r.id.clone()).collect();
        let mut records: Vec<_> = ids[..3]
            .iter()
            .map(|id| record(&schema, id, "2019-11", &[]))
            .collect();
        records.extend(ids[..15].iter().map(|id| record(&schema, id, "2019-12", &[])));

        let result = validate(&schema, &records).unwrap();
        let flagged = categories(&result, IssueCategory::TooFewRegions);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].records[0].period, p("2019-11"));
        assert_eq!(flagged[0].severity, Severity::Warning);
    }

    // -------------------------------------------------------------------------
    // NUMERIC SANITY / CONSISTENCY
    // -------------------------------------------------------------------------

    #[test]
    fn test_missing_rate_per_metric_and_slice() {
        use CanonicalMetric::*;
        let schema = schema();
        let ids: Vec<String> = schema.hierarchy().iter().map(|r| r.id.clone()).collect();
        let records: Vec<_> = ids[..20]
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let mut values = vec![(SalesCount, 10.0)];
                if i > 0 {
                    // one of twenty missing: exactly at the 5% limit
                    values.push((AveragePrice, 800_000.0));
                }
                if i > 1 {
                    values.push((DollarVolume, 8_000_000.0));
                }
                record(&schema, id, "2019-11", &values)
            })
            .collect();

        let result = validate(&schema, &records).unwrap();
        let flagged = categories(&result, IssueCategory::HighMissingRate);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].metric, Some(DollarVolume));
        assert!(flagged[0].description.contains("2 of 20"));
        assert_eq!(flagged[0].severity, Severity::Warning);
    }

    #[test]
    fn test_out_of_range_is_warning() {
        let schema = schema();
        let r = record(
            &schema,
            "ajax",
            "2019-11",
            &[(CanonicalMetric::AvgDom, 5000.0), (CanonicalMetric::AvgSpLp, 101.0)],
        );
        let result = validate(&schema, &[r]).unwrap();
        let flagged = categories(&result, IssueCategory::OutOfRange);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].metric, Some(CanonicalMetric::AvgDom));
        assert_eq!(flagged[0].severity, Severity::Warning);
    }

    #[test]
    fn test_dollar_volume_consistency() {
        use CanonicalMetric::*;
        let schema = schema();
        let ok = record(&schema, "ajax", "2019-11", &[(SalesCount, 10.0), (AveragePrice, 800_000.0), (DollarVolume, 8_010_000.0)]);
        let bad = record(&schema, "aurora", "2019-11", &[(SalesCount, 10.0), (AveragePrice, 800_000.0), (DollarVolume, 9_000_000.0)]);
        let zero = record(&schema, "brock", "2019-11", &[(SalesCount, 0.0), (AveragePrice, 800_000.0), (DollarVolume, 5.0)]);
        let partial = record(&schema, "oshawa", "2019-11", &[(SalesCount, 10.0), (DollarVolume, 5.0)]);
        let result = validate(&schema, &[ok, bad, zero, partial]).unwrap();
        let flagged = categories(&result, IssueCategory::Inconsistent);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].records[0].region_id.as_deref(), Some("aurora"));
    }

    // -------------------------------------------------------------------------
    // CONTINUITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_censored_ends_not_flagged() {
        let schema = schema();
        let sales = |n| [(CanonicalMetric::SalesCount, n)];
        let records = vec![
            record(&schema, "aurora", "2019-01", &sales(50.0)),
            record(&schema, "ajax", "2019-02", &sales(50.0)),
            record(&schema, "ajax", "2019-03", &sales(55.0)),
            record(&schema, "aurora", "2019-04", &sales(50.0)),
        ];
        let result = validate(&schema, &records).unwrap();
        let gaps: Vec<_> = categories(&result, IssueCategory::ContinuityGap)
            .into_iter()
            .filter(|i| i.description.contains("ajax"))
            .collect();
        assert!(gaps.is_empty());
    }

    #[test]
    fn test_interior_gap_flagged_once_per_run() {
        let schema = schema();
        let sales = |n| [(CanonicalMetric::SalesCount, n)];
        let records = vec![
            record(&schema, "ajax", "2019-01", &sales(50.0)),
            record(&schema, "ajax", "2019-04", &sales(52.0)),
            record(&schema, "ajax", "2019-05", &sales(51.0)),
            record(&schema, "ajax", "2019-07", &sales(49.0)),
        ];
        let result = validate(&schema, &records).unwrap();
        let gaps = categories(&result, IssueCategory::ContinuityGap);
        assert_eq!(gaps.len(), 2);
        assert!(gaps[0].description.contains("2019-02..2019-03"));
        assert_eq!(gaps[0].records.len(), 2);
        assert!(gaps[1].description.contains("2019-06"));
        assert!(gaps.iter().all(|g| g.severity == Severity::Warning));
    }

    #[test]
    fn test_gap_not_flagged_before_metric_exists() {
        let schema = schema();
        let mut early = record(&schema, "ajax", "2019-06", &[(CanonicalMetric::AvgPdom, 20.0)]);
        early.property_type = PropertyType::AllHomeTypes;
        let mut late = record(&schema, "ajax", "2020-02", &[(CanonicalMetric::AvgPdom, 22.0)]);
        late.property_type = PropertyType::AllHomeTypes;
        let result = validate(&schema, &[early, late]).unwrap();
        let gaps = categories(&result, IssueCategory::ContinuityGap);
        // Only 2020-01 is an expected period between the two observations.
        let pdom: Vec<_> = gaps
            .iter()
            .filter(|g| g.metric == Some(CanonicalMetric::AvgPdom))
            .collect();
        assert_eq!(pdom.len(), 1);
        assert!(pdom[0].description.ends_with("missing 2020-01"));
    }

    #[test]
    fn test_implausible_jump() {
        let schema = schema();
        let sales = |n| [(CanonicalMetric::SalesCount, n)];
        let records = vec![
            record(&schema, "ajax", "2019-01", &sales(100.0)),
            record(&schema, "ajax", "2019-02", &sales(900.0)),
            record(&schema, "ajax", "2019-03", &sales(850.0)),
            record(&schema, "brock", "2019-01", &sales(1.0)),
            record(&schema, "brock", "2019-02", &sales(9.0)),
        ];
        let result = validate(&schema, &records).unwrap();
        let jumps = categories(&result, IssueCategory::ImplausibleJump);
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0].records[1].period, p("2019-02"));
    }

    // -------------------------------------------------------------------------
    // REPORT
    // -------------------------------------------------------------------------

    #[test]
    fn test_summary_counts_and_stale_headers() {
        let unmapped = |source: &str| {
            ValidationIssue::warning(IssueCategory::UnmappedColumn, "unmapped")
                .with_raw("Price per Sq Ft")
                .with_record(RecordRef {
                    period: p("2019-11"),
                    property_type: PropertyType::Detached,
                    region_id: None,
                    source_id: source.into(),
                    row: None,
                })
        };
        let issues = vec![
            unmapped("a.csv"),
            unmapped("b.csv"),
            unmapped("b.csv"),
            unmapped("c.csv"),
            ValidationIssue::error(IssueCategory::NullRegion, "null"),
        ];
        let result = ValidationResult::from_issues(7, issues, 3);
        assert_eq!(result.summary.records, 7);
        assert_eq!(result.summary.errors, 1);
        assert_eq!(result.summary.warnings, 4);
        assert_eq!(result.summary.by_category[&IssueCategory::UnmappedColumn], 4);
        assert_eq!(result.summary.unmapped_headers["Price per Sq Ft"], 3);
        assert_eq!(result.summary.stale_headers, vec!["Price per Sq Ft".to_string()]);

        let text = result.render_text(2);
        assert!(text.contains("errors:   1"));
        assert!(text.contains("'Price per Sq Ft' unmapped in 3 tables"));
        assert!(text.contains("[ERROR] null_region"));
        assert!(text.contains("... 3 more"));
    }

    #[test]
    fn test_stale_headers_group_footnoted_spellings() {
        let unmapped = |raw: &str, source: &str| {
            ValidationIssue::warning(IssueCategory::UnmappedColumn, "unmapped")
                .with_raw(raw)
                .with_record(RecordRef {
                    period: p("2019-11"),
                    property_type: PropertyType::Detached,
                    region_id: None,
                    source_id: source.into(),
                    row: None,
                })
        };
        let issues = vec![
            unmapped("Price per Sq Ft", "a.csv"),
            unmapped("Price per Sq Ft1", "b.csv"),
            unmapped(" Price per Sq Ft 2", "c.csv"),
        ];
        let result = ValidationResult::from_issues(3, issues, 3);
        assert_eq!(result.summary.unmapped_headers.len(), 1);
        assert_eq!(result.summary.unmapped_headers["Price per Sq Ft"], 3);
        assert_eq!(result.summary.stale_headers, vec!["Price per Sq Ft".to_string()]);
    }

    #[test]
    fn test_normalization_issues_come_first() {
        let schema = schema();
        let r = record(&schema, "nowhere", "2019-11", &[]);
        let result = validate(&schema, &[r])
            .unwrap()
            .with_normalization_issues(
                vec![ValidationIssue::warning(IssueCategory::UnresolvedRegion, "unknown region name 'nowhere'")],
                3,
            );
        assert_eq!(result.issues[0].category, IssueCategory::UnresolvedRegion);
        assert_eq!(result.summary.errors, 1);
        assert_eq!(result.summary.warnings, result.issues.len() - 1);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let schema = schema();
        let records: Vec<_> = (1..=6)
            .map(|m| {
                record(
                    &schema,
                    if m % 2 == 0 { "ajax" } else { "whitby" },
                    &format!("2019-{m:02}"),
                    &[(CanonicalMetric::SalesCount, (m * 40) as f64)],
                )
            })
            .collect();
        let first = validate(&schema, &records).unwrap();
        let second = validate(&schema, &records).unwrap();
        assert_eq!(first, second);
    }
}
