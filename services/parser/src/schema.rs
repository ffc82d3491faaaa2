//! The assembled, validated schema map.
//!
//! Built once from a `SchemaFile` and shared read-only by every normalizer
//! and validator in a run.

use std::collections::{BTreeMap, HashSet};

use crate::columns::{Availability, ColumnMapper};
use crate::config::{SchemaFile, ValidationPolicy, DEFAULT_SCHEMA};
use crate::era::Eras;
use crate::error::SchemaError;
use crate::metric::{CanonicalMetric, NumericKind};
use crate::period::{PropertyType, ReportingPeriod};
use crate::region::{RegionHierarchy, RegionResolver};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub kind: NumericKind,
    /// Inclusive plausible range.
    pub range: (f64, f64),
    pub availability: Availability,
}

#[derive(Debug, Clone)]
pub struct Schema {
    version: String,
    eras: Eras,
    region_headers: Vec<String>,
    regions: RegionResolver,
    columns: ColumnMapper,
    metrics: BTreeMap<CanonicalMetric, MetricSpec>,
    policy: ValidationPolicy,
}

impl Schema {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_json::from_str(json)?;
        Self::from_file(file)
    }

    pub fn default_schema() -> Result<Self, SchemaError> {
        Self::from_json(DEFAULT_SCHEMA)
    }

    pub fn from_file(file: SchemaFile) -> Result<Self, SchemaError> {
        let eras = Eras::build(&file.eras)?;

        let mut metrics = BTreeMap::new();
        for def in &file.metrics {
            let (lo, hi) = def.range;
            if !(lo <= hi) {
                return Err(SchemaError::InvalidRange(def.metric.to_string()));
            }
            let spec = MetricSpec {
                kind: def.kind,
                range: def.range,
                availability: Availability::from_def(def),
            };
            if metrics.insert(def.metric, spec).is_some() {
                return Err(SchemaError::DuplicateMetric(def.metric.to_string()));
            }
        }
        if let Some(missing) = CanonicalMetric::ALL.iter().find(|m| !metrics.contains_key(*m)) {
            return Err(SchemaError::MissingMetric(missing.to_string()));
        }

        let hierarchy = RegionHierarchy::build(&file.regions)?;
        if let Some(unknown) = file.policy.key_regions.iter().find(|id| !hierarchy.contains(id)) {
            return Err(SchemaError::UnknownRegion(unknown.clone()));
        }

        let regions = RegionResolver::build(
            hierarchy,
            eras.clone(),
            &file.region_era_names,
            &file.region_variants,
            file.policy.fuzzy_threshold,
            file.policy.near_miss_margin,
        )?;

        let availability = metrics
            .iter()
            .map(|(metric, spec)| (*metric, spec.availability.clone()))
            .collect();
        let columns = ColumnMapper::build(eras.clone(), &file.headers, availability)?;

        let mut seen = HashSet::new();
        let region_headers = file
            .region_headers
            .iter()
            .map(|h| crate::columns::header_key(h))
            .filter(|h| seen.insert(h.clone()))
            .collect();

        tracing::debug!(
            version = %file.version,
            eras = eras.len(),
            regions = regions.hierarchy().len(),
            "schema loaded"
        );

        Ok(Self {
            version: file.version,
            eras,
            region_headers,
            regions,
            columns,
            metrics,
            policy: file.policy,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn eras(&self) -> &Eras {
        &self.eras
    }

    pub fn regions(&self) -> &RegionResolver {
        &self.regions
    }

    pub fn hierarchy(&self) -> &RegionHierarchy {
        self.regions.hierarchy()
    }

    pub fn columns(&self) -> &ColumnMapper {
        &self.columns
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Folded header keys that identify the region column.
    pub fn region_headers(&self) -> &[String] {
        &self.region_headers
    }

    pub fn metric_spec(&self, metric: CanonicalMetric) -> &MetricSpec {
        // Every metric is present once `from_file` succeeds.
        &self.metrics[&metric]
    }

    pub fn kind_of(&self, metric: CanonicalMetric) -> NumericKind {
        self.metric_spec(metric).kind
    }

    pub fn is_expected(
        &self,
        metric: CanonicalMetric,
        period: ReportingPeriod,
        property_type: PropertyType,
    ) -> bool {
        self.columns.is_expected(metric, period, property_type)
    }
}
