//! Configuration consumed by the pipeline.
//!
//! Two layers:
//! - `SchemaFile`: the era tables, region hierarchy, metric specs and
//!   validation policy, deserialized from `config/schema.json`. These are data,
//!   updated without touching the algorithms.
//! - `PipelineConfig`: directories and worker limits, read from the
//!   environment (`.env` supported).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::LoadError;
use crate::metric::{CanonicalMetric, NumericKind};
use crate::period::{PropertyType, ReportingPeriod};
use crate::schema::Schema;

/// Schema shipped with the crate; `SCHEMA_PATH` overrides it at runtime.
pub const DEFAULT_SCHEMA: &str = include_str!("../../../config/schema.json");

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile {
    pub version: String,
    pub eras: Vec<EraDef>,
    #[serde(default = "default_region_headers")]
    pub region_headers: Vec<String>,
    pub regions: Vec<RegionDef>,
    #[serde(default)]
    pub region_era_names: Vec<EraNamesDef>,
    #[serde(default)]
    pub region_variants: BTreeMap<String, String>,
    pub metrics: Vec<MetricDef>,
    pub headers: Vec<HeaderDef>,
    #[serde(default)]
    pub policy: ValidationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EraDef {
    pub id: String,
    pub starts: ReportingPeriod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

/// Spellings that are canonical within specific eras.
#[derive(Debug, Clone, Deserialize)]
pub struct EraNamesDef {
    pub eras: Vec<String>,
    pub names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricDef {
    pub metric: CanonicalMetric,
    pub kind: NumericKind,
    pub range: (f64, f64),
    #[serde(default)]
    pub available_from: Option<ReportingPeriod>,
    #[serde(default)]
    pub available_until: Option<ReportingPeriod>,
    /// `None` means every property type.
    #[serde(default)]
    pub property_types: Option<Vec<PropertyType>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderDef {
    pub metric: CanonicalMetric,
    /// `None` means every era.
    #[serde(default)]
    pub eras: Option<Vec<String>>,
    pub spellings: Vec<String>,
}

/// Tunable thresholds for resolution and validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Minimum Jaro-Winkler similarity for a fuzzy region match.
    pub fuzzy_threshold: f64,
    /// Candidates this close below the threshold are logged for curation.
    pub near_miss_margin: f64,
    /// Relative tolerance for dollar volume vs sales x average price.
    pub volume_tolerance: f64,
    /// Period-over-period change factor flagged as implausible.
    pub jump_multiplier: f64,
    /// Jumps are only evaluated when both values reach this magnitude.
    pub jump_min_base: f64,
    /// Unmapped headers seen in at least this many tables are reported as stale.
    pub stale_header_min_tables: usize,
    pub key_regions: Vec<String>,
    /// Fewer distinct regions than this in one table slice suggests a
    /// truncated extraction.
    pub min_regions: usize,
    /// Share of applicable cells allowed to be missing per metric and slice.
    pub max_missing_ratio: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.92,
            near_miss_margin: 0.05,
            volume_tolerance: 0.005,
            jump_multiplier: 5.0,
            jump_min_base: 10.0,
            stale_header_min_tables: 3,
            key_regions: Vec::new(),
            min_regions: 15,
            max_missing_ratio: 0.05,
        }
    }
}

fn default_region_headers() -> Vec<String> {
    vec!["Region".to_string(), String::new()]
}

/// Load the schema from `path`, or the embedded default when `None`.
pub fn load_schema(path: Option<&Path>) -> Result<Schema, LoadError> {
    match path {
        Some(path) => {
            let content =
                std::fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
            tracing::info!(path = %path.display(), "loading schema");
            Ok(Schema::from_json(&content)?)
        }
        None => Ok(Schema::from_json(DEFAULT_SCHEMA)?),
    }
}

/// Directories and limits for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub extracted_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub economic_dir: PathBuf,
    pub schema_path: Option<PathBuf>,
    /// Reports before this period were extracted with the table library,
    /// later ones with the AI API.
    pub extraction_cutoff: ReportingPeriod,
    pub max_workers: usize,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, LoadError> {
        let var = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.to_string());

        let extraction_cutoff = var("EXTRACTION_CUTOFF", "2020-01").parse()?;
        let max_workers = std::env::var("MAX_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });

        Ok(Self {
            extracted_dir: PathBuf::from(var("EXTRACTED_DIR", "./data/extracted")),
            processed_dir: PathBuf::from(var("PROCESSED_DIR", "./data/processed")),
            economic_dir: PathBuf::from(var("ECONOMIC_DIR", "./data/economic")),
            schema_path: std::env::var("SCHEMA_PATH").ok().map(PathBuf::from),
            extraction_cutoff,
            max_workers,
        })
    }
}
