//! Parser Service - Normalizes extracted TRREB tables and validates the result
//!
//! Responsibilities:
//! - Load extracted report tables per property type
//! - Normalize them concurrently into canonical records
//! - Persist the canonical table and the validation report
//! - Join economic indicators onto the canonical table
//!
//! Usage:
//!   cargo run --bin parser -- normalize --type all
//!   cargo run --bin parser -- normalize --type detached --date 2019-11 --fail-on-error
//!   cargo run --bin parser -- validate --type all_home_types
//!   cargo run --bin parser -- integrate --type all --lags 1,3,6,12

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use trreb_parser::config::{load_schema, PipelineConfig};
use trreb_parser::economic::{integrate, integrated_path, IndicatorCache, DEFAULT_LAGS};
use trreb_parser::output::{
    canonical_path, read_canonical, report_path, sort_records, write_canonical, ValidationReport,
};
use trreb_parser::raw::{load_tables, RawTable};
use trreb_parser::record::{merge_outcomes, NormalizedBatch, RecordNormalizer, TableOutcome};
use trreb_parser::validate::validate;
use trreb_parser::{PropertyType, ReportingPeriod, Schema};

/// Issues listed in the printed summary; the JSON report carries all of them.
const PRINTED_ISSUES: usize = 25;

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Normalizes and validates extracted TRREB market tables")]
struct Args {
    /// Schema file (defaults to SCHEMA_PATH, then the embedded schema)
    #[arg(long, global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize extracted tables into the canonical table and validate it
    Normalize {
        /// all_home_types, detached or all
        #[arg(long = "type", value_parser = parse_types)]
        property_types: TypeSelection,

        /// Only normalize this reporting period (YYYY-MM)
        #[arg(long)]
        date: Option<ReportingPeriod>,

        /// Exit non-zero when validation reports errors
        #[arg(long, default_value = "false")]
        fail_on_error: bool,
    },
    /// Re-validate a persisted canonical table
    Validate {
        #[arg(long = "type", value_parser = parse_types)]
        property_types: TypeSelection,

        #[arg(long, default_value = "false")]
        fail_on_error: bool,
    },
    /// Join economic indicators onto the canonical table
    Integrate {
        #[arg(long = "type", value_parser = parse_types)]
        property_types: TypeSelection,

        /// Skip lag features
        #[arg(long, default_value = "false")]
        no_lags: bool,

        /// Lags in months (comma separated)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        lags: Vec<i32>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct TypeSelection(Vec<PropertyType>);

fn parse_types(s: &str) -> Result<TypeSelection, String> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(TypeSelection(PropertyType::ALL.to_vec()));
    }
    s.parse::<PropertyType>()
        .map(|t| TypeSelection(vec![t]))
        .map_err(|e| e.to_string())
}

fn resolve_lags(no_lags: bool, lags: &[i32]) -> Vec<i32> {
    if no_lags {
        Vec::new()
    } else if lags.is_empty() {
        DEFAULT_LAGS.to_vec()
    } else {
        lags.to_vec()
    }
}

/// Output paths for a run; single-period runs never overwrite the full table.
fn run_paths(dir: &Path, property_type: PropertyType, date: Option<ReportingPeriod>) -> (PathBuf, PathBuf) {
    match date {
        None => (canonical_path(dir, property_type), report_path(dir, property_type)),
        Some(period) => (
            dir.join(format!("normalized_{property_type}_{period}.csv")),
            dir.join(format!("validation_{property_type}_{period}.json")),
        ),
    }
}

/// Normalize tables on blocking workers, at most `max_workers` at a time.
async fn normalize_parallel(
    normalizer: &RecordNormalizer,
    tables: Vec<RawTable>,
    max_workers: usize,
) -> Result<NormalizedBatch> {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(tables.len());

    for (index, table) in tables.into_iter().enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;
        let normalizer = normalizer.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            (index, normalizer.normalize_table(&table))
        }));
    }

    let mut outcomes: Vec<(usize, TableOutcome)> = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.context("Normalization worker panicked")?);
    }
    Ok(merge_outcomes(outcomes))
}

async fn run_normalize(
    config: &PipelineConfig,
    schema: Arc<Schema>,
    property_type: PropertyType,
    date: Option<ReportingPeriod>,
) -> Result<usize> {
    println!("\n--- {} ---", property_type);

    let tables = load_tables(&config.extracted_dir, property_type, config.extraction_cutoff, date)
        .with_context(|| format!("Failed to load extracted tables for {property_type}"))?;
    if tables.is_empty() {
        println!("No extracted tables found in {}", config.extracted_dir.display());
        return Ok(0);
    }
    println!("Tables: {}", tables.len());

    let normalizer = RecordNormalizer::new(schema.clone());
    let mut batch = normalize_parallel(&normalizer, tables, config.max_workers).await?;

    let stats = batch.stats;
    if !stats.reconciles() {
        tracing::warn!(?stats, "row counts do not reconcile");
    }
    println!(
        "Rows: {} in, {} records, {} duplicates, {} repeated headers, {} blank",
        stats.rows_in, stats.records, stats.duplicates, stats.repeated_headers, stats.blank_rows
    );

    sort_records(&mut batch.records, schema.hierarchy());
    let (canonical, report) = run_paths(&config.processed_dir, property_type, date);
    write_canonical(&canonical, &batch.records)
        .with_context(|| format!("Failed to write {}", canonical.display()))?;
    println!("Canonical table: {}", canonical.display());

    let stale_min = schema.policy().stale_header_min_tables;
    let result = validate(&schema, &batch.records)
        .context("Canonical records are malformed")?
        .with_normalization_issues(batch.issues, stale_min);
    print!("{}", result.render_text(PRINTED_ISSUES));

    let errors = result.summary.errors;
    ValidationReport::new(property_type, schema.version(), Some(stats), result)
        .write(&report)
        .with_context(|| format!("Failed to write {}", report.display()))?;
    println!("Report: {}", report.display());

    Ok(errors)
}

fn run_validate(config: &PipelineConfig, schema: &Schema, property_type: PropertyType) -> Result<usize> {
    println!("\n--- {} ---", property_type);

    let canonical = canonical_path(&config.processed_dir, property_type);
    let records = read_canonical(&canonical)
        .with_context(|| format!("Failed to read {}", canonical.display()))?;
    let result = validate(schema, &records).context("Canonical records are malformed")?;
    print!("{}", result.render_text(PRINTED_ISSUES));

    let errors = result.summary.errors;
    let report = report_path(&config.processed_dir, property_type);
    ValidationReport::new(property_type, schema.version(), None, result)
        .write(&report)
        .with_context(|| format!("Failed to write {}", report.display()))?;
    println!("Report: {}", report.display());

    Ok(errors)
}

fn run_integrate(config: &PipelineConfig, property_types: &[PropertyType], lags: &[i32]) -> Result<()> {
    let cache = IndicatorCache::new(&config.economic_dir, false);
    let master = cache.master().context("Failed to build master indicator table")?;
    if master.is_empty() {
        anyhow::bail!(
            "No cached indicators in {}; run `collector indicators` first",
            config.economic_dir.display()
        );
    }
    let indicators = if lags.is_empty() { master } else { master.with_lags(lags) };
    println!(
        "Indicators: {} columns over {} months",
        indicators.columns().len(),
        indicators.len()
    );

    for &property_type in property_types {
        let canonical = canonical_path(&config.processed_dir, property_type);
        let out = integrated_path(&config.processed_dir, property_type);
        let rows = integrate(&canonical, &indicators, &out)
            .with_context(|| format!("Failed to integrate {}", canonical.display()))?;
        println!("  {}: {} rows -> {}", property_type, rows, out.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    if args.schema.is_some() {
        config.schema_path = args.schema.clone();
    }

    let schema = Arc::new(load_schema(config.schema_path.as_deref()).context("Failed to load schema")?);

    println!("=== TRREB Parser ===");
    println!("Schema version: {}", schema.version());

    match args.command {
        Command::Normalize { property_types, date, fail_on_error } => {
            println!("Extracted: {}", config.extracted_dir.display());
            println!("Workers: {}", config.max_workers);
            if let Some(period) = date {
                println!("Period: {}", period);
            }

            let mut errors = 0;
            for property_type in property_types.0 {
                errors += run_normalize(&config, schema.clone(), property_type, date).await?;
            }

            println!("\n=== Normalization Complete ===");
            println!("Validation errors: {}", errors);
            if fail_on_error && errors > 0 {
                anyhow::bail!("Validation reported {} error(s)", errors);
            }
        }
        Command::Validate { property_types, fail_on_error } => {
            let mut errors = 0;
            for property_type in property_types.0 {
                errors += run_validate(&config, &schema, property_type)?;
            }

            println!("\n=== Validation Complete ===");
            println!("Validation errors: {}", errors);
            if fail_on_error && errors > 0 {
                anyhow::bail!("Validation reported {} error(s)", errors);
            }
        }
        Command::Integrate { property_types, no_lags, lags } => {
            let lags = resolve_lags(no_lags, &lags);
            run_integrate(&config, &property_types.0, &lags)?;
            println!("\n=== Integration Complete ===");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // ARGUMENT PARSING
    // -------------------------------------------------------------------------

    #[test]
    fn test_type_all_expands_to_both_tables() {
        let TypeSelection(types) = parse_types("all").unwrap();
        assert_eq!(types, vec![PropertyType::AllHomeTypes, PropertyType::Detached]);
    }

    #[test]
    fn test_type_single() {
        assert_eq!(parse_types("detached").unwrap().0, vec![PropertyType::Detached]);
        assert_eq!(
            parse_types("all_home_types").unwrap().0,
            vec![PropertyType::AllHomeTypes]
        );
        assert!(parse_types("condo").is_err());
    }

    #[test]
    fn test_normalize_command_parses() {
        let args = Args::try_parse_from([
            "parser", "normalize", "--type", "detached", "--date", "2019-11", "--fail-on-error",
        ])
        .unwrap();
        match args.command {
            Command::Normalize { property_types, date, fail_on_error } => {
                assert_eq!(property_types.0, vec![PropertyType::Detached]);
                assert_eq!(date, Some(ReportingPeriod::new(2019, 11).unwrap()));
                assert!(fail_on_error);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_lags_list_parses() {
        let args = Args::try_parse_from(["parser", "integrate", "--type", "all", "--lags", "1,2"]).unwrap();
        match args.command {
            Command::Integrate { lags, no_lags, .. } => {
                assert_eq!(resolve_lags(no_lags, &lags), vec![1, 2]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_lags_default_and_disabled() {
        assert_eq!(resolve_lags(false, &[]), vec![1, 3, 6, 12]);
        assert!(resolve_lags(true, &[1, 3]).is_empty());
    }

    #[test]
    fn test_single_period_paths_do_not_overwrite_full_table() {
        let dir = Path::new("/tmp/out");
        let (full, _) = run_paths(dir, PropertyType::Detached, None);
        let (single, report) = run_paths(dir, PropertyType::Detached, ReportingPeriod::new(2019, 11).ok());
        assert_eq!(full, dir.join("normalized_detached.csv"));
        assert_eq!(single, dir.join("normalized_detached_2019-11.csv"));
        assert_eq!(report, dir.join("validation_detached_2019-11.json"));
    }

    // -------------------------------------------------------------------------
    // DETERMINISM - completion order must not change the merged batch
    // -------------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_parallel_normalization_matches_sequential() {
        let schema = Arc::new(Schema::default_schema().unwrap());
        let normalizer = RecordNormalizer::new(schema);
        let tables = vec![
            RawTable::from_strs(
                ReportingPeriod::new(2019, 11).unwrap(),
                PropertyType::Detached,
                "2019-11",
                &["Region", "Number of Sales"],
                &[&["Ajax", "120"], &["Oshawa", "210"]],
            ),
            RawTable::from_strs(
                ReportingPeriod::new(2019, 12).unwrap(),
                PropertyType::Detached,
                "2019-12",
                &["Region", "Number of Sales"],
                &[&["Ajax", "98"], &["Ajax", "99"]],
            ),
        ];

        let sequential = normalizer.normalize_batch(&tables);
        let parallel = normalize_parallel(&normalizer, tables, 2).await.unwrap();
        assert_eq!(parallel.records, sequential.records);
        assert_eq!(parallel.stats, sequential.stats);
        assert_eq!(parallel.issues.len(), sequential.issues.len());
    }
}
