//! Collector Service - Downloads TRREB Market Watch reports and economic indicators
//!
//! Responsibilities:
//! - Fetch monthly Market Watch PDFs from the report URL template
//! - Apply rate limiting to avoid degrading source sites
//! - Skip reports already on disk, record hashes in a manifest
//! - Fetch Bank of Canada Valet series into the indicator cache
//!
//! Usage:
//!   cargo run --bin collector -- reports
//!   cargo run --bin collector -- reports --from 2023-01 --force
//!   cargo run --bin collector -- indicators --source-id bank_of_canada_rates

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use trreb_parser::{IndicatorCache, IndicatorTable, ReportingPeriod};

#[derive(Parser, Debug)]
#[command(name = "collector", about = "Collects TRREB reports and economic indicators")]
struct Args {
    /// Path to sources config file
    #[arg(long, global = true, default_value = "config/sources.json")]
    config: PathBuf,

    /// Force re-download even if already collected
    #[arg(long, global = true, default_value = "false")]
    force: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download Market Watch report PDFs
    Reports {
        /// First period to collect (defaults to January of the configured start year)
        #[arg(long)]
        from: Option<ReportingPeriod>,

        /// Last period to collect (defaults to the current month)
        #[arg(long)]
        to: Option<ReportingPeriod>,
    },
    /// Download economic indicator series into the cache
    Indicators {
        /// Only collect this source
        #[arg(long)]
        source_id: Option<String>,
    },
}

// =============================================================================
// Source Configuration Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SourcesConfig {
    version: String,
    reports: ReportSource,
    #[serde(default)]
    indicators: Vec<IndicatorSource>,
}

#[derive(Debug, Deserialize)]
struct ReportSource {
    url_template: String,
    start_year: i32,
}

#[derive(Debug, Deserialize)]
struct IndicatorSource {
    id: String,
    name: String,
    provider: String,
    base_url: String,
    start_date: NaiveDate,
    #[serde(default = "default_true")]
    enabled: bool,
    /// Output column -> provider series code.
    series: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
struct Config {
    pdf_dir: PathBuf,
    economic_dir: PathBuf,
    rate_limit_ms: u64,
}

impl Config {
    fn from_env() -> Self {
        Self {
            pdf_dir: PathBuf::from(
                std::env::var("PDF_DIR").unwrap_or_else(|_| "./data/pdfs".to_string()),
            ),
            economic_dir: PathBuf::from(
                std::env::var("ECONOMIC_DIR").unwrap_or_else(|_| "./data/economic".to_string()),
            ),
            rate_limit_ms: std::env::var("RATE_LIMIT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
        }
    }
}

/// One downloaded report, as recorded in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ManifestEntry {
    period_key: String,
    url: String,
    path: PathBuf,
    content_hash: String,
    size_bytes: u64,
    captured_at: DateTime<Utc>,
}

type Manifest = BTreeMap<String, ManifestEntry>;

/// Load sources configuration from JSON file
async fn load_sources_config(path: &Path) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read sources config {}", path.display()))?;
    let config: SourcesConfig =
        serde_json::from_str(&content).context("Failed to parse sources config")?;
    Ok(config)
}

async fn load_manifest(path: &Path) -> Result<Manifest> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).context("Failed to parse report manifest"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::new()),
        Err(e) => Err(e).context("Failed to read report manifest"),
    }
}

async fn save_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).await.context("Failed to write report manifest")
}

/// Expand `{yyyy}`, `{yy}` and `{mm}` in a report URL template.
fn report_url(template: &str, period: ReportingPeriod) -> String {
    template
        .replace("{yyyy}", &format!("{:04}", period.year()))
        .replace("{yy}", &format!("{:02}", period.year() % 100))
        .replace("{mm}", &format!("{:02}", period.month()))
}

fn report_file(pdf_dir: &Path, period: ReportingPeriod) -> PathBuf {
    pdf_dir.join(format!("{}.pdf", period.key()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Fetch one report. `Ok(None)` when the source has no report for the period.
async fn fetch_report(
    client: &reqwest::Client,
    config: &Config,
    url: &str,
    period: ReportingPeriod,
) -> Result<Option<ManifestEntry>> {
    println!("  Rate limit: waiting {}ms...", config.rate_limit_ms);
    sleep(Duration::from_millis(config.rate_limit_ms)).await;

    println!("  Fetching: {}", url);
    let resp = client.get(url).send().await?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        tracing::warn!(period = %period, url, "report not published");
        return Ok(None);
    }
    let resp = resp.error_for_status().context("HTTP request failed")?;
    let bytes = resp.bytes().await?;

    let content_hash = sha256_hex(&bytes);
    println!("  Downloaded: {} bytes", bytes.len());
    println!("  Hash: {}", content_hash);

    fs::create_dir_all(&config.pdf_dir).await?;
    let path = report_file(&config.pdf_dir, period);
    fs::write(&path, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("  Saved to: {}", path.display());

    Ok(Some(ManifestEntry {
        period_key: period.key(),
        url: url.to_string(),
        path,
        content_hash,
        size_bytes: bytes.len() as u64,
        captured_at: Utc::now(),
    }))
}

async fn collect_reports(
    client: &reqwest::Client,
    config: &Config,
    source: &ReportSource,
    from: Option<ReportingPeriod>,
    to: Option<ReportingPeriod>,
    force: bool,
) -> Result<()> {
    let first = match from {
        Some(period) => period,
        None => ReportingPeriod::new(source.start_year, 1).context("Invalid start_year")?,
    };
    let last = to.unwrap_or_else(|| ReportingPeriod::from_date(Utc::now().date_naive()));
    println!("Periods: {} to {}", first, last);

    let manifest_path = config.pdf_dir.join("manifest.json");
    let mut manifest = load_manifest(&manifest_path).await?;

    let mut collected = 0;
    let mut skipped = 0;
    let mut missing = 0;
    let mut failed = 0;

    for period in first.through(last) {
        let path = report_file(&config.pdf_dir, period);
        if !force && path.exists() {
            skipped += 1;
            continue;
        }

        println!("\n[{}]", period);
        let url = report_url(&source.url_template, period);
        match fetch_report(client, config, &url, period).await {
            Ok(Some(entry)) => {
                println!("  ✓ Collected");
                manifest.insert(entry.period_key.clone(), entry);
                collected += 1;
            }
            Ok(None) => {
                println!("  - Not published");
                missing += 1;
            }
            Err(e) => {
                eprintln!("  ✗ Failed: {:#}", e);
                failed += 1;
            }
        }
    }

    if collected > 0 {
        save_manifest(&manifest_path, &manifest).await?;
    }

    println!("\n=== Collection Summary ===");
    println!("Collected: {}", collected);
    println!("Already present: {}", skipped);
    println!("Not published: {}", missing);
    println!("Failed: {}", failed);
    Ok(())
}

// =============================================================================
// Bank of Canada Valet
// =============================================================================

fn valet_url(source: &IndicatorSource) -> String {
    let codes: Vec<&str> = source.series.values().map(String::as_str).collect();
    format!(
        "{}/{}/json?start_date={}",
        source.base_url.trim_end_matches('/'),
        codes.join(","),
        source.start_date.format("%Y-%m-%d")
    )
}

/// Parse a Valet observations document into a monthly indicator table.
///
/// Each observation carries a date under `d` and one `{ "v": "..." }` object
/// per series code. Blank or non-numeric values are skipped.
fn parse_valet(body: &serde_json::Value, series: &BTreeMap<String, String>) -> Result<IndicatorTable> {
    let observations = body
        .get("observations")
        .and_then(|o| o.as_array())
        .context("Valet response has no observations")?;

    let mut points = Vec::new();
    for obs in observations {
        let Some(date) = obs
            .get("d")
            .and_then(|d| d.as_str())
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        else {
            continue;
        };
        for (column, code) in series {
            let value = obs
                .get(code)
                .and_then(|s| s.get("v"))
                .and_then(|v| match v {
                    serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                    serde_json::Value::Number(n) => n.as_f64(),
                    _ => None,
                });
            if let Some(value) = value {
                points.push((date, column.clone(), value));
            }
        }
    }
    Ok(IndicatorTable::from_observations(points))
}

async fn collect_indicators(
    client: &reqwest::Client,
    config: &Config,
    sources: &[IndicatorSource],
    source_id: Option<&str>,
    force: bool,
) -> Result<()> {
    let cache = IndicatorCache::new(&config.economic_dir, force);

    let selected: Vec<&IndicatorSource> = sources
        .iter()
        .filter(|s| s.enabled)
        .filter(|s| source_id.map_or(true, |id| s.id == id))
        .collect();
    if selected.is_empty() {
        anyhow::bail!("No indicator sources match the filter criteria");
    }

    let mut collected = 0;
    let mut cached = 0;
    let mut failed = 0;

    for source in selected {
        println!("\n[{}] {}", source.id, source.name);
        if cache.is_fresh(&source.id) {
            println!("  Cached: {}", cache.path_for(&source.id).display());
            cached += 1;
            continue;
        }
        if source.provider != "bank_of_canada" {
            tracing::warn!(source = %source.id, provider = %source.provider, "unsupported indicator provider");
            failed += 1;
            continue;
        }

        sleep(Duration::from_millis(config.rate_limit_ms)).await;
        let url = valet_url(source);
        println!("  Fetching: {}", url);

        let result = async {
            let body: serde_json::Value = client
                .get(&url)
                .send()
                .await?
                .error_for_status()
                .context("HTTP request failed")?
                .json()
                .await
                .context("Invalid Valet JSON")?;
            let table = parse_valet(&body, &source.series)?;
            let path = cache.store(&source.id, &table)?;
            Ok::<_, anyhow::Error>((table.len(), path))
        }
        .await;

        match result {
            Ok((months, path)) => {
                println!("  ✓ {} months -> {}", months, path.display());
                collected += 1;
            }
            Err(e) => {
                eprintln!("  ✗ Failed: {:#}", e);
                failed += 1;
            }
        }
    }

    println!("\n=== Collection Summary ===");
    println!("Collected: {}", collected);
    println!("Cached: {}", cached);
    println!("Failed: {}", failed);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    println!("=== TRREB Collector ===");
    println!("Loading sources from: {}", args.config.display());
    let sources = load_sources_config(&args.config).await?;
    println!("Config version: {}", sources.version);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .user_agent("trreb-collector/0.1 (market research)")
        .build()?;

    match args.command {
        Command::Reports { from, to } => {
            println!("Storage: {}", config.pdf_dir.display());
            collect_reports(&client, &config, &sources.reports, from, to, args.force).await?;
        }
        Command::Indicators { source_id } => {
            println!("Cache: {}", config.economic_dir.display());
            collect_indicators(
                &client,
                &config,
                &sources.indicators,
                source_id.as_deref(),
                args.force,
            )
            .await?;
        }
    }

    Ok(())
}
