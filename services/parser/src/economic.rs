//! Monthly economic indicators and their join onto the canonical table.
//!
//! Indicator series are cached per source as `<source_id>.csv` under one
//! directory. The cache is an explicit value handed to whoever needs it; a
//! `force_refresh` cache reports every source as stale.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::error::LoadError;
use crate::period::{PropertyType, ReportingPeriod};

pub const DEFAULT_LAGS: [i32; 4] = [1, 3, 6, 12];

/// Indicator columns by month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorTable {
    columns: Vec<String>,
    rows: BTreeMap<ReportingPeriod, BTreeMap<String, f64>>,
}

impl IndicatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse dated observations to the last observation of each month.
    pub fn from_observations<I>(observations: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, String, f64)>,
    {
        let mut latest: BTreeMap<(ReportingPeriod, String), (NaiveDate, f64)> = BTreeMap::new();
        for (date, column, value) in observations {
            let key = (ReportingPeriod::from_date(date), column);
            let newer = latest.get(&key).map_or(true, |(seen, _)| *seen <= date);
            if newer {
                latest.insert(key, (date, value));
            }
        }
        let mut table = Self::new();
        for ((period, column), (_, value)) in latest {
            table.set(period, &column, value);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn periods(&self) -> impl Iterator<Item = ReportingPeriod> + '_ {
        self.rows.keys().copied()
    }

    pub fn set(&mut self, period: ReportingPeriod, column: &str, value: f64) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
        self.rows
            .entry(period)
            .or_default()
            .insert(column.to_string(), value);
    }

    pub fn get(&self, period: ReportingPeriod, column: &str) -> Option<f64> {
        self.rows.get(&period)?.get(column).copied()
    }

    /// Outer join on period. Later tables win on duplicate columns.
    pub fn outer_join<'a>(tables: impl IntoIterator<Item = &'a IndicatorTable>) -> Self {
        let mut joined = Self::new();
        for table in tables {
            for column in &table.columns {
                if !joined.columns.contains(column) {
                    joined.columns.push(column.clone());
                }
            }
            for (period, values) in &table.rows {
                for (column, v) in values {
                    joined.set(*period, column, *v);
                }
            }
        }
        joined
    }

    /// Add `<column>_lag<k>` for every base column, computed by month
    /// arithmetic so missing months never shift the series.
    pub fn with_lags(&self, lags: &[i32]) -> Self {
        let mut lagged = self.clone();
        for column in &self.columns {
            for &lag in lags {
                let name = format!("{column}_lag{lag}");
                lagged.columns.push(name.clone());
                for period in self.rows.keys() {
                    if let Some(v) = self.get(period.add_months(-lag), column) {
                        lagged
                            .rows
                            .entry(*period)
                            .or_default()
                            .insert(name.clone(), v);
                    }
                }
            }
        }
        lagged
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), LoadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec!["period_key".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header)?;
        for period in self.rows.keys() {
            let mut row = vec![period.key()];
            row.extend(
                self.columns
                    .iter()
                    .map(|c| self.get(*period, c).map(|v| v.to_string()).unwrap_or_default()),
            );
            writer.write_record(&row)?;
        }
        writer.flush().map_err(|e| LoadError::io(path, e))?;
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self, LoadError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        if headers.get(0) != Some("period_key") {
            return Err(LoadError::MissingHeader(path.to_path_buf()));
        }

        let mut table = Self::new();
        table.columns = headers.iter().skip(1).map(String::from).collect();
        for row in reader.records() {
            let row = row?;
            let raw_period = row.get(0).unwrap_or("");
            let period: ReportingPeriod = raw_period.parse().map_err(|_| LoadError::MalformedValue {
                path: path.to_path_buf(),
                column: "period_key".into(),
                value: raw_period.to_string(),
            })?;
            for (i, column) in headers.iter().enumerate().skip(1) {
                let raw = row.get(i).unwrap_or("").trim();
                if raw.is_empty() {
                    continue;
                }
                let value = raw.parse().map_err(|_| LoadError::MalformedValue {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                    value: raw.to_string(),
                })?;
                table.set(period, column, value);
            }
        }
        Ok(table)
    }
}

/// Per-source indicator cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct IndicatorCache {
    dir: PathBuf,
    force_refresh: bool,
}

impl IndicatorCache {
    pub fn new(dir: impl Into<PathBuf>, force_refresh: bool) -> Self {
        Self {
            dir: dir.into(),
            force_refresh,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.dir.join(format!("{source_id}.csv"))
    }

    /// A source is fresh when it is cached and no refresh was forced.
    pub fn is_fresh(&self, source_id: &str) -> bool {
        !self.force_refresh && self.path_for(source_id).is_file()
    }

    pub fn load(&self, source_id: &str) -> Result<Option<IndicatorTable>, LoadError> {
        if !self.is_fresh(source_id) {
            return Ok(None);
        }
        IndicatorTable::read_csv(&self.path_for(source_id)).map(Some)
    }

    pub fn store(&self, source_id: &str, table: &IndicatorTable) -> Result<PathBuf, LoadError> {
        let path = self.path_for(source_id);
        table.write_csv(&path)?;
        tracing::info!(source = source_id, months = table.len(), path = %path.display(), "cached indicator source");
        Ok(path)
    }

    /// Cached source ids, sorted.
    pub fn sources(&self) -> Result<Vec<String>, LoadError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(|e| LoadError::io(&self.dir, e))? {
            let path = entry.map_err(|e| LoadError::io(&self.dir, e))?.path();
            if path.extension().is_some_and(|e| e == "csv") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Outer join of every cached source, in source-id order.
    pub fn master(&self) -> Result<IndicatorTable, LoadError> {
        let mut tables = Vec::new();
        for id in self.sources()? {
            tables.push(IndicatorTable::read_csv(&self.path_for(&id))?);
        }
        let master = IndicatorTable::outer_join(&tables);
        tracing::info!(
            sources = tables.len(),
            months = master.len(),
            columns = master.columns().len(),
            "built master indicator table"
        );
        Ok(master)
    }
}

pub fn integrated_path(dir: &Path, property_type: PropertyType) -> PathBuf {
    dir.join(format!("integrated_economic_{property_type}.csv"))
}

/// Left-join a canonical table onto `indicators` by `period_key`.
///
/// Every canonical row is kept; months without indicator data get empty cells.
pub fn integrate(
    canonical: &Path,
    indicators: &IndicatorTable,
    out: &Path,
) -> Result<usize, LoadError> {
    let mut reader = csv::Reader::from_path(canonical)?;
    let headers = reader.headers()?.clone();
    let period_col = headers
        .iter()
        .position(|h| h == "period_key")
        .ok_or_else(|| LoadError::MissingHeader(canonical.to_path_buf()))?;

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LoadError::io(parent, e))?;
    }
    let mut writer = csv::Writer::from_path(out)?;
    let mut header: Vec<String> = headers.iter().map(String::from).collect();
    header.extend(indicators.columns().iter().cloned());
    writer.write_record(&header)?;

    let mut rows = 0;
    let mut matched = 0;
    for row in reader.records() {
        let row = row?;
        let raw_period = row.get(period_col).unwrap_or("");
        let period: ReportingPeriod = raw_period.parse().map_err(|_| LoadError::MalformedValue {
            path: canonical.to_path_buf(),
            column: "period_key".into(),
            value: raw_period.to_string(),
        })?;

        let mut out_row: Vec<String> = row.iter().map(String::from).collect();
        let mut any = false;
        for column in indicators.columns() {
            let value = indicators.get(period, column);
            any |= value.is_some();
            out_row.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        if any {
            matched += 1;
        }
        writer.write_record(&out_row)?;
        rows += 1;
    }
    writer.flush().map_err(|e| LoadError::io(out, e))?;

    if matched < rows {
        tracing::warn!(rows, matched, "some canonical rows have no indicator data");
    }
    tracing::info!(path = %out.display(), rows, columns = header.len(), "wrote integrated table");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ReportingPeriod {
        s.parse().unwrap()
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_daily_observations_collapse_to_last_of_month() {
        let table = IndicatorTable::from_observations(vec![
            (d("2020-01-31"), "rate".to_string(), 1.75),
            (d("2020-01-02"), "rate".to_string(), 1.50),
            (d("2020-02-14"), "rate".to_string(), 1.25),
        ]);
        assert_eq!(table.get(p("2020-01"), "rate"), Some(1.75));
        assert_eq!(table.get(p("2020-02"), "rate"), Some(1.25));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_outer_join_later_source_wins() {
        let mut a = IndicatorTable::new();
        a.set(p("2020-01"), "rate", 1.0);
        a.set(p("2020-02"), "rate", 1.1);
        let mut b = IndicatorTable::new();
        b.set(p("2020-02"), "rate", 2.0);
        b.set(p("2020-03"), "cpi", 130.0);

        let joined = IndicatorTable::outer_join([&a, &b]);
        assert_eq!(joined.columns(), ["rate", "cpi"]);
        assert_eq!(joined.get(p("2020-01"), "rate"), Some(1.0));
        assert_eq!(joined.get(p("2020-02"), "rate"), Some(2.0));
        assert_eq!(joined.get(p("2020-03"), "cpi"), Some(130.0));
        assert_eq!(joined.get(p("2020-03"), "rate"), None);
    }

    #[test]
    fn test_lags_use_month_arithmetic() {
        let mut t = IndicatorTable::new();
        t.set(p("2019-12"), "rate", 1.0);
        t.set(p("2020-01"), "rate", 2.0);
        // 2020-02 deliberately absent
        t.set(p("2020-03"), "rate", 4.0);

        let lagged = t.with_lags(&[1, 3]);
        assert_eq!(lagged.columns(), ["rate", "rate_lag1", "rate_lag3"]);
        assert_eq!(lagged.get(p("2020-01"), "rate_lag1"), Some(1.0));
        assert_eq!(lagged.get(p("2020-03"), "rate_lag1"), None);
        assert_eq!(lagged.get(p("2020-03"), "rate_lag3"), Some(1.0));
    }

    #[test]
    fn test_cache_force_refresh_and_master() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IndicatorCache::new(dir.path(), false);
        assert!(!cache.is_fresh("boc"));
        assert_eq!(cache.load("boc").unwrap(), None);

        let mut rates = IndicatorTable::new();
        rates.set(p("2020-01"), "overnight_rate", 1.75);
        cache.store("boc", &rates).unwrap();
        let mut bonds = IndicatorTable::new();
        bonds.set(p("2020-01"), "bond_yield_5yr", 1.6);
        cache.store("bonds", &bonds).unwrap();

        assert!(cache.is_fresh("boc"));
        assert_eq!(cache.load("boc").unwrap(), Some(rates));
        assert_eq!(cache.sources().unwrap(), vec!["boc", "bonds"]);

        let master = cache.master().unwrap();
        assert_eq!(master.columns(), ["overnight_rate", "bond_yield_5yr"]);

        let forced = IndicatorCache::new(dir.path(), true);
        assert!(!forced.is_fresh("boc"));
        assert_eq!(forced.load("boc").unwrap(), None);
    }

    #[test]
    fn test_integrate_left_joins_on_period_key() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("normalized_detached.csv");
        std::fs::write(
            &canonical,
            "period_key,region_id,sales_count\n2020-01,ajax,10\n2020-02,ajax,11\n",
        )
        .unwrap();
        let mut indicators = IndicatorTable::new();
        indicators.set(p("2020-01"), "rate", 1.75);
        indicators.set(p("2021-01"), "rate", 0.25);

        let out = integrated_path(dir.path(), PropertyType::Detached);
        let rows = integrate(&canonical, &indicators, &out).unwrap();
        assert_eq!(rows, 2);
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(
            text,
            "period_key,region_id,sales_count,rate\n2020-01,ajax,10,1.75\n2020-02,ajax,11,\n"
        );
    }
}
