//! Raw extraction output and the on-disk loader for it.
//!
//! Extraction (table library for older reports, AI API for newer ones) writes
//! one CSV per report table under `<extracted_dir>/<property_type>/`. The
//! normalizer only sees `RawTable`; it never branches on how it was produced.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::period::{PropertyType, ReportingPeriod};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TableLibrary,
    AiApi,
}

impl ExtractionMethod {
    /// Reports before `cutoff` went through the table library.
    pub fn for_period(period: ReportingPeriod, cutoff: ReportingPeriod) -> Self {
        if period < cutoff {
            ExtractionMethod::TableLibrary
        } else {
            ExtractionMethod::AiApi
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMethod::TableLibrary => "table_library",
            ExtractionMethod::AiApi => "ai_api",
        })
    }
}

/// One extracted report table. Rows are padded to the header width.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub period: ReportingPeriod,
    pub property_type: PropertyType,
    pub source_id: String,
    pub extraction: ExtractionMethod,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(
        period: ReportingPeriod,
        property_type: PropertyType,
        source_id: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            period,
            property_type,
            source_id: source_id.into(),
            extraction: ExtractionMethod::TableLibrary,
            headers,
            rows,
        }
    }

    pub fn with_extraction(mut self, extraction: ExtractionMethod) -> Self {
        self.extraction = extraction;
        self
    }

    /// Convenience for building tables from string literals.
    pub fn from_strs(
        period: ReportingPeriod,
        property_type: PropertyType,
        source_id: &str,
        headers: &[&str],
        rows: &[&[&str]],
    ) -> Self {
        Self::new(
            period,
            property_type,
            source_id,
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }
}

/// Decode table bytes: UTF-8 (BOM stripped), else Windows-1252.
pub fn decode_text(bytes: &[u8]) -> Cow<'_, str> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Cow::Borrowed(text),
        Err(_) => {
            let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes);
            text
        }
    }
}

/// Load one extracted CSV. The period comes from the file name.
pub fn load_table(
    path: &Path,
    property_type: PropertyType,
    cutoff: ReportingPeriod,
) -> Result<RawTable, LoadError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| LoadError::PeriodFromFileName(path.to_path_buf()))?;
    let period = ReportingPeriod::from_file_stem(stem)
        .ok_or_else(|| LoadError::PeriodFromFileName(path.to_path_buf()))?;

    let bytes = std::fs::read(path).map_err(|e| LoadError::io(path, e))?;
    let text = decode_text(&bytes);
    if matches!(text, Cow::Owned(_)) {
        tracing::debug!(path = %path.display(), "decoded as windows-1252");
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    if headers.is_empty() {
        return Err(LoadError::MissingHeader(path.to_path_buf()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() > headers.len() {
            tracing::debug!(
                path = %path.display(),
                extra = record.len() - headers.len(),
                "dropping cells beyond header width"
            );
        }
        rows.push(record.iter().take(headers.len()).map(String::from).collect());
    }

    let source_id = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(RawTable::new(period, property_type, source_id, headers, rows)
        .with_extraction(ExtractionMethod::for_period(period, cutoff)))
}

/// Extracted CSVs for one property type, ordered by period then file name.
pub fn discover_tables(
    extracted_dir: &Path,
    property_type: PropertyType,
) -> Result<Vec<(ReportingPeriod, PathBuf)>, LoadError> {
    let dir = extracted_dir.join(property_type.as_str());
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "no extracted tables for property type");
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&dir).map_err(|e| LoadError::io(&dir, e))? {
        let path = entry.map_err(|e| LoadError::io(&dir, e))?.path();
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv {
            continue;
        }
        match path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(ReportingPeriod::from_file_stem)
        {
            Some(period) => found.push((period, path)),
            None => tracing::warn!(path = %path.display(), "skipping file without a period in its name"),
        }
    }
    found.sort();
    Ok(found)
}

/// Load every extracted table for `property_type`, optionally a single period.
pub fn load_tables(
    extracted_dir: &Path,
    property_type: PropertyType,
    cutoff: ReportingPeriod,
    only: Option<ReportingPeriod>,
) -> Result<Vec<RawTable>, LoadError> {
    let mut tables = Vec::new();
    for (period, path) in discover_tables(extracted_dir, property_type)? {
        if only.is_some_and(|p| p != period) {
            continue;
        }
        tables.push(load_table(&path, property_type, cutoff)?);
    }
    tracing::info!(
        property_type = %property_type,
        tables = tables.len(),
        "loaded extracted tables"
    );
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ReportingPeriod {
        s.parse().unwrap()
    }

    #[test]
    fn test_rows_padded_to_header_width() {
        let table = RawTable::from_strs(
            p("2019-11"),
            PropertyType::Detached,
            "t",
            &["Region", "Sales", "Avg. Price"],
            &[&["Ajax"], &["Aurora", "12", "900000"]],
        );
        assert_eq!(table.rows[0], vec!["Ajax", "", ""]);
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_extraction_method_by_cutoff() {
        let cutoff = p("2020-01");
        assert_eq!(ExtractionMethod::for_period(p("2019-12"), cutoff), ExtractionMethod::TableLibrary);
        assert_eq!(ExtractionMethod::for_period(p("2020-01"), cutoff), ExtractionMethod::AiApi);
    }

    #[test]
    fn test_decode_strips_bom_and_falls_back_to_cp1252() {
        assert_eq!(decode_text(b"\xEF\xBB\xBFRegion,Sales"), "Region,Sales");
        // 0xE9 is 'é' in Windows-1252 and invalid as standalone UTF-8.
        assert_eq!(decode_text(b"Qu\xE9bec"), "Québec");
    }

    #[test]
    fn test_load_table_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let type_dir = dir.path().join("detached");
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(
            type_dir.join("2019-11.csv"),
            "\u{feff}Region, Number of Sales ,Avg. Price\nE. Gwillimbury,\"1,234\",\"$1,050,000\"\nAjax,40\n",
        )
        .unwrap();
        std::fs::write(type_dir.join("2023-02.csv"), "Region,Sales\nStouffville,987\n").unwrap();
        std::fs::write(type_dir.join("notes.txt"), "ignored").unwrap();
        std::fs::write(type_dir.join("summary.csv"), "Region\n").unwrap();

        let tables = load_tables(dir.path(), PropertyType::Detached, p("2020-01"), None).unwrap();
        assert_eq!(tables.len(), 2);

        let first = &tables[0];
        assert_eq!(first.period, p("2019-11"));
        assert_eq!(first.source_id, "2019-11.csv");
        assert_eq!(first.extraction, ExtractionMethod::TableLibrary);
        assert_eq!(first.headers, vec!["Region", "Number of Sales", "Avg. Price"]);
        assert_eq!(first.rows[0], vec!["E. Gwillimbury", "1,234", "$1,050,000"]);
        assert_eq!(first.rows[1], vec!["Ajax", "40", ""]);

        assert_eq!(tables[1].extraction, ExtractionMethod::AiApi);
    }

    #[test]
    fn test_load_tables_single_period() {
        let dir = tempfile::tempdir().unwrap();
        let type_dir = dir.path().join("all_home_types");
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(type_dir.join("201911.csv"), "Region,Sales\nAjax,1\n").unwrap();
        std::fs::write(type_dir.join("201912.csv"), "Region,Sales\nAjax,2\n").unwrap();

        let tables =
            load_tables(dir.path(), PropertyType::AllHomeTypes, p("2020-01"), Some(p("2019-12"))).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].rows[0][1], "2");
    }

    #[test]
    fn test_missing_type_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tables = load_tables(dir.path(), PropertyType::Detached, p("2020-01"), None).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_non_ascii_file_name_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let type_dir = dir.path().join("detached");
        std::fs::create_dir_all(&type_dir).unwrap();
        std::fs::write(type_dir.join("201é1.csv"), "Region,Sales\nAjax,1\n").unwrap();
        std::fs::write(type_dir.join("2019-11.csv"), "Region,Sales\nAjax,2\n").unwrap();

        let found = discover_tables(dir.path(), PropertyType::Detached).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, p("2019-11"));
    }

    #[test]
    fn test_bad_file_name_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page3.csv");
        std::fs::write(&path, "Region\n").unwrap();
        let err = load_table(&path, PropertyType::Detached, p("2020-01")).unwrap_err();
        assert!(matches!(err, LoadError::PeriodFromFileName(_)));
    }
}
