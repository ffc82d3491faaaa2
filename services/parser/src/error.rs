use std::path::PathBuf;

use thiserror::Error;

/// Malformed configuration or malformed record input.
///
/// These indicate a programming or schema error, never a data error, and are
/// raised immediately instead of being turned into validation issues.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown canonical metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown era '{0}'")]
    UnknownEra(String),

    #[error("eras must be listed in ascending start order (found '{0}' out of order)")]
    EraOrder(String),

    #[error("schema defines no eras")]
    NoEras,

    #[error("unknown region id '{0}'")]
    UnknownRegion(String),

    #[error("duplicate region id '{0}'")]
    DuplicateRegion(String),

    #[error("region hierarchy must have exactly one root, found {0}")]
    RootCount(usize),

    #[error("region hierarchy contains a cycle through '{0}'")]
    HierarchyCycle(String),

    #[error("metric '{0}' is configured more than once")]
    DuplicateMetric(String),

    #[error("metric '{0}' has no numeric kind configured")]
    MissingMetric(String),

    #[error("header '{header}' maps to both '{first}' and '{second}' in era '{era}'")]
    ConflictingHeader {
        header: String,
        era: String,
        first: String,
        second: String,
    },

    #[error("invalid plausible range for '{0}': lower bound exceeds upper bound")]
    InvalidRange(String),

    #[error("invalid reporting period '{0}' (expected YYYY-MM)")]
    InvalidPeriod(String),

    #[error("unknown property type '{0}'")]
    UnknownPropertyType(String),

    #[error("record {0} is missing a value slot for metric '{1}'")]
    IncompleteRecord(String, String),
}

/// Failures reading or writing tables on disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("cannot derive a reporting period from file name {0}")]
    PeriodFromFileName(PathBuf),

    #[error("table {0} has no header row")]
    MissingHeader(PathBuf),

    #[error("malformed value '{value}' in column '{column}' of {path}")]
    MalformedValue {
        path: PathBuf,
        column: String,
        value: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }
}
