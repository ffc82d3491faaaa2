//! The fixed set of canonical metrics tracked across every report era.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalMetric {
    SalesCount,
    DollarVolume,
    AveragePrice,
    MedianPrice,
    NewListings,
    ActiveListings,
    /// Sales-to-new-listings ratio (trend).
    Snlr,
    MonthsInventory,
    AvgSpLp,
    AvgDom,
    AvgPdom,
}

impl CanonicalMetric {
    /// Enumeration order; also the column order of the canonical table.
    pub const ALL: [CanonicalMetric; 11] = [
        CanonicalMetric::SalesCount,
        CanonicalMetric::DollarVolume,
        CanonicalMetric::AveragePrice,
        CanonicalMetric::MedianPrice,
        CanonicalMetric::NewListings,
        CanonicalMetric::ActiveListings,
        CanonicalMetric::Snlr,
        CanonicalMetric::MonthsInventory,
        CanonicalMetric::AvgSpLp,
        CanonicalMetric::AvgDom,
        CanonicalMetric::AvgPdom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalMetric::SalesCount => "sales_count",
            CanonicalMetric::DollarVolume => "dollar_volume",
            CanonicalMetric::AveragePrice => "average_price",
            CanonicalMetric::MedianPrice => "median_price",
            CanonicalMetric::NewListings => "new_listings",
            CanonicalMetric::ActiveListings => "active_listings",
            CanonicalMetric::Snlr => "snlr",
            CanonicalMetric::MonthsInventory => "months_inventory",
            CanonicalMetric::AvgSpLp => "avg_sp_lp",
            CanonicalMetric::AvgDom => "avg_dom",
            CanonicalMetric::AvgPdom => "avg_pdom",
        }
    }
}

impl FromStr for CanonicalMetric {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CanonicalMetric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SchemaError::UnknownMetric(s.to_string()))
    }
}

impl fmt::Display for CanonicalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a raw cell for a metric is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericKind {
    Currency,
    /// Percentage points: `58.5%` and `58.5` both mean 58.5.
    Percentage,
    PlainCount,
    Ratio,
}

/// A metric slot on a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Value(f64),
    /// Expected for the period but absent, a placeholder, or unparseable.
    NoData,
    /// Not collected for this period or property type.
    NotApplicable,
}

impl MetricValue {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricValue::Value(v) => Some(*v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_round_trip_through_from_str() {
        for metric in CanonicalMetric::ALL {
            assert_eq!(metric.as_str().parse::<CanonicalMetric>().unwrap(), metric);
        }
    }

    #[test]
    fn test_unknown_metric_is_schema_error() {
        let err = "sales".parse::<CanonicalMetric>().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownMetric(ref m) if m == "sales"));
    }

    #[test]
    fn test_serde_name_matches_as_str() {
        let json = serde_json::to_string(&CanonicalMetric::AvgSpLp).unwrap();
        assert_eq!(json, "\"avg_sp_lp\"");
        let unknown: Result<CanonicalMetric, _> = serde_json::from_str("\"avg_price\"");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_metric_value_accessor() {
        assert_eq!(MetricValue::Value(3.0).value(), Some(3.0));
        assert_eq!(MetricValue::NoData.value(), None);
        assert_eq!(MetricValue::NotApplicable.value(), None);
    }
}
