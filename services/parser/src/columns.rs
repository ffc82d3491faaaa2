//! Raw column header -> canonical metric mapping, per era.
//!
//! Headers are folded before lookup: footnote markers and trailing digits are
//! stripped (`Sales1`, `SNLR (Trend) 8`), punctuation collapses to single
//! spaces, and `#`, `$`, `%` survive as tokens. A header that folds to a
//! known spelling only maps when its metric is collected in the table's
//! period, so old reports never yield metrics introduced later.

use std::collections::{BTreeMap, HashMap};

use crate::config::{HeaderDef, MetricDef};
use crate::era::Eras;
use crate::error::SchemaError;
use crate::metric::CanonicalMetric;
use crate::period::{PropertyType, ReportingPeriod};

/// When a metric is collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Availability {
    pub from: Option<ReportingPeriod>,
    pub until: Option<ReportingPeriod>,
    pub property_types: Option<Vec<PropertyType>>,
}

impl Availability {
    pub fn from_def(def: &MetricDef) -> Self {
        Self {
            from: def.available_from,
            until: def.available_until,
            property_types: def.property_types.clone(),
        }
    }

    pub fn covers_period(&self, period: ReportingPeriod) -> bool {
        self.from.map_or(true, |from| period >= from) && self.until.map_or(true, |until| period <= until)
    }

    pub fn covers(&self, period: ReportingPeriod, property_type: PropertyType) -> bool {
        self.covers_period(period)
            && self
                .property_types
                .as_ref()
                .map_or(true, |types| types.contains(&property_type))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    Mapped(CanonicalMetric),
    /// Spelling is known but the metric is not collected in this period.
    OutOfPeriod(CanonicalMetric),
    Unmapped,
}

#[derive(Debug, Clone)]
pub struct ColumnMapper {
    eras: Eras,
    per_era: Vec<HashMap<String, CanonicalMetric>>,
    availability: BTreeMap<CanonicalMetric, Availability>,
}

impl ColumnMapper {
    pub fn build(
        eras: Eras,
        headers: &[HeaderDef],
        availability: BTreeMap<CanonicalMetric, Availability>,
    ) -> Result<Self, SchemaError> {
        let mut per_era: Vec<HashMap<String, CanonicalMetric>> = vec![HashMap::new(); eras.len()];
        for def in headers {
            for era in eras.select(def.eras.as_deref())? {
                for spelling in &def.spellings {
                    let key = header_key(spelling);
                    match per_era[era].get(&key) {
                        Some(existing) if *existing != def.metric => {
                            return Err(SchemaError::ConflictingHeader {
                                header: spelling.clone(),
                                era: eras.id(era).to_string(),
                                first: existing.to_string(),
                                second: def.metric.to_string(),
                            });
                        }
                        _ => {
                            per_era[era].insert(key, def.metric);
                        }
                    }
                }
            }
        }
        Ok(Self {
            eras,
            per_era,
            availability,
        })
    }

    pub fn classify(&self, raw_header: &str, period: ReportingPeriod) -> HeaderMatch {
        let key = header_key(raw_header);
        match self.per_era[self.eras.index_of(period)].get(&key) {
            Some(&metric) if self.is_available(metric, period) => HeaderMatch::Mapped(metric),
            Some(&metric) => HeaderMatch::OutOfPeriod(metric),
            None => HeaderMatch::Unmapped,
        }
    }

    pub fn map_header(&self, raw_header: &str, period: ReportingPeriod) -> Option<CanonicalMetric> {
        match self.classify(raw_header, period) {
            HeaderMatch::Mapped(metric) => Some(metric),
            _ => None,
        }
    }

    /// Whether `metric` is collected at all in `period`, independent of any header.
    pub fn is_available(&self, metric: CanonicalMetric, period: ReportingPeriod) -> bool {
        self.availability
            .get(&metric)
            .is_some_and(|a| a.covers_period(period))
    }

    /// Whether a `property_type` table for `period` is expected to carry `metric`.
    pub fn is_expected(
        &self,
        metric: CanonicalMetric,
        period: ReportingPeriod,
        property_type: PropertyType,
    ) -> bool {
        self.availability
            .get(&metric)
            .is_some_and(|a| a.covers(period, property_type))
    }

    pub fn expected_metrics(
        &self,
        period: ReportingPeriod,
        property_type: PropertyType,
    ) -> Vec<CanonicalMetric> {
        CanonicalMetric::ALL
            .into_iter()
            .filter(|m| self.is_expected(*m, period, property_type))
            .collect()
    }
}

/// Fold a raw header for lookup.
pub fn header_key(raw: &str) -> String {
    let lowered = raw.trim().trim_matches('"').to_lowercase();
    let stripped = lowered.trim_end_matches(|c: char| {
        c.is_ascii_digit() || c.is_whitespace() || matches!(c, '*' | '†' | '‡' | '¹' | '²' | '³')
            || ('\u{2070}'..='\u{2079}').contains(&c)
    });

    let mut key = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_alphanumeric() {
            key.push(c);
        } else if matches!(c, '#' | '$' | '%') {
            key.push(' ');
            key.push(c);
            key.push(' ');
        } else {
            key.push(' ');
        }
    }
    key.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn p(s: &str) -> ReportingPeriod {
        s.parse().unwrap()
    }

    fn schema() -> Schema {
        Schema::default_schema().unwrap()
    }

    // -------------------------------------------------------------------------
    // HEADER FOLDING
    // -------------------------------------------------------------------------

    #[test]
    fn test_header_key_strips_footnote_digits() {
        assert_eq!(header_key("Sales1"), "sales");
        assert_eq!(header_key("Sales 1"), "sales");
        assert_eq!(header_key("SNLR (Trend) 8"), "snlr trend");
        assert_eq!(header_key("Mos. Inv. (Trend)9"), "mos inv trend");
        assert_eq!(header_key("Avg. SP / LP4"), "avg sp lp");
        assert_eq!(header_key("Dollar Volume*"), "dollar volume");
    }

    #[test]
    fn test_header_key_keeps_symbol_tokens() {
        assert_eq!(header_key("# of Sales"), "# of sales");
        assert_eq!(header_key("$ Volume"), "$ volume");
        assert_eq!(header_key("Volume ($)"), "volume $");
        assert_eq!(header_key("SP/LP (%)"), "sp lp %");
    }

    #[test]
    fn test_header_key_collapses_whitespace_and_quotes() {
        assert_eq!(header_key("  \"Average   Price\" "), "average price");
        assert_eq!(header_key("Avg.Price"), "avg price");
    }

    // -------------------------------------------------------------------------
    // MAPPING
    // -------------------------------------------------------------------------

    #[test]
    fn test_map_header_variants() {
        let schema = schema();
        let columns = schema.columns();
        let period = p("2019-11");
        assert_eq!(columns.map_header("Number of Sales", period), Some(CanonicalMetric::SalesCount));
        assert_eq!(columns.map_header("# of Sales", period), Some(CanonicalMetric::SalesCount));
        assert_eq!(columns.map_header("Sales1", period), Some(CanonicalMetric::SalesCount));
        assert_eq!(columns.map_header("Dollar Volume1", period), Some(CanonicalMetric::DollarVolume));
        assert_eq!(columns.map_header("Avg. SP / LP4", period), Some(CanonicalMetric::AvgSpLp));
        assert_eq!(columns.map_header("Mos. Inv. (Trend)9", period), Some(CanonicalMetric::MonthsInventory));
    }

    #[test]
    fn test_map_header_era_specific_spelling() {
        let schema = schema();
        let columns = schema.columns();
        assert_eq!(columns.map_header("Avg. LDOM", p("2021-05")), Some(CanonicalMetric::AvgDom));
        assert_eq!(columns.classify("Avg. LDOM", p("2018-05")), HeaderMatch::Unmapped);
    }

    #[test]
    fn test_unmapped_header() {
        let schema = schema();
        assert_eq!(schema.columns().classify("Price per Sq Ft", p("2020-01")), HeaderMatch::Unmapped);
        assert_eq!(schema.columns().map_header("", p("2020-01")), None);
    }

    #[test]
    fn test_metric_never_mapped_before_introduction() {
        let schema = schema();
        let columns = schema.columns();
        for period in p("2016-01").through(p("2019-12")) {
            for header in ["Avg. PDOM", "Avg PDOM", "Property DOM"] {
                assert_eq!(columns.map_header(header, period), None, "{header} @ {period}");
                assert_eq!(
                    columns.classify(header, period),
                    HeaderMatch::OutOfPeriod(CanonicalMetric::AvgPdom)
                );
            }
        }
        assert_eq!(columns.map_header("Avg. PDOM", p("2020-01")), Some(CanonicalMetric::AvgPdom));
    }

    // -------------------------------------------------------------------------
    // AVAILABILITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_expected_metrics_by_period_and_type() {
        let schema = schema();
        let columns = schema.columns();
        let all_2019 = columns.expected_metrics(p("2019-11"), PropertyType::AllHomeTypes);
        assert!(all_2019.contains(&CanonicalMetric::Snlr));
        assert!(!all_2019.contains(&CanonicalMetric::AvgPdom));

        let all_2023 = columns.expected_metrics(p("2023-02"), PropertyType::AllHomeTypes);
        assert!(all_2023.contains(&CanonicalMetric::AvgPdom));

        let detached = columns.expected_metrics(p("2023-02"), PropertyType::Detached);
        assert!(!detached.contains(&CanonicalMetric::Snlr));
        assert!(!detached.contains(&CanonicalMetric::MonthsInventory));
        assert!(detached.contains(&CanonicalMetric::SalesCount));
    }

    #[test]
    fn test_is_expected_independent_of_headers() {
        let schema = schema();
        let columns = schema.columns();
        assert!(columns.is_expected(CanonicalMetric::MedianPrice, p("2016-01"), PropertyType::Detached));
        assert!(!columns.is_expected(CanonicalMetric::AvgPdom, p("2019-12"), PropertyType::AllHomeTypes));
        assert!(columns.is_expected(CanonicalMetric::AvgPdom, p("2020-01"), PropertyType::AllHomeTypes));
    }

    #[test]
    fn test_conflicting_spelling_rejected() {
        let eras = Eras::build(&[crate::config::EraDef {
            id: "only".into(),
            starts: p("2016-01"),
        }])
        .unwrap();
        let headers = vec![
            HeaderDef { metric: CanonicalMetric::SalesCount, eras: None, spellings: vec!["Sales".into()] },
            HeaderDef { metric: CanonicalMetric::NewListings, eras: None, spellings: vec!["Sales 2".into()] },
        ];
        let err = ColumnMapper::build(eras, &headers, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, SchemaError::ConflictingHeader { .. }));
    }
}
