//! Reporting periods and property types.
//!
//! A reporting period is the (year, month) a Market Watch report covers. Its
//! `YYYY-MM` key is the join key against external monthly series.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReportingPeriod {
    year: i32,
    month: u32,
}

impl ReportingPeriod {
    pub fn new(year: i32, month: u32) -> Result<Self, SchemaError> {
        if !(1..=12).contains(&month) || !(1900..=2200).contains(&year) {
            return Err(SchemaError::InvalidPeriod(format!("{year}-{month:02}")));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn quarter(&self) -> u32 {
        (self.month - 1) / 3 + 1
    }

    /// `YYYY-MM`
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn first_day(&self) -> NaiveDate {
        // Always valid: month is range-checked on construction.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    pub fn succ(&self) -> Self {
        self.add_months(1)
    }

    pub fn pred(&self) -> Self {
        self.add_months(-1)
    }

    pub fn add_months(&self, delta: i32) -> Self {
        let index = self.index() + delta;
        Self {
            year: index.div_euclid(12),
            month: (index.rem_euclid(12) + 1) as u32,
        }
    }

    /// Number of months from `self` to `other` (negative if `other` is earlier).
    pub fn months_until(&self, other: &Self) -> i32 {
        other.index() - self.index()
    }

    /// Every period from `self` through `last`, inclusive.
    pub fn through(self, last: Self) -> impl Iterator<Item = ReportingPeriod> {
        let count = self.months_until(&last).max(-1) + 1;
        (0..count).map(move |offset| self.add_months(offset))
    }

    /// Derive a period from an extraction file stem such as `2019-11`,
    /// `201911`, `mw1911` or `2019-11_detached`.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let token = stem.split(['_', ' ']).next().unwrap_or(stem);
        if let Ok(period) = token.parse() {
            return Some(period);
        }
        let short = token.strip_prefix("mw")?;
        if short.len() == 4 && short.chars().all(|c| c.is_ascii_digit()) {
            let year: i32 = short[..2].parse().ok()?;
            let month: u32 = short[2..].parse().ok()?;
            return Self::new(2000 + year, month).ok();
        }
        None
    }

    fn index(&self) -> i32 {
        self.year * 12 + self.month as i32 - 1
    }
}

impl FromStr for ReportingPeriod {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || SchemaError::InvalidPeriod(s.to_string());
        if !s.is_ascii() {
            return Err(invalid());
        }
        let (year, month) = match s.split_once('-') {
            Some((y, m)) => (y, m),
            None if s.len() == 6 => s.split_at(4),
            None => return Err(invalid()),
        };
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for ReportingPeriod {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportingPeriod> for String {
    fn from(period: ReportingPeriod) -> Self {
        period.key()
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Housing category a report table describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    AllHomeTypes,
    Detached,
}

impl PropertyType {
    pub const ALL: [PropertyType; 2] = [PropertyType::AllHomeTypes, PropertyType::Detached];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::AllHomeTypes => "all_home_types",
            PropertyType::Detached => "detached",
        }
    }
}

impl FromStr for PropertyType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "all_home_types" | "all_homes" | "all" => Ok(PropertyType::AllHomeTypes),
            "detached" => Ok(PropertyType::Detached),
            _ => Err(SchemaError::UnknownPropertyType(s.to_string())),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
