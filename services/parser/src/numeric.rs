//! Raw cell -> number, driven by the metric's expected kind.
//!
//! Accepted formats:
//! - currency: optional leading `$`, optional thousands separators, optional decimal
//! - percentage: number in percentage points, optional trailing `%`
//! - plain count: digits with optional thousands separators and decimal
//! - ratio: digits with an optional single decimal point
//!
//! Any kind may carry a leading sign. Placeholders (`n/a`, `-`, blank) mean
//! "no data" and yield `Ok(None)`, never zero.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metric::NumericKind;

const PLACEHOLDERS: &[&str] = &["", "n/a", "na", "n.a.", "-", "--", "—", "–", "nan", "none", "null", "*"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Unparseable,
    /// Unit marker (`%`, `$`) disagrees with the expected kind.
    SignMismatch,
    OutOfRange,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureReason::Unparseable => "unparseable",
            FailureReason::SignMismatch => "sign mismatch",
            FailureReason::OutOfRange => "out of range",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("cannot normalize '{raw}': {reason}")]
pub struct NormalizationFailure {
    pub raw: String,
    pub reason: FailureReason,
}

impl NormalizationFailure {
    fn new(raw: &str, reason: FailureReason) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}

pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    PLACEHOLDERS
        .iter()
        .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Normalize one raw cell. `Ok(None)` is an explicit "no data" marker.
pub fn normalize(raw: &str, kind: NumericKind) -> Result<Option<f64>, NormalizationFailure> {
    if is_placeholder(raw) {
        return Ok(None);
    }
    let fail = |reason| NormalizationFailure::new(raw, reason);

    let mut body: &str = raw.trim();
    let (negative, rest) = split_sign(body);
    body = rest;

    let has_percent = body.ends_with('%');
    if has_percent {
        if kind != NumericKind::Percentage {
            return Err(fail(FailureReason::SignMismatch));
        }
        body = body[..body.len() - 1].trim_end();
    }

    if let Some(rest) = body.strip_prefix('$') {
        if kind != NumericKind::Currency {
            return Err(fail(FailureReason::SignMismatch));
        }
        body = rest.trim_start();
    }

    let (negative, body) = if negative {
        (true, body)
    } else {
        // "$-12" style: sign after the currency symbol.
        split_sign(body)
    };

    let allow_grouping = matches!(kind, NumericKind::Currency | NumericKind::PlainCount);
    let digits = strip_grouping(body, allow_grouping).ok_or_else(|| fail(FailureReason::Unparseable))?;
    let magnitude = parse_decimal(&digits).ok_or_else(|| fail(FailureReason::Unparseable))?;

    let value = if negative { -magnitude } else { magnitude };
    if !value.is_finite() {
        return Err(fail(FailureReason::OutOfRange));
    }
    if value < 0.0 && matches!(kind, NumericKind::Currency | NumericKind::PlainCount) {
        return Err(fail(FailureReason::OutOfRange));
    }
    Ok(Some(value))
}

fn split_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest.trim_start())
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest.trim_start())
    } else {
        (false, s)
    }
}

/// Remove thousands separators, checking they group the integer part in threes.
fn strip_grouping(s: &str, allow: bool) -> Option<String> {
    if !s.contains(',') {
        return Some(s.to_string());
    }
    if !allow {
        return None;
    }
    let (int_part, frac) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let groups: Vec<&str> = int_part.split(',').collect();
    let first = groups[0];
    if first.is_empty() || first.len() > 3 {
        return None;
    }
    if groups[1..].iter().any(|g| g.len() != 3) {
        return None;
    }
    let mut out = groups.concat();
    if let Some(frac) = frac {
        out.push('.');
        out.push_str(frac);
    }
    Some(out)
}

/// Digits with at most one decimal point; nothing else.
fn parse_decimal(s: &str) -> Option<f64> {
    if s.is_empty() || s == "." {
        return None;
    }
    let mut dots = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => {}
            '.' => dots += 1,
            _ => return None,
        }
    }
    if dots > 1 {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use NumericKind::*;

    fn ok(raw: &str, kind: NumericKind) -> f64 {
        normalize(raw, kind).unwrap().unwrap()
    }

    fn reason(raw: &str, kind: NumericKind) -> FailureReason {
        normalize(raw, kind).unwrap_err().reason
    }

    // -------------------------------------------------------------------------
    // CURRENCY
    // -------------------------------------------------------------------------

    #[test]
    fn test_currency_formats_agree() {
        for raw in ["$1,234,567", "1234567", "$1234567", "1,234,567", " $ 1,234,567 ", "1234567.0"] {
            assert_eq!(ok(raw, Currency), 1234567.0, "{raw}");
        }
        assert_eq!(ok("$1,234.50", Currency), 1234.5);
    }

    #[test]
    fn test_currency_bad_grouping_unparseable() {
        assert_eq!(reason("1,23,4567", Currency), FailureReason::Unparseable);
        assert_eq!(reason(",123", Currency), FailureReason::Unparseable);
        assert_eq!(reason("1234,567", Currency), FailureReason::Unparseable);
    }

    #[test]
    fn test_currency_negative_out_of_range() {
        assert_eq!(reason("-$5", Currency), FailureReason::OutOfRange);
        assert_eq!(reason("$-5", Currency), FailureReason::OutOfRange);
    }

    #[test]
    fn test_currency_with_percent_is_sign_mismatch() {
        assert_eq!(reason("45%", Currency), FailureReason::SignMismatch);
    }

    // -------------------------------------------------------------------------
    // PERCENTAGE
    // -------------------------------------------------------------------------

    #[test]
    fn test_percentage_scale_is_points() {
        assert_eq!(ok("58.5%", Percentage), 58.5);
        assert_eq!(ok("58.5", Percentage), 58.5);
        assert_eq!(ok("58.5 %", Percentage), 58.5);
        assert_eq!(ok("-3.2%", Percentage), -3.2);
    }

    #[test]
    fn test_percentage_with_dollar_is_sign_mismatch() {
        assert_eq!(reason("$58", Percentage), FailureReason::SignMismatch);
    }

    #[test]
    fn test_percent_sign_on_ratio_is_sign_mismatch() {
        assert_eq!(reason("2.5%", Ratio), FailureReason::SignMismatch);
        assert_eq!(reason("12%", PlainCount), FailureReason::SignMismatch);
    }

    // -------------------------------------------------------------------------
    // COUNTS AND RATIOS
    // -------------------------------------------------------------------------

    #[test]
    fn test_plain_count_accepts_grouping() {
        assert_eq!(ok("1,234", PlainCount), 1234.0);
        assert_eq!(ok("987", PlainCount), 987.0);
        assert_eq!(ok("22.5", PlainCount), 22.5);
    }

    #[test]
    fn test_ratio_is_strict() {
        assert_eq!(ok("2.4", Ratio), 2.4);
        assert_eq!(ok("-0.5", Ratio), -0.5);
        assert_eq!(reason("1,2", Ratio), FailureReason::Unparseable);
        assert_eq!(reason("2.4.1", Ratio), FailureReason::Unparseable);
        assert_eq!(reason("2.4x", Ratio), FailureReason::Unparseable);
    }

    #[test]
    fn test_non_numeric_rejected() {
        assert_eq!(reason("12a", PlainCount), FailureReason::Unparseable);
        assert_eq!(reason("1e5", PlainCount), FailureReason::Unparseable);
        assert_eq!(reason("inf", Ratio), FailureReason::Unparseable);
        assert_eq!(reason("--5", PlainCount), FailureReason::Unparseable);
        assert_eq!(reason(".", Ratio), FailureReason::Unparseable);
    }

    #[test]
    fn test_negative_count_out_of_range() {
        assert_eq!(reason("-4", PlainCount), FailureReason::OutOfRange);
    }

    // -------------------------------------------------------------------------
    // PLACEHOLDERS
    // -------------------------------------------------------------------------

    #[test]
    fn test_placeholders_are_no_data_not_zero() {
        for raw in ["", "  ", "n/a", "N/A", "-", "--", "—", "NaN", "null"] {
            for kind in [Currency, Percentage, PlainCount, Ratio] {
                assert_eq!(normalize(raw, kind).unwrap(), None, "{raw:?} as {kind:?}");
            }
        }
    }

    #[test]
    fn test_failure_carries_raw_string() {
        let err = normalize(" 12abc ", PlainCount).unwrap_err();
        assert_eq!(err.raw, " 12abc ");
        assert_eq!(err.to_string(), "cannot normalize ' 12abc ': unparseable");
    }
}
