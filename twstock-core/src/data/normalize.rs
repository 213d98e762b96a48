//! Field normalization for TWSE cell values.
//!
//! The exchange reports every cell as a string: dates in the Minguo (ROC)
//! calendar (`113/10/01`), counts and prices with thousands separators
//! (`"31,275,124"`), and placeholder markers such as `"--"` or `"X0.00"` when
//! no value exists. These helpers turn them into typed values.

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

/// Offset between Minguo years and Gregorian years.
pub const MINGUO_EPOCH_OFFSET: i32 = 1911;

/// A locale date string that could not be converted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed Minguo date '{input}': {reason}")]
pub struct FormatError {
    pub input: String,
    pub reason: String,
}

impl FormatError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Parse an integer cell. JSON integers pass through; strings have their
/// thousands separators stripped. Anything else is `None`.
pub fn parse_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_integer_str(s),
        _ => None,
    }
}

pub fn parse_integer_str(raw: &str) -> Option<i64> {
    strip_separators(raw).parse::<i64>().ok()
}

/// Parse a decimal cell with the same contract as [`parse_integer`].
pub fn parse_decimal(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_decimal_str(s),
        _ => None,
    }
}

pub fn parse_decimal_str(raw: &str) -> Option<f64> {
    strip_separators(raw)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn strip_separators(raw: &str) -> String {
    raw.trim().replace(',', "")
}

/// Convert `YYY/MM/DD` (years since 1911) into a Gregorian date.
///
/// The returned [`NaiveDate`] displays as canonical `YYYY-MM-DD`.
pub fn convert_local_calendar_to_iso(date_str: &str) -> Result<NaiveDate, FormatError> {
    let parts: Vec<&str> = date_str.trim().split('/').collect();
    if parts.len() != 3 {
        return Err(FormatError::new(
            date_str,
            format!("expected 3 '/'-separated components, got {}", parts.len()),
        ));
    }

    let parse = |part: &str, what: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|_| FormatError::new(date_str, format!("{what} '{part}' is not an integer")))
    };
    let year = parse(parts[0], "year")?;
    let month = parse(parts[1], "month")?;
    let day = parse(parts[2], "day")?;

    let year = i32::try_from(year)
        .ok()
        .and_then(|y| y.checked_add(MINGUO_EPOCH_OFFSET))
        .ok_or_else(|| FormatError::new(date_str, "year out of range"))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| FormatError::new(date_str, "not a valid calendar date"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_with_separators() {
        assert_eq!(parse_integer(&json!("1,234")), Some(1234));
        assert_eq!(parse_integer(&json!("31,275,124")), Some(31_275_124));
        assert_eq!(parse_integer(&json!(1234)), Some(1234));
    }

    #[test]
    fn unparseable_integers_are_absent_not_zero() {
        assert_eq!(parse_integer(&json!("bad")), None);
        assert_eq!(parse_integer(&json!("--")), None);
        assert_eq!(parse_integer(&json!("")), None);
        assert_eq!(parse_integer(&json!(null)), None);
        assert_eq!(parse_integer(&json!(12.5)), None);
    }

    #[test]
    fn decimals() {
        assert_eq!(parse_decimal(&json!("1,050.00")), Some(1050.0));
        assert_eq!(parse_decimal(&json!("+1.50")), Some(1.5));
        assert_eq!(parse_decimal(&json!("-0.35")), Some(-0.35));
        assert_eq!(parse_decimal(&json!(0.5)), Some(0.5));
        assert_eq!(parse_decimal(&json!(3)), Some(3.0));
    }

    #[test]
    fn decimal_markers_are_absent() {
        // "X" prefixes a change that has no comparable previous close
        assert_eq!(parse_decimal(&json!("X0.00")), None);
        assert_eq!(parse_decimal(&json!("--")), None);
        assert_eq!(parse_decimal(&json!("NaN")), None);
    }

    #[test]
    fn minguo_to_iso() {
        let date = convert_local_calendar_to_iso("113/10/01").unwrap();
        assert_eq!(date.to_string(), "2024-10-01");
        let date = convert_local_calendar_to_iso("112/10/02").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2023, 10, 2).unwrap());
    }

    #[test]
    fn malformed_dates_fail() {
        assert!(convert_local_calendar_to_iso("abc").is_err());
        assert!(convert_local_calendar_to_iso("113/10").is_err());
        assert!(convert_local_calendar_to_iso("113/10/01/02").is_err());
        assert!(convert_local_calendar_to_iso("113/aa/01").is_err());
        assert!(convert_local_calendar_to_iso("113/13/01").is_err());
        assert!(convert_local_calendar_to_iso("112/02/30").is_err());
    }

    #[test]
    fn format_error_names_the_input() {
        let err = convert_local_calendar_to_iso("abc").unwrap_err();
        assert_eq!(err.input, "abc");
        assert!(err.to_string().contains("abc"));
    }
}
