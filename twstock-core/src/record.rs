//! Row and table identity types shared by every stage of the pipeline.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One trading day for one ticker, fully normalized.
///
/// Numeric fields the provider could not supply (or that failed to parse) are
/// `None`. They are never coerced to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerRecord {
    pub date: NaiveDate,
    pub ticker_code: String,
    pub shares_traded: Option<i64>,
    pub trade_value: Option<i64>,
    pub opening_price: Option<f64>,
    pub high_price: Option<f64>,
    pub low_price: Option<f64>,
    pub closing_price: Option<f64>,
    pub price_change: Option<f64>,
    pub transaction_count: Option<i64>,
    pub update_timestamp: NaiveDateTime,
}

/// Inclusive date range to request from the provider for a single ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchWindow {
    pub ticker_code: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn new(ticker_code: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            ticker_code: ticker_code.into(),
            start,
            end,
        }
    }

    /// A window whose start is after its end fetches nothing.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Name of a table in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The three tables the swap protocol rotates contents through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTriplet {
    pub production: TableRef,
    pub backup: TableRef,
    pub temporary: TableRef,
}

impl TableTriplet {
    /// Build a triplet, rejecting names that are empty or not pairwise distinct.
    pub fn new(
        production: impl Into<TableRef>,
        backup: impl Into<TableRef>,
        temporary: impl Into<TableRef>,
    ) -> Result<Self, String> {
        let triplet = Self {
            production: production.into(),
            backup: backup.into(),
            temporary: temporary.into(),
        };
        triplet.validate()?;
        Ok(triplet)
    }

    pub fn validate(&self) -> Result<(), String> {
        for table in [&self.production, &self.backup, &self.temporary] {
            if table.as_str().trim().is_empty() {
                return Err("table names must not be empty".into());
            }
        }
        if self.production == self.backup
            || self.production == self.temporary
            || self.backup == self.temporary
        {
            return Err(format!(
                "production, backup and temporary tables must be distinct \
                 (got '{}', '{}', '{}')",
                self.production, self.backup, self.temporary
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplet_rejects_shared_names() {
        assert!(TableTriplet::new("prices", "prices", "prices_tmp").is_err());
        assert!(TableTriplet::new("prices", "prices_bak", "prices_bak").is_err());
        assert!(TableTriplet::new("prices", "", "prices_tmp").is_err());
        assert!(TableTriplet::new("prices", "prices_bak", "prices_tmp").is_ok());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let w = FetchWindow::new(
            "2330",
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        assert!(w.contains(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(w.contains(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()));
        assert!(!w.contains(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));
        assert!(!w.is_empty());
    }
}
