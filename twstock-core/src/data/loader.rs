//! Incremental loader: month-paged fetch and normalization for one ticker.
//!
//! The provider pages by calendar month, so the loader walks month-start
//! boundaries across the window, normalizes each page into
//! [`TickerRecord`]s and drops rows that fall outside the window. Any error
//! aborts the ticker; a partial segment is never returned.

use super::normalize::{
    convert_local_calendar_to_iso, parse_decimal, parse_integer, FormatError,
};
use super::provider::{FetchError, Page, PageSource};
use crate::record::{FetchWindow, TickerRecord};
use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info};

/// Provider labels and the canonical column each one maps to.
pub const FIELD_LABELS: &[(&str, &str)] = &[
    ("日期", "date"),
    ("成交股數", "shares_traded"),
    ("成交金額", "trade_value"),
    ("開盤價", "opening_price"),
    ("最高價", "high_price"),
    ("最低價", "low_price"),
    ("收盤價", "closing_price"),
    ("漲跌價差", "price_change"),
    ("成交筆數", "transaction_count"),
];

/// Canonical column name for a provider label.
pub fn canonical_column(label: &str) -> Option<&'static str> {
    FIELD_LABELS
        .iter()
        .find(|(l, _)| *l == label.trim())
        .map(|(_, c)| *c)
}

/// Why one ticker's load was abandoned.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("fetch failed for {ticker} (period {period}): {source}")]
    Fetch {
        ticker: String,
        period: NaiveDate,
        #[source]
        source: FetchError,
    },

    #[error("page for {ticker} (period {period}) has no date column")]
    MissingDateColumn { ticker: String, period: NaiveDate },

    #[error("bad date in {ticker} (period {period}): {source}")]
    Format {
        ticker: String,
        period: NaiveDate,
        #[source]
        source: FormatError,
    },
}

/// Row-level normalization failure, before ticker/period context is attached.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("page has no date column")]
    MissingDateColumn,

    #[error("bad date: {0}")]
    Format(#[source] FormatError),
}

// ── Month paging ────────────────────────────────────────────────────

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.day0()))
}

/// First day of the month after the one containing `date`.
///
/// Adds 32 days to the month start (always lands in the next month) and
/// clamps back to day 1. `None` only at the end of the representable range.
pub fn next_month_start(date: NaiveDate) -> Option<NaiveDate> {
    month_start(date)
        .checked_add_days(Days::new(32))
        .map(month_start)
}

/// Iterator over the month starts covering `[start, end]`.
#[derive(Debug, Clone)]
pub struct MonthStarts {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for MonthStarts {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next.filter(|d| *d <= self.end)?;
        self.next = next_month_start(current);
        Some(current)
    }
}

pub fn month_starts(start: NaiveDate, end: NaiveDate) -> MonthStarts {
    MonthStarts {
        next: (start <= end).then(|| month_start(start)),
        end,
    }
}

// ── Page normalization ──────────────────────────────────────────────

/// Normalize every row of a page into records for `ticker_code`.
pub fn records_from_page(
    page: &Page,
    ticker_code: &str,
    update_timestamp: NaiveDateTime,
) -> Result<Vec<TickerRecord>, PageError> {
    let mut index: BTreeMap<&'static str, usize> = BTreeMap::new();
    for (i, label) in page.fields.iter().enumerate() {
        match canonical_column(label) {
            Some(column) => {
                index.insert(column, i);
            }
            None => debug!("ignoring unknown provider field '{label}'"),
        }
    }

    let date_idx = *index.get("date").ok_or(PageError::MissingDateColumn)?;

    page.data
        .iter()
        .map(|row| {
            let cell = |column: &str| index.get(column).and_then(|&i| row.get(i));
            let int = |column: &str| cell(column).and_then(parse_integer);
            let dec = |column: &str| cell(column).and_then(parse_decimal);

            let date = match row.get(date_idx) {
                Some(Value::String(s)) => convert_local_calendar_to_iso(s),
                other => convert_local_calendar_to_iso(
                    &other.map(|v| v.to_string()).unwrap_or_default(),
                ),
            }
            .map_err(PageError::Format)?;

            Ok(TickerRecord {
                date,
                ticker_code: ticker_code.to_string(),
                shares_traded: int("shares_traded"),
                trade_value: int("trade_value"),
                opening_price: dec("opening_price"),
                high_price: dec("high_price"),
                low_price: dec("low_price"),
                closing_price: dec("closing_price"),
                price_change: dec("price_change"),
                transaction_count: int("transaction_count"),
                update_timestamp,
            })
        })
        .collect()
}

// ── Loader ──────────────────────────────────────────────────────────

/// Drives a [`PageSource`] across a fetch window.
pub struct IncrementalLoader<'a> {
    source: &'a dyn PageSource,
}

impl<'a> IncrementalLoader<'a> {
    pub fn new(source: &'a dyn PageSource) -> Self {
        Self { source }
    }

    /// Fetch and normalize every month in the window.
    ///
    /// Returns the records sorted by date, one per date (a later page wins).
    pub fn load(
        &self,
        window: &FetchWindow,
        update_timestamp: NaiveDateTime,
    ) -> Result<Vec<TickerRecord>, LoadError> {
        let ticker = window.ticker_code.as_str();
        let mut staged: BTreeMap<NaiveDate, TickerRecord> = BTreeMap::new();
        let mut dropped = 0usize;

        for period in month_starts(window.start, window.end) {
            let page = match self.source.fetch(period, ticker) {
                Ok(Some(page)) => page,
                Ok(None) => {
                    debug!(ticker, %period, "no page, skipping month");
                    continue;
                }
                Err(source) => {
                    error!(
                        ticker,
                        %period,
                        provider = self.source.name(),
                        remote = source.is_remote(),
                        "fetch failed: {source}"
                    );
                    return Err(LoadError::Fetch {
                        ticker: ticker.to_string(),
                        period,
                        source,
                    });
                }
            };

            let records = records_from_page(&page, ticker, update_timestamp).map_err(|e| {
                error!(ticker, %period, "page normalization failed: {e}");
                match e {
                    PageError::MissingDateColumn => LoadError::MissingDateColumn {
                        ticker: ticker.to_string(),
                        period,
                    },
                    PageError::Format(source) => LoadError::Format {
                        ticker: ticker.to_string(),
                        period,
                        source,
                    },
                }
            })?;

            for record in records {
                if window.contains(record.date) {
                    staged.insert(record.date, record);
                } else {
                    dropped += 1;
                }
            }
        }

        info!(
            ticker,
            start = %window.start,
            end = %window.end,
            rows = staged.len(),
            dropped_outside_window = dropped,
            "loaded window"
        );
        Ok(staged.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn stamp() -> NaiveDateTime {
        d(2023, 10, 31).and_hms_opt(18, 0, 0).unwrap()
    }

    fn labels() -> Vec<String> {
        FIELD_LABELS.iter().map(|(l, _)| l.to_string()).collect()
    }

    fn row(date: &str, close: &str) -> Vec<Value> {
        vec![
            json!(date),
            json!("31,275,124"),
            json!("4,134,533,240"),
            json!("131.50"),
            json!("132.60"),
            json!("131.25"),
            json!(close),
            json!("+0.85"),
            json!("18,733"),
        ]
    }

    /// Serves pages keyed by month start and records the periods requested.
    struct MapSource {
        pages: HashMap<NaiveDate, Result<Option<Page>, String>>,
        requested: Mutex<Vec<NaiveDate>>,
    }

    impl MapSource {
        fn new(pages: Vec<(NaiveDate, Result<Option<Page>, String>)>) -> Self {
            Self {
                pages: pages.into_iter().collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageSource for MapSource {
        fn name(&self) -> &str {
            "map"
        }

        fn fetch(&self, period: NaiveDate, _ticker: &str) -> Result<Option<Page>, FetchError> {
            self.requested.lock().unwrap().push(period);
            match self.pages.get(&period) {
                Some(Ok(page)) => Ok(page.clone()),
                Some(Err(msg)) => Err(FetchError::ResponseFormatChanged(msg.clone())),
                None => Ok(None),
            }
        }
    }

    #[test]
    fn month_start_clamps_to_day_one() {
        assert_eq!(month_start(d(2024, 2, 29)), d(2024, 2, 1));
        assert_eq!(month_start(d(2024, 3, 1)), d(2024, 3, 1));
    }

    #[test]
    fn next_month_handles_short_and_long_months() {
        assert_eq!(next_month_start(d(2024, 1, 31)), Some(d(2024, 2, 1)));
        assert_eq!(next_month_start(d(2024, 2, 1)), Some(d(2024, 3, 1)));
        assert_eq!(next_month_start(d(2023, 12, 15)), Some(d(2024, 1, 1)));
    }

    #[test]
    fn month_iteration_is_inclusive() {
        let months: Vec<_> = month_starts(d(2023, 10, 15), d(2024, 1, 1)).collect();
        assert_eq!(
            months,
            vec![d(2023, 10, 1), d(2023, 11, 1), d(2023, 12, 1), d(2024, 1, 1)]
        );
        assert_eq!(month_starts(d(2024, 2, 1), d(2024, 1, 31)).count(), 0);
    }

    #[test]
    fn page_rows_become_records() {
        let page = Page {
            fields: labels(),
            data: vec![row("112/10/02", "132.00")],
        };
        let records = records_from_page(&page, "0050", stamp()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.date, d(2023, 10, 2));
        assert_eq!(r.ticker_code, "0050");
        assert_eq!(r.shares_traded, Some(31_275_124));
        assert_eq!(r.trade_value, Some(4_134_533_240));
        assert_eq!(r.closing_price, Some(132.0));
        assert_eq!(r.price_change, Some(0.85));
        assert_eq!(r.transaction_count, Some(18_733));
        assert_eq!(r.update_timestamp, stamp());
    }

    #[test]
    fn unparseable_numbers_stay_absent() {
        let mut r = row("112/10/02", "--");
        r[7] = json!("X0.00");
        let page = Page {
            fields: labels(),
            data: vec![r],
        };
        let records = records_from_page(&page, "2330", stamp()).unwrap();
        assert_eq!(records[0].closing_price, None);
        assert_eq!(records[0].price_change, None);
    }

    #[test]
    fn missing_labels_are_absent_and_unknown_labels_ignored() {
        let page = Page {
            fields: vec!["日期".into(), "註記".into(), "收盤價".into()],
            data: vec![vec![json!("112/10/02"), json!("note"), json!("55.10")]],
        };
        let records = records_from_page(&page, "2330", stamp()).unwrap();
        assert_eq!(records[0].closing_price, Some(55.1));
        assert_eq!(records[0].shares_traded, None);
    }

    #[test]
    fn page_without_date_label_is_rejected() {
        let page = Page {
            fields: vec!["收盤價".into()],
            data: vec![vec![json!("55.10")]],
        };
        assert!(matches!(
            records_from_page(&page, "2330", stamp()),
            Err(PageError::MissingDateColumn)
        ));
    }

    #[test]
    fn page_errors_carry_their_cause() {
        let page = Page {
            fields: labels(),
            data: vec![row("112/13/40", "1.00")],
        };
        let err = records_from_page(&page, "2330", stamp()).unwrap_err();
        assert!(matches!(err, PageError::Format(_)));
        assert!(err.to_string().starts_with("bad date: "));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(
            PageError::MissingDateColumn.to_string(),
            "page has no date column"
        );
    }

    #[test]
    fn loader_visits_every_month_and_filters_window() {
        let source = MapSource::new(vec![
            (
                d(2023, 10, 1),
                Ok(Some(Page {
                    fields: labels(),
                    data: vec![row("112/10/02", "1.00"), row("112/10/20", "2.00")],
                })),
            ),
            (d(2023, 11, 1), Ok(None)),
            (
                d(2023, 12, 1),
                Ok(Some(Page {
                    fields: labels(),
                    data: vec![row("112/12/01", "3.00"), row("112/12/29", "4.00")],
                })),
            ),
        ]);
        let loader = IncrementalLoader::new(&source);
        let window = FetchWindow::new("2330", d(2023, 10, 10), d(2023, 12, 15));
        let records = loader.load(&window, stamp()).unwrap();

        assert_eq!(
            *source.requested.lock().unwrap(),
            vec![d(2023, 10, 1), d(2023, 11, 1), d(2023, 12, 1)]
        );
        let dates: Vec<_> = records.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2023, 10, 20), d(2023, 12, 1)]);
    }

    #[test]
    fn loader_aborts_ticker_on_page_error() {
        let source = MapSource::new(vec![
            (
                d(2023, 10, 1),
                Ok(Some(Page {
                    fields: labels(),
                    data: vec![row("112/10/02", "1.00")],
                })),
            ),
            (d(2023, 11, 1), Err("bad json".into())),
        ]);
        let loader = IncrementalLoader::new(&source);
        let window = FetchWindow::new("2330", d(2023, 10, 1), d(2023, 12, 31));
        match loader.load(&window, stamp()) {
            Err(LoadError::Fetch { ticker, period, .. }) => {
                assert_eq!(ticker, "2330");
                assert_eq!(period, d(2023, 11, 1));
            }
            other => panic!("expected Fetch error, got {other:?}"),
        }
        // December is never requested once November failed
        assert_eq!(source.requested.lock().unwrap().len(), 2);
    }

    #[test]
    fn bad_date_cell_aborts_with_format_error() {
        let source = MapSource::new(vec![(
            d(2023, 10, 1),
            Ok(Some(Page {
                fields: labels(),
                data: vec![row("oops", "1.00")],
            })),
        )]);
        let loader = IncrementalLoader::new(&source);
        let window = FetchWindow::new("2330", d(2023, 10, 1), d(2023, 10, 31));
        assert!(matches!(
            loader.load(&window, stamp()),
            Err(LoadError::Format { .. })
        ));
    }
}
