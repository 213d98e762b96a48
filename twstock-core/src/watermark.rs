//! Watermark resolution: where each ticker's incremental fetch starts.

use crate::data::loader::month_start;
use crate::record::{FetchWindow, TableRef};
use crate::store::{StoreError, TableStore};
use chrono::NaiveDate;
use tracing::debug;

/// Reads per-ticker watermarks from the production table.
pub struct WatermarkResolver<'a> {
    store: &'a dyn TableStore,
    production: &'a TableRef,
}

impl<'a> WatermarkResolver<'a> {
    pub fn new(store: &'a dyn TableStore, production: &'a TableRef) -> Self {
        Self { store, production }
    }

    /// Latest date already recorded for `ticker_code`.
    ///
    /// `None` when the ticker has no rows or production does not exist yet.
    pub fn latest_date(&self, ticker_code: &str) -> Result<Option<NaiveDate>, StoreError> {
        if !self.store.table_exists(self.production)? {
            debug!(table = %self.production, "production table absent, no watermark");
            return Ok(None);
        }
        self.store.max_date(self.production, ticker_code)
    }

    /// Window to fetch for `ticker_code`.
    ///
    /// Starts at the first day of the watermark's month, so that month is
    /// fetched again in full; falls back to `default_start` without a
    /// watermark. Ends at `today`.
    pub fn resolve_window(
        &self,
        ticker_code: &str,
        default_start: NaiveDate,
        today: NaiveDate,
    ) -> Result<FetchWindow, StoreError> {
        let start = match self.latest_date(ticker_code)? {
            Some(watermark) => month_start(watermark),
            None => default_start,
        };
        Ok(FetchWindow::new(ticker_code, start, today))
    }
}
