//! TWSE `STOCK_DAY` page source.
//!
//! One request returns a whole calendar month of daily rows for one ticker.
//! HTTP 429 and 504 are transient: the client waits a fixed back-off and
//! retries the identical request. Every other failure is returned at once.

use super::provider::{FetchError, Page, PageSource};
use super::transport::{HttpResponse, HttpTransport, ReqwestTransport, Sleeper, ThreadSleeper};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.twse.com.tw/exchangeReport/STOCK_DAY";

/// Statuses that are retried instead of failing the page.
const TRANSIENT_STATUSES: &[u16] = &[429, 504];

/// `stat` value of a successful response.
const STAT_OK: &str = "OK";

/// STOCK_DAY JSON response.
#[derive(Debug, Deserialize)]
struct StockDayResponse {
    stat: Option<String>,
    fields: Option<Vec<String>>,
    data: Option<Vec<Vec<Value>>>,
}

/// How transient failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait before each retry.
    pub backoff: Duration,
    /// Retries allowed after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

/// TWSE daily-price client.
pub struct TwseClient {
    transport: Box<dyn HttpTransport>,
    sleeper: Box<dyn Sleeper>,
    retry: RetryPolicy,
    base_url: String,
}

impl TwseClient {
    pub fn new(
        transport: Box<dyn HttpTransport>,
        sleeper: Box<dyn Sleeper>,
        retry: RetryPolicy,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            sleeper,
            retry,
            base_url: base_url.into(),
        }
    }

    /// Client over a real `reqwest` transport that sleeps the current thread.
    pub fn with_reqwest(
        timeout: Duration,
        retry: RetryPolicy,
        base_url: impl Into<String>,
    ) -> Result<Self, FetchError> {
        let transport = ReqwestTransport::new(timeout)?;
        Ok(Self::new(
            Box::new(transport),
            Box::new(ThreadSleeper),
            retry,
            base_url,
        ))
    }

    /// Request URL for the month containing `period`. The day is always `01`.
    pub fn page_url(&self, period: NaiveDate, ticker_code: &str) -> String {
        format!(
            "{}?response=json&date={}&stockNo={ticker_code}",
            self.base_url,
            period.format("%Y%m01")
        )
    }

    /// Issue the request, retrying transient statuses.
    fn get_with_retry(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let resp = self.transport.get(url)?;

            if TRANSIENT_STATUSES.contains(&resp.status) {
                if let Some(max) = self.retry.max_retries {
                    if attempts > max {
                        return Err(FetchError::RetriesExhausted { attempts });
                    }
                }
                warn!(
                    status = resp.status,
                    attempt = attempts,
                    backoff_secs = self.retry.backoff.as_secs(),
                    "transient provider error, retrying {url}"
                );
                self.sleeper.sleep(self.retry.backoff);
                continue;
            }

            if !resp.is_success() {
                return Err(FetchError::HttpStatus {
                    status: resp.status,
                    url: url.to_string(),
                });
            }

            return Ok(resp);
        }
    }

    /// Parse a response body into a page, or `None` for the no-data envelope.
    fn parse_body(body: &str) -> Result<Option<Page>, FetchError> {
        let resp: StockDayResponse = serde_json::from_str(body)
            .map_err(|e| FetchError::ResponseFormatChanged(format!("invalid JSON body: {e}")))?;

        let data = match resp.data {
            Some(data) => data,
            None => {
                return match resp.stat.as_deref() {
                    Some(stat) if stat != STAT_OK => {
                        debug!("provider returned no data: {stat}");
                        Ok(None)
                    }
                    _ => Err(FetchError::ResponseFormatChanged(
                        "response has no data array".into(),
                    )),
                };
            }
        };

        let fields = resp.fields.ok_or_else(|| {
            FetchError::ResponseFormatChanged("response has data but no fields".into())
        })?;

        if let Some((i, row)) = data
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != fields.len())
        {
            return Err(FetchError::ResponseFormatChanged(format!(
                "row {i} has {} cells, expected {}",
                row.len(),
                fields.len()
            )));
        }

        Ok(Some(Page { fields, data }))
    }
}

impl PageSource for TwseClient {
    fn name(&self) -> &str {
        "twse_stock_day"
    }

    fn fetch(&self, period: NaiveDate, ticker_code: &str) -> Result<Option<Page>, FetchError> {
        let url = self.page_url(period, ticker_code);
        let resp = self.get_with_retry(&url)?;
        Self::parse_body(&resp.body)
    }
}
