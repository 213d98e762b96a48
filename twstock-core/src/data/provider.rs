//! Page source trait and structured fetch errors.
//!
//! The PageSource trait abstracts over the exchange endpoint so the loader can
//! be driven by the real TWSE client or a scripted source in tests.

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

/// One month of rows for one ticker, as the provider labels them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Ordered column labels in the provider's language.
    pub fields: Vec<String>,
    /// Rows of raw cells, positionally matching `fields`.
    pub data: Vec<Vec<Value>>,
}

impl Page {
    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

/// Structured error types for fetch operations.
///
/// `HttpStatus`, `NetworkUnreachable` and `RetriesExhausted` are remote
/// failures; `ResponseFormatChanged` means the body arrived but could not be
/// understood.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("http client setup failed: {0}")]
    ClientSetup(String),
}

impl FetchError {
    /// True for failures where the provider could not be reached or refused us.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            FetchError::HttpStatus { .. }
                | FetchError::NetworkUnreachable(_)
                | FetchError::RetriesExhausted { .. }
        )
    }
}

/// Trait for paged daily-price sources.
pub trait PageSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the calendar month containing `period` for one ticker.
    ///
    /// `Ok(None)` means the provider answered but had no rows for that month.
    fn fetch(&self, period: NaiveDate, ticker_code: &str) -> Result<Option<Page>, FetchError>;
}
