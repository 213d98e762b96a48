//! Shared fixtures for integration tests: a fake STOCK_DAY endpoint, a
//! recording sleeper, and record/config builders.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use twstock_core::data::{FetchError, HttpResponse, HttpTransport, RetryPolicy, Sleeper, TwseClient};
use twstock_core::{PipelineConfig, TickerRecord};

pub const BASE_URL: &str = "http://twse.test/exchangeReport/STOCK_DAY";

pub const LABELS: [&str; 9] = [
    "日期",
    "成交股數",
    "成交金額",
    "開盤價",
    "最高價",
    "最低價",
    "收盤價",
    "漲跌價差",
    "成交筆數",
];

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
    date.and_hms_opt(h, m, 0).unwrap()
}

/// A STOCK_DAY body with the provider's labels and the given rows.
pub fn stock_day_body(rows: &[[&str; 9]]) -> String {
    json!({
        "stat": "OK",
        "fields": LABELS,
        "data": rows,
    })
    .to_string()
}

/// The envelope TWSE returns for a month with no trading rows.
pub fn no_data_body() -> String {
    json!({ "stat": "很抱歉，沒有符合條件的資料!" }).to_string()
}

/// Five trading days of 0050 in October 2023, formatted as TWSE sends them.
pub fn october_0050() -> Vec<[&'static str; 9]> {
    vec![
        ["112/10/02", "12,345,678", "1,512,345,678", "122.50", "123.80", "122.10", "123.45", "+0.95", "8,765"],
        ["112/10/03", "9,876,543", "1,201,234,567", "123.00", "123.20", "121.35", "121.60", "-1.85", "7,001"],
        ["112/10/04", "15,000,000", "1,812,000,000", "120.90", "121.70", "120.50", "121.05", "-0.55", "10,234"],
        ["112/10/05", "8,000,100", "975,012,300", "121.50", "122.40", "121.30", "122.15", "+1.10", "6,120"],
        ["112/10/06", "7,654,321", "937,777,777", "122.30", "122.80", "122.00", "122.60", "+0.45", "5,432"],
    ]
}

#[derive(Default)]
struct FakeState {
    /// (stockNo, date param) -> body
    pages: HashMap<(String, String), String>,
    /// (stockNo, date param) -> statuses answered before the page
    transient: HashMap<(String, String), VecDeque<u16>>,
    /// stockNo -> status answered for every request
    broken: HashMap<String, u16>,
    requests: Vec<String>,
}

/// In-process stand-in for the STOCK_DAY endpoint.
///
/// Unknown months answer with the no-data envelope.
#[derive(Clone, Default)]
pub struct FakeTwse {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTwse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `ticker` and the month whose `date` param is `yyyymm01`.
    pub fn page(&self, ticker: &str, yyyymm01: &str, body: String) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert((ticker.into(), yyyymm01.into()), body);
    }

    /// Answer `status` once before serving the page.
    pub fn throttle_once(&self, ticker: &str, yyyymm01: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .transient
            .entry((ticker.into(), yyyymm01.into()))
            .or_default()
            .push_back(status);
    }

    /// Answer `status` for every request about `ticker`.
    pub fn break_ticker(&self, ticker: &str, status: u16) {
        self.state.lock().unwrap().broken.insert(ticker.into(), status);
    }

    pub fn heal_ticker(&self, ticker: &str) {
        self.state.lock().unwrap().broken.remove(ticker);
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }
}

fn query_param<'u>(url: &'u str, key: &str) -> &'u str {
    url.split_once('?')
        .map(|(_, q)| q)
        .unwrap_or_default()
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .unwrap_or_default()
}

impl HttpTransport for FakeTwse {
    fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(url.to_string());

        let key = (
            query_param(url, "stockNo").to_string(),
            query_param(url, "date").to_string(),
        );
        if let Some(&status) = state.broken.get(&key.0) {
            return Ok(HttpResponse {
                status,
                body: String::new(),
            });
        }
        if let Some(status) = state.transient.get_mut(&key).and_then(|q| q.pop_front()) {
            return Ok(HttpResponse {
                status,
                body: String::new(),
            });
        }
        let body = state.pages.get(&key).cloned().unwrap_or_else(no_data_body);
        Ok(HttpResponse { status: 200, body })
    }
}

/// Records every back-off instead of sleeping.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

pub fn client(fake: &FakeTwse, sleeper: &RecordingSleeper) -> TwseClient {
    TwseClient::new(
        Box::new(fake.clone()),
        Box::new(sleeper.clone()),
        RetryPolicy::default(),
        BASE_URL,
    )
}

pub fn config(tickers: &[&str], start: &str) -> PipelineConfig {
    let codes: Vec<String> = tickers.iter().map(|t| format!("\"{t}\"")).collect();
    PipelineConfig::from_toml_str(&format!(
        r#"
        start_date = "{start}"
        ticker_codes = [{}]

        [tables]
        production = "Log_Taiwan_Stock"
        backup = "Log_Taiwan_Stock_Backup"
        temporary = "Log_Taiwan_Stock_Temp"

        [remote]
        base_url = "{BASE_URL}"
        "#,
        codes.join(", ")
    ))
    .unwrap()
}

pub fn record(ticker: &str, date: NaiveDate, close: Option<f64>) -> TickerRecord {
    TickerRecord {
        date,
        ticker_code: ticker.into(),
        shares_traded: Some(1_000),
        trade_value: Some(100_000),
        opening_price: close,
        high_price: close,
        low_price: close,
        closing_price: close,
        price_change: Some(0.0),
        transaction_count: Some(10),
        update_timestamp: at(date, 18, 0),
    }
}

/// Rows without their batch timestamp, for comparing runs.
pub fn without_stamp(rows: &[TickerRecord]) -> Vec<TickerRecord> {
    let epoch = at(d(1970, 1, 1), 0, 0);
    rows.iter()
        .cloned()
        .map(|mut r| {
            r.update_timestamp = epoch;
            r
        })
        .collect()
}
