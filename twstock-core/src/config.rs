//! Pipeline configuration, loaded from TOML.
//!
//! ```toml
//! start_date = "2023-10-01"
//! ticker_codes = ["2330", "0050"]
//!
//! [tables]
//! production = "Log_Taiwan_Stock"
//! backup = "Log_Taiwan_Stock_Backup"
//! temporary = "Log_Taiwan_Stock_Temp"
//!
//! [store]
//! root = "warehouse"
//!
//! [remote]
//! backoff_secs = 60
//! ```

use crate::data::twse::{RetryPolicy, DEFAULT_BASE_URL};
use crate::record::TableTriplet;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything one pipeline run needs to know.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Window floor for tickers without a watermark.
    pub start_date: NaiveDate,

    /// Tickers processed in order.
    pub ticker_codes: Vec<String>,

    pub tables: TableTriplet,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Where the Parquet table store lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("warehouse"),
        }
    }
}

/// Remote endpoint and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Fixed wait before retrying a 429/504.
    pub backoff_secs: u64,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Retries allowed per page. Unset retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff_secs: 60,
            timeout_secs: 30,
            max_retries: None,
        }
    }
}

impl RemoteConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs(self.backoff_secs),
            max_retries: self.max_retries,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticker_codes.is_empty() {
            return Err(ConfigError::Invalid("ticker_codes must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for code in &self.ticker_codes {
            if code.trim().is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(ConfigError::Invalid(format!(
                    "ticker code '{code}' must be non-empty and alphanumeric"
                )));
            }
            if !seen.insert(code.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate ticker code '{code}'")));
            }
        }
        self.tables.validate().map_err(ConfigError::Invalid)?;
        if self.remote.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("remote.base_url must not be empty".into()));
        }
        Ok(())
    }
}
