//! Pipeline orchestrator.
//!
//! One run, strictly sequential:
//! 1. Repair an interrupted swap left by a previous run
//! 2. Recreate the temporary table from the backup (or production) schema
//! 3. Per ticker: resolve watermark → load window → merge with stored rows by
//!    date (fetched rows win) → write to the temporary table
//! 4. Carry over production rows for tickers outside the configured set
//! 5. Publish the temporary table
//!
//! A failing ticker is logged, reported in the summary, and has its existing
//! production rows carried over unchanged; the run continues and publishes.

use crate::config::PipelineConfig;
use crate::data::loader::{IncrementalLoader, LoadError};
use crate::data::provider::PageSource;
use crate::publish::{AtomicPublisher, PublishError, PublishReport, RecoveryAction};
use crate::record::{FetchWindow, TableRef};
use crate::schema::{ticker_record_schema, validate_schema, CLUSTERING_FIELDS};
use crate::store::{RowFilter, StoreError, TableStore};
use crate::watermark::WatermarkResolver;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that abort the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("swap recovery failed: {0}")]
    Recovery(#[source] PublishError),

    #[error("could not prepare temporary table {table}: {source}")]
    Staging {
        table: TableRef,
        #[source]
        source: StoreError,
    },

    #[error("schema of {table} does not match the ticker record contract: {}", .errors.join("; "))]
    SchemaMismatch { table: TableRef, errors: Vec<String> },

    #[error("could not carry over existing rows: {0}")]
    CarryOver(#[source] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Why a single ticker was skipped.
#[derive(Debug, Error)]
pub enum TickerError {
    #[error("watermark query failed: {0}")]
    Watermark(#[source] StoreError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("writing to temporary table failed: {0}")]
    Staging(#[source] StoreError),
}

/// Result for one successfully processed ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerOutcome {
    pub ticker_code: String,
    pub window: FetchWindow,
    /// Rows fetched from the provider inside the window.
    pub fetched_rows: usize,
    /// Existing production rows kept because no fetched row replaced them.
    pub history_rows: usize,
    /// Of `history_rows`, those dated inside the window: stored dates the
    /// provider did not return this run.
    pub kept_in_window: usize,
}

/// Summary of one run.
#[derive(Debug)]
pub struct RunSummary {
    pub update_timestamp: NaiveDateTime,
    pub recovery: RecoveryAction,
    pub succeeded: Vec<TickerOutcome>,
    pub failed: Vec<(String, TickerError)>,
    /// Production rows copied unchanged (failed and unconfigured tickers).
    pub carried_over_rows: usize,
    pub publish: PublishReport,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_tickers(&self) -> Vec<&str> {
        self.failed.iter().map(|(t, _)| t.as_str()).collect()
    }
}

/// Sequences watermark → load → publish for the configured tickers.
pub struct Pipeline<'a> {
    store: &'a dyn TableStore,
    source: &'a dyn PageSource,
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn TableStore,
        source: &'a dyn PageSource,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// Run now: today's local date is the window end and the batch timestamp.
    pub fn run(&self) -> Result<RunSummary, PipelineError> {
        let now = chrono::Local::now().naive_local();
        self.run_at(now.date(), now)
    }

    /// Run with an explicit window end and batch timestamp.
    pub fn run_at(
        &self,
        today: NaiveDate,
        update_timestamp: NaiveDateTime,
    ) -> Result<RunSummary, PipelineError> {
        let tables = &self.config.tables;
        let publisher = AtomicPublisher::new(self.store, tables);

        let recovery = publisher.recover().map_err(PipelineError::Recovery)?;
        self.prepare_temporary_table()?;

        let production_exists = self
            .store
            .table_exists(&tables.production)
            .map_err(PipelineError::CarryOver)?;
        let resolver = WatermarkResolver::new(self.store, &tables.production);
        let loader = IncrementalLoader::new(self.source);

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut carried_over_rows = 0;

        let total = self.config.ticker_codes.len();
        for (i, ticker) in self.config.ticker_codes.iter().enumerate() {
            info!("[{}/{}] processing {ticker}", i + 1, total);
            match self.process_ticker(
                ticker,
                &resolver,
                &loader,
                production_exists,
                today,
                update_timestamp,
            ) {
                Ok(outcome) => {
                    info!(
                        ticker = %outcome.ticker_code,
                        fetched = outcome.fetched_rows,
                        history = outcome.history_rows,
                        "ticker staged"
                    );
                    succeeded.push(outcome);
                }
                Err(e) => {
                    warn!(ticker = %ticker, "ticker failed, keeping existing rows: {e}");
                    if production_exists {
                        carried_over_rows +=
                            self.carry_over(&RowFilter::ticker(ticker.as_str()), |_| true)?;
                    }
                    failed.push((ticker.clone(), e));
                }
            }
        }

        if production_exists {
            let configured: HashSet<&str> =
                self.config.ticker_codes.iter().map(String::as_str).collect();
            carried_over_rows += self.carry_over(&RowFilter::default(), |code| {
                !configured.contains(code)
            })?;
        }

        let publish = publisher.publish()?;

        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            published_rows = publish.published_rows,
            "run complete"
        );
        if !failed.is_empty() {
            let failed_tickers: Vec<&str> = failed.iter().map(|(t, _)| t.as_str()).collect();
            error!(tickers = ?failed_tickers, "some tickers failed");
        }

        Ok(RunSummary {
            update_timestamp,
            recovery,
            succeeded,
            failed,
            carried_over_rows,
            publish,
        })
    }

    /// Drop and recreate the temporary table with a validated schema.
    fn prepare_temporary_table(&self) -> Result<(), PipelineError> {
        let tables = &self.config.tables;
        let staging_err = |source| PipelineError::Staging {
            table: tables.temporary.clone(),
            source,
        };

        let mut schema_source = None;
        for candidate in [&tables.backup, &tables.production] {
            if self.store.table_exists(candidate).map_err(staging_err)? {
                schema_source = Some(candidate);
                break;
            }
        }

        let schema = match schema_source {
            Some(table) => {
                let schema = self.store.table_schema(table).map_err(staging_err)?;
                let validation = validate_schema(&schema);
                if !validation.is_valid {
                    return Err(PipelineError::SchemaMismatch {
                        table: table.clone(),
                        errors: validation.errors,
                    });
                }
                schema
            }
            None => ticker_record_schema(),
        };

        self.store
            .delete_table(&tables.temporary, true)
            .map_err(staging_err)?;
        self.store
            .create_table(&tables.temporary, &schema, CLUSTERING_FIELDS)
            .map_err(staging_err)?;
        info!(
            table = %tables.temporary,
            schema_from = schema_source.map_or("contract", |t| t.as_str()),
            "temporary table created"
        );
        Ok(())
    }

    fn process_ticker(
        &self,
        ticker: &str,
        resolver: &WatermarkResolver<'_>,
        loader: &IncrementalLoader<'_>,
        production_exists: bool,
        today: NaiveDate,
        update_timestamp: NaiveDateTime,
    ) -> Result<TickerOutcome, TickerError> {
        let tables = &self.config.tables;
        let window = resolver
            .resolve_window(ticker, self.config.start_date, today)
            .map_err(TickerError::Watermark)?;

        let fetched = if window.is_empty() {
            info!(ticker, start = %window.start, end = %window.end, "window empty, nothing to fetch");
            Vec::new()
        } else {
            loader.load(&window, update_timestamp)?
        };

        // Fetched rows replace stored rows of the same date; every other
        // stored row for the ticker is kept.
        let history = if production_exists {
            let fetched_dates: HashSet<NaiveDate> = fetched.iter().map(|r| r.date).collect();
            let mut stored = self
                .store
                .scan(&tables.production, &RowFilter::ticker(ticker))
                .map_err(TickerError::Staging)?;
            stored.retain(|r| !fetched_dates.contains(&r.date));
            stored
        } else {
            Vec::new()
        };

        let kept_in_window = history.iter().filter(|r| window.contains(r.date)).count();
        if kept_in_window > 0 {
            warn!(
                ticker,
                start = %window.start,
                end = %window.end,
                kept = kept_in_window,
                "provider omitted stored dates, keeping the stored rows"
            );
        }

        let outcome = TickerOutcome {
            ticker_code: ticker.to_string(),
            window,
            fetched_rows: fetched.len(),
            history_rows: history.len(),
            kept_in_window,
        };

        let mut rows = history;
        rows.extend(fetched);
        self.store
            .load_rows(&tables.temporary, &rows)
            .map_err(TickerError::Staging)?;
        Ok(outcome)
    }

    /// Copy matching production rows into the temporary table unchanged.
    fn carry_over(
        &self,
        filter: &RowFilter,
        keep_ticker: impl Fn(&str) -> bool,
    ) -> Result<usize, PipelineError> {
        let tables = &self.config.tables;
        let mut rows = self
            .store
            .scan(&tables.production, filter)
            .map_err(PipelineError::CarryOver)?;
        rows.retain(|r| keep_ticker(&r.ticker_code));
        self.store
            .load_rows(&tables.temporary, &rows)
            .map_err(PipelineError::CarryOver)?;
        Ok(rows.len())
    }
}
