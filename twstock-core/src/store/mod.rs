//! Table store abstraction.
//!
//! The pipeline only ever talks to the backing store through [`TableStore`]:
//! whole-table create/copy/delete, appending rows, a filtered scan, and the
//! `MAX(date)` aggregate used for watermarks. Two backends ship with the
//! crate: a Parquet directory store and an in-memory store.

pub mod memory;
pub mod parquet;

pub use memory::MemoryTableStore;
pub use parquet::ParquetTableStore;

use crate::record::{TableRef, TickerRecord};
use crate::schema::TableSchema;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table not found: {0}")]
    TableNotFound(TableRef),

    #[error("table already exists: {0}")]
    TableExists(TableRef),

    #[error("schema mismatch for {table}: {reason}")]
    SchemaMismatch { table: TableRef, reason: String },

    #[error("copy of {src} to {dst} failed verification: {reason}")]
    CopyVerification {
        src: TableRef,
        dst: TableRef,
        reason: String,
    },

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Row filter for [`TableStore::scan`]. Empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub ticker_code: Option<String>,
    /// Only rows dated strictly before this date.
    pub before: Option<NaiveDate>,
}

impl RowFilter {
    pub fn ticker(code: impl Into<String>) -> Self {
        Self {
            ticker_code: Some(code.into()),
            before: None,
        }
    }

    pub fn before(mut self, date: NaiveDate) -> Self {
        self.before = Some(date);
        self
    }

    pub fn matches(&self, record: &TickerRecord) -> bool {
        self.ticker_code
            .as_deref()
            .map_or(true, |t| record.ticker_code == t)
            && self.before.map_or(true, |b| record.date < b)
    }
}

/// Blocking table-oriented store.
///
/// Operations on a missing table fail with [`StoreError::TableNotFound`]
/// unless documented otherwise.
pub trait TableStore: Send + Sync {
    fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError>;

    fn table_schema(&self, table: &TableRef) -> Result<TableSchema, StoreError>;

    /// Create an empty table. Fails if the table already exists.
    fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        clustering_fields: &[&str],
    ) -> Result<(), StoreError>;

    /// Delete a table. A missing table is an error unless `not_found_ok`.
    fn delete_table(&self, table: &TableRef, not_found_ok: bool) -> Result<(), StoreError>;

    /// Copy a table's schema, clustering and rows to `dst`, replacing any
    /// existing `dst`.
    fn copy_table(&self, src: &TableRef, dst: &TableRef) -> Result<(), StoreError>;

    fn row_count(&self, table: &TableRef) -> Result<usize, StoreError>;

    /// Append rows, keeping the table sorted by its clustering fields.
    fn load_rows(&self, table: &TableRef, rows: &[TickerRecord]) -> Result<(), StoreError>;

    fn scan(&self, table: &TableRef, filter: &RowFilter) -> Result<Vec<TickerRecord>, StoreError>;

    /// `MAX(date)` over rows for one ticker; `None` when it has no rows.
    fn max_date(&self, table: &TableRef, ticker_code: &str)
        -> Result<Option<NaiveDate>, StoreError>;
}

/// Sort rows by the named clustering fields (unknown names are ignored).
/// Copy `table` with all of its rows from one store into another.
///
/// Returns the copied row count, or `None` when `src` has no such table.
/// Any existing `table` in `dst` is replaced.
pub fn mirror_table(
    src: &dyn TableStore,
    dst: &dyn TableStore,
    table: &TableRef,
    clustering_fields: &[&str],
) -> Result<Option<usize>, StoreError> {
    if !src.table_exists(table)? {
        return Ok(None);
    }
    let schema = src.table_schema(table)?;
    let rows = src.scan(table, &RowFilter::default())?;
    dst.delete_table(table, true)?;
    dst.create_table(table, &schema, clustering_fields)?;
    dst.load_rows(table, &rows)?;
    Ok(Some(rows.len()))
}

pub(crate) fn sort_by_clustering(rows: &mut [TickerRecord], clustering_fields: &[String]) {
    rows.sort_by(|a, b| {
        clustering_fields
            .iter()
            .map(|field| match field.as_str() {
                "date" => a.date.cmp(&b.date),
                "ticker_code" => a.ticker_code.cmp(&b.ticker_code),
                "update_timestamp" => a.update_timestamp.cmp(&b.update_timestamp),
                _ => std::cmp::Ordering::Equal,
            })
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
