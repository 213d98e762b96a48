//! Parquet directory store.
//!
//! Layout: `{root}/{table}/data.parquet` plus a `{root}/{table}/meta.json`
//! sidecar holding the schema, clustering fields, row count and a BLAKE3 hash
//! of the data file.
//!
//! - Data writes are atomic: write to `.tmp`, then rename into place
//! - Copies are staged in a hidden directory and renamed over the target
//! - Copies are verified against the source's row count and content hash
//! - `MAX(date)` is answered with a lazy Polars scan

use super::{sort_by_clustering, RowFilter, StoreError, TableStore};
use crate::record::{TableRef, TickerRecord};
use crate::schema::{validate_schema, TableSchema};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const DATA_FILE: &str = "data.parquet";
const META_FILE: &str = "meta.json";

/// `NaiveDate::num_days_from_ce` of 1970-01-01, the Polars date epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Metadata sidecar for a stored table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub table: String,
    pub schema: TableSchema,
    pub clustering_fields: Vec<String>,
    pub row_count: usize,
    /// BLAKE3 of `data.parquet`; `None` while the table has no rows.
    pub data_hash: Option<String>,
    pub updated_at: NaiveDateTime,
}

/// The Parquet table store.
#[derive(Debug)]
pub struct ParquetTableStore {
    root: PathBuf,
}

impl ParquetTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &TableRef) -> Result<PathBuf, StoreError> {
        let name = table.as_str();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::Backend(format!("invalid table name '{name}'")));
        }
        Ok(self.root.join(name))
    }

    fn staging_dir(&self, table: &TableRef) -> PathBuf {
        self.root.join(format!(".{}.staging", table.as_str()))
    }

    /// Read the metadata sidecar, failing with `TableNotFound` if absent.
    pub fn meta(&self, table: &TableRef) -> Result<TableMeta, StoreError> {
        let path = self.table_dir(table)?.join(META_FILE);
        if !path.exists() {
            return Err(StoreError::TableNotFound(table.clone()));
        }
        let content =
            fs::read_to_string(&path).map_err(|e| StoreError::Io(format!("meta read: {e}")))?;
        serde_json::from_str(&content).map_err(|e| StoreError::Io(format!("meta parse: {e}")))
    }

    fn write_meta(&self, dir: &Path, meta: &TableMeta) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| StoreError::Io(format!("meta serialization: {e}")))?;
        let path = dir.join(META_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::Io(format!("meta write: {e}")))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io(format!("meta rename: {e}"))
        })
    }

    fn read_rows(&self, table: &TableRef) -> Result<Vec<TickerRecord>, StoreError> {
        let meta = self.meta(table)?;
        let path = self.table_dir(table)?.join(DATA_FILE);
        if meta.row_count == 0 || !path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&path).map_err(|e| StoreError::Parquet(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;
        dataframe_to_records(&df)
    }
}

impl TableStore for ParquetTableStore {
    fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError> {
        Ok(self.table_dir(table)?.join(META_FILE).exists())
    }

    fn table_schema(&self, table: &TableRef) -> Result<TableSchema, StoreError> {
        Ok(self.meta(table)?.schema)
    }

    fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        clustering_fields: &[&str],
    ) -> Result<(), StoreError> {
        if self.table_exists(table)? {
            return Err(StoreError::TableExists(table.clone()));
        }
        for field in clustering_fields {
            if schema.column(field).is_none() {
                return Err(StoreError::SchemaMismatch {
                    table: table.clone(),
                    reason: format!("clustering field '{field}' not in schema"),
                });
            }
        }

        let dir = self.table_dir(table)?;
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        let meta = TableMeta {
            table: table.to_string(),
            schema: schema.clone(),
            clustering_fields: clustering_fields.iter().map(|f| f.to_string()).collect(),
            row_count: 0,
            data_hash: None,
            updated_at: chrono::Local::now().naive_local(),
        };
        self.write_meta(&dir, &meta)
    }

    fn delete_table(&self, table: &TableRef, not_found_ok: bool) -> Result<(), StoreError> {
        let dir = self.table_dir(table)?;
        if !dir.exists() {
            return if not_found_ok {
                Ok(())
            } else {
                Err(StoreError::TableNotFound(table.clone()))
            };
        }
        fs::remove_dir_all(&dir).map_err(|e| StoreError::Io(format!("delete {table}: {e}")))
    }

    fn copy_table(&self, src: &TableRef, dst: &TableRef) -> Result<(), StoreError> {
        let src_meta = self.meta(src)?;
        let src_dir = self.table_dir(src)?;
        let dst_dir = self.table_dir(dst)?;
        let staging = self.staging_dir(dst);

        let _ = fs::remove_dir_all(&staging);
        fs::create_dir_all(&staging)
            .map_err(|e| StoreError::Io(format!("create staging dir: {e}")))?;

        let src_data = src_dir.join(DATA_FILE);
        if src_data.exists() {
            fs::copy(&src_data, staging.join(DATA_FILE))
                .map_err(|e| StoreError::Io(format!("copy data file: {e}")))?;
        }
        let meta = TableMeta {
            table: dst.to_string(),
            updated_at: chrono::Local::now().naive_local(),
            ..src_meta.clone()
        };
        self.write_meta(&staging, &meta)?;

        if dst_dir.exists() {
            fs::remove_dir_all(&dst_dir)
                .map_err(|e| StoreError::Io(format!("replace {dst}: {e}")))?;
        }
        fs::rename(&staging, &dst_dir).map_err(|e| {
            let _ = fs::remove_dir_all(&staging);
            StoreError::Io(format!("staging rename: {e}"))
        })?;

        // Verify the copy landed intact
        let copied_hash = file_hash(&dst_dir.join(DATA_FILE))?;
        if copied_hash != src_meta.data_hash {
            return Err(StoreError::CopyVerification {
                src: src.clone(),
                dst: dst.clone(),
                reason: "content hash differs from source".into(),
            });
        }
        debug!(%src, %dst, rows = src_meta.row_count, "table copied");
        Ok(())
    }

    fn row_count(&self, table: &TableRef) -> Result<usize, StoreError> {
        Ok(self.meta(table)?.row_count)
    }

    fn load_rows(&self, table: &TableRef, rows: &[TickerRecord]) -> Result<(), StoreError> {
        let mut meta = self.meta(table)?;
        let validation = validate_schema(&meta.schema);
        if !validation.is_valid {
            return Err(StoreError::SchemaMismatch {
                table: table.clone(),
                reason: validation.errors.join("; "),
            });
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut all_rows = self.read_rows(table)?;
        all_rows.extend_from_slice(rows);
        sort_by_clustering(&mut all_rows, &meta.clustering_fields);

        let dir = self.table_dir(table)?;
        let path = dir.join(DATA_FILE);
        let tmp_path = path.with_extension("parquet.tmp");
        let df = records_to_dataframe(&all_rows)?;
        write_parquet(&df, &tmp_path)?;

        // Atomic rename
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        meta.row_count = all_rows.len();
        meta.data_hash = file_hash(&path)?;
        meta.updated_at = chrono::Local::now().naive_local();
        self.write_meta(&dir, &meta)
    }

    fn scan(&self, table: &TableRef, filter: &RowFilter) -> Result<Vec<TickerRecord>, StoreError> {
        let mut rows = self.read_rows(table)?;
        rows.retain(|r| filter.matches(r));
        Ok(rows)
    }

    fn max_date(
        &self,
        table: &TableRef,
        ticker_code: &str,
    ) -> Result<Option<NaiveDate>, StoreError> {
        let meta = self.meta(table)?;
        let path = self.table_dir(table)?.join(DATA_FILE);
        if meta.row_count == 0 || !path.exists() {
            return Ok(None);
        }

        let out = LazyFrame::scan_parquet(&path, Default::default())
            .map_err(|e| StoreError::Parquet(format!("scan: {e}")))?
            .filter(col("ticker_code").eq(lit(ticker_code)))
            .select([col("date").max()])
            .collect()
            .map_err(|e| StoreError::Parquet(format!("max(date) query: {e}")))?;

        let days = out
            .column("date")
            .and_then(|c| c.date().map(|ca| ca.get(0)))
            .map_err(|e| StoreError::Parquet(format!("max(date) result: {e}")))?;
        days.map(days_to_date).transpose()
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn file_hash(path: &Path) -> Result<Option<String>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|e| StoreError::Io(format!("hash read: {e}")))?;
    Ok(Some(blake3::hash(&bytes).to_hex().to_string()))
}

fn date_to_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

fn days_to_date(days: i32) -> Result<NaiveDate, StoreError> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
        .ok_or_else(|| StoreError::Parquet(format!("date out of range: {days}")))
}

/// Convert records to a Polars DataFrame in contract column order.
fn records_to_dataframe(rows: &[TickerRecord]) -> Result<DataFrame, StoreError> {
    let dates: Vec<i32> = rows.iter().map(|r| date_to_days(r.date)).collect();
    let tickers: Vec<&str> = rows.iter().map(|r| r.ticker_code.as_str()).collect();
    let shares: Vec<Option<i64>> = rows.iter().map(|r| r.shares_traded).collect();
    let values: Vec<Option<i64>> = rows.iter().map(|r| r.trade_value).collect();
    let opens: Vec<Option<f64>> = rows.iter().map(|r| r.opening_price).collect();
    let highs: Vec<Option<f64>> = rows.iter().map(|r| r.high_price).collect();
    let lows: Vec<Option<f64>> = rows.iter().map(|r| r.low_price).collect();
    let closes: Vec<Option<f64>> = rows.iter().map(|r| r.closing_price).collect();
    let changes: Vec<Option<f64>> = rows.iter().map(|r| r.price_change).collect();
    let txns: Vec<Option<i64>> = rows.iter().map(|r| r.transaction_count).collect();
    let stamps: Vec<i64> = rows
        .iter()
        .map(|r| r.update_timestamp.and_utc().timestamp_millis())
        .collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| StoreError::Parquet(format!("date cast: {e}")))?,
        Column::new("ticker_code".into(), tickers),
        Column::new("shares_traded".into(), shares),
        Column::new("trade_value".into(), values),
        Column::new("opening_price".into(), opens),
        Column::new("high_price".into(), highs),
        Column::new("low_price".into(), lows),
        Column::new("closing_price".into(), closes),
        Column::new("price_change".into(), changes),
        Column::new("transaction_count".into(), txns),
        Column::new("update_timestamp".into(), stamps)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| StoreError::Parquet(format!("timestamp cast: {e}")))?,
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file =
        fs::File::create(path).map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

/// Convert a DataFrame back to records.
fn dataframe_to_records(df: &DataFrame) -> Result<Vec<TickerRecord>, StoreError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| StoreError::Parquet(format!("column read: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| {
        StoreError::Parquet(format!("{name} column type: {e}"))
    };

    let date_ca = column("date")?.date().map_err(|e| type_err("date", e))?;
    let ticker_ca = column("ticker_code")?
        .str()
        .map_err(|e| type_err("ticker_code", e))?;
    let shares_ca = column("shares_traded")?
        .i64()
        .map_err(|e| type_err("shares_traded", e))?;
    let value_ca = column("trade_value")?
        .i64()
        .map_err(|e| type_err("trade_value", e))?;
    let open_ca = column("opening_price")?
        .f64()
        .map_err(|e| type_err("opening_price", e))?;
    let high_ca = column("high_price")?
        .f64()
        .map_err(|e| type_err("high_price", e))?;
    let low_ca = column("low_price")?
        .f64()
        .map_err(|e| type_err("low_price", e))?;
    let close_ca = column("closing_price")?
        .f64()
        .map_err(|e| type_err("closing_price", e))?;
    let change_ca = column("price_change")?
        .f64()
        .map_err(|e| type_err("price_change", e))?;
    let txn_ca = column("transaction_count")?
        .i64()
        .map_err(|e| type_err("transaction_count", e))?;
    let stamp_col = column("update_timestamp")?
        .cast(&DataType::Int64)
        .map_err(|e| type_err("update_timestamp", e))?;
    let stamp_ca = stamp_col
        .i64()
        .map_err(|e| type_err("update_timestamp", e))?;

    let n = df.height();
    let mut rows = Vec::with_capacity(n);

    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null date at row {i}")))?;
        let ticker = ticker_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null ticker_code at row {i}")))?;
        let millis = stamp_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null update_timestamp at row {i}")))?;
        let update_timestamp = DateTime::from_timestamp_millis(millis)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| StoreError::Parquet(format!("timestamp out of range at row {i}")))?;

        rows.push(TickerRecord {
            date: days_to_date(days)?,
            ticker_code: ticker.to_string(),
            shares_traded: shares_ca.get(i),
            trade_value: value_ca.get(i),
            opening_price: open_ca.get(i),
            high_price: high_ca.get(i),
            low_price: low_ca.get(i),
            closing_price: close_ca.get(i),
            price_change: change_ca.get(i),
            transaction_count: txn_ca.get(i),
            update_timestamp,
        });
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_offset_matches_chrono() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(date_to_days(epoch), 0);
        let d = NaiveDate::from_ymd_opt(2023, 10, 2).unwrap();
        assert_eq!(days_to_date(date_to_days(d)).unwrap(), d);
    }

    #[test]
    fn rejects_path_like_table_names() {
        let store = ParquetTableStore::new("/tmp/unused");
        assert!(store.table_dir(&TableRef::new("../escape")).is_err());
        assert!(store.table_dir(&TableRef::new(".hidden")).is_err());
        assert!(store.table_dir(&TableRef::new("")).is_err());
        assert!(store
            .table_dir(&TableRef::new("proj.Kdan.Log_Taiwan_Stock"))
            .is_ok());
    }
}
