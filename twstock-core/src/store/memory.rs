//! In-process table store.
//!
//! Holds every table in a map behind a mutex. Used for dry runs and as the
//! fake backend in tests.

use super::{sort_by_clustering, RowFilter, StoreError, TableStore};
use crate::record::{TableRef, TickerRecord};
use crate::schema::TableSchema;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    clustering_fields: Vec<String>,
    rows: Vec<TickerRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<TableRef, MemoryTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<TableRef, MemoryTable>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.lock()?.keys().map(|t| t.to_string()).collect();
        names.sort();
        Ok(names)
    }
}

impl TableStore for MemoryTableStore {
    fn table_exists(&self, table: &TableRef) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(table))
    }

    fn table_schema(&self, table: &TableRef) -> Result<TableSchema, StoreError> {
        self.lock()?
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        clustering_fields: &[&str],
    ) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.contains_key(table) {
            return Err(StoreError::TableExists(table.clone()));
        }
        tables.insert(
            table.clone(),
            MemoryTable {
                schema: schema.clone(),
                clustering_fields: clustering_fields.iter().map(|f| f.to_string()).collect(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_table(&self, table: &TableRef, not_found_ok: bool) -> Result<(), StoreError> {
        match self.lock()?.remove(table) {
            Some(_) => Ok(()),
            None if not_found_ok => Ok(()),
            None => Err(StoreError::TableNotFound(table.clone())),
        }
    }

    fn copy_table(&self, src: &TableRef, dst: &TableRef) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let copy = tables
            .get(src)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(src.clone()))?;
        tables.insert(dst.clone(), copy);
        Ok(())
    }

    fn row_count(&self, table: &TableRef) -> Result<usize, StoreError> {
        self.lock()?
            .get(table)
            .map(|t| t.rows.len())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    fn load_rows(&self, table: &TableRef, rows: &[TickerRecord]) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let t = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
        t.rows.extend_from_slice(rows);
        sort_by_clustering(&mut t.rows, &t.clustering_fields);
        Ok(())
    }

    fn scan(&self, table: &TableRef, filter: &RowFilter) -> Result<Vec<TickerRecord>, StoreError> {
        self.lock()?
            .get(table)
            .map(|t| t.rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }

    fn max_date(
        &self,
        table: &TableRef,
        ticker_code: &str,
    ) -> Result<Option<NaiveDate>, StoreError> {
        self.lock()?
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| r.ticker_code == ticker_code)
                    .map(|r| r.date)
                    .max()
            })
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }
}
