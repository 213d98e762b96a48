//! Table schema contract for ticker price tables.
//!
//! Defines the exact column names, data types and nullability every table in a
//! [`TableTriplet`](crate::TableTriplet) must carry, plus the clustering order.
//! Schemas read back from a store are validated against this contract before a
//! temporary table is cloned from them.

use serde::{Deserialize, Serialize};

/// Column data types understood by the table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Date,
    String,
    Int64,
    Float64,
    /// Naive timestamp with millisecond resolution.
    Datetime,
}

/// A single field in the schema contract.
#[derive(Debug, Clone, Copy)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// A column as stored in a table's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
    pub nullable: bool,
}

/// Ordered column list of a table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Rows are stored sorted by these columns.
pub const CLUSTERING_FIELDS: &[&str] = &["date", "ticker_code"];

/// The canonical ticker record contract.
///
/// - Unknown numeric values are nulls, never zeros
/// - `date` + `ticker_code` identify a row
pub const TICKER_RECORD_SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: "date",
        dtype: ColumnType::Date,
        nullable: false,
    },
    SchemaField {
        name: "ticker_code",
        dtype: ColumnType::String,
        nullable: false,
    },
    SchemaField {
        name: "shares_traded",
        dtype: ColumnType::Int64,
        nullable: true,
    },
    SchemaField {
        name: "trade_value",
        dtype: ColumnType::Int64,
        nullable: true,
    },
    SchemaField {
        name: "opening_price",
        dtype: ColumnType::Float64,
        nullable: true,
    },
    SchemaField {
        name: "high_price",
        dtype: ColumnType::Float64,
        nullable: true,
    },
    SchemaField {
        name: "low_price",
        dtype: ColumnType::Float64,
        nullable: true,
    },
    SchemaField {
        name: "closing_price",
        dtype: ColumnType::Float64,
        nullable: true,
    },
    SchemaField {
        name: "price_change",
        dtype: ColumnType::Float64,
        nullable: true,
    },
    SchemaField {
        name: "transaction_count",
        dtype: ColumnType::Int64,
        nullable: true,
    },
    SchemaField {
        name: "update_timestamp",
        dtype: ColumnType::Datetime,
        nullable: false,
    },
];

/// Owned copy of the contract, as a store would report it.
pub fn ticker_record_schema() -> TableSchema {
    TableSchema {
        columns: TICKER_RECORD_SCHEMA
            .iter()
            .map(|f| ColumnSpec {
                name: f.name.to_string(),
                dtype: f.dtype,
                nullable: f.nullable,
            })
            .collect(),
    }
}

/// Result of schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Validate a stored schema against the ticker record contract.
pub fn validate_schema(schema: &TableSchema) -> SchemaValidation {
    let mut errors = Vec::new();

    for expected in TICKER_RECORD_SCHEMA {
        match schema.column(expected.name) {
            Some(col) if col.dtype == expected.dtype => {}
            Some(col) => {
                errors.push(format!(
                    "column '{}': expected {:?}, got {:?}",
                    expected.name, expected.dtype, col.dtype
                ));
            }
            None => {
                errors.push(format!("missing required column '{}'", expected.name));
            }
        }
    }

    for col in &schema.columns {
        if !TICKER_RECORD_SCHEMA.iter().any(|f| f.name == col.name) {
            errors.push(format!("unexpected column '{}' (not in schema)", col.name));
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_schema_passes() {
        let result = validate_schema(&ticker_record_schema());
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_column_fails() {
        let mut schema = ticker_record_schema();
        schema.columns.retain(|c| c.name != "closing_price");
        let result = validate_schema(&schema);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("closing_price")));
    }

    #[test]
    fn wrong_type_fails() {
        let mut schema = ticker_record_schema();
        for col in &mut schema.columns {
            if col.name == "shares_traded" {
                col.dtype = ColumnType::Float64;
            }
        }
        let result = validate_schema(&schema);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("shares_traded")));
    }

    #[test]
    fn extra_column_flagged() {
        let mut schema = ticker_record_schema();
        schema.columns.push(ColumnSpec {
            name: "dividend".into(),
            dtype: ColumnType::Float64,
            nullable: true,
        });
        let result = validate_schema(&schema);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("dividend")));
    }

    #[test]
    fn clustering_fields_are_in_contract() {
        let schema = ticker_record_schema();
        for field in CLUSTERING_FIELDS {
            assert!(schema.column(field).is_some());
        }
        assert_eq!(TICKER_RECORD_SCHEMA.len(), 11);
    }
}
