//! Store entities and view models used by repositories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("record {index} has no value for primary key `{key}`")]
    MissingPrimaryKey { key: String, index: usize },
    #[error("record {index}: fields `{first}` and `{second}` both map to column `{column}`")]
    ColumnCollision {
        index: usize,
        column: String,
        first: String,
        second: String,
    },
    #[error("record {index}: field `{field}` maps to reserved column `{column}`")]
    ReservedColumn {
        index: usize,
        field: String,
        column: String,
    },
    #[error("table {0} does not exist")]
    TableNotFound(String),
}

/// Destination of a load: a table inside a dataset namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    /// SQLite has a single namespace per file, so datasets become a table
    /// name prefix.
    pub fn physical_name(&self) -> String {
        format!("{}__{}", self.dataset, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

/// Identity and timing of the load a write belongs to.
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub load_id: String,
    pub pipeline_name: String,
    pub resource: String,
    pub outcome: &'static str,
    pub started_at: DateTime<Utc>,
}

/// Effect of one `write_records` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub rows_written: u64,
    pub rows_deleted: u64,
    pub new_columns: Vec<String>,
    pub promoted_columns: Vec<String>,
}

/// Result of a full table scan: data columns and decoded rows.
#[derive(Debug, Clone, Default)]
pub struct ScannedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
}

/// A row of `_loads`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoadRecord {
    pub load_id: String,
    pub pipeline_name: String,
    pub resource: String,
    pub dataset: String,
    pub table_name: String,
    pub disposition: String,
    pub outcome: String,
    pub rows_written: i64,
    pub rows_deleted: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
