//! Read side of the curated riders table: union filtering and aggregates.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::db::ScannedTable;

/// Columns the curated table must expose.
pub const REQUIRED_COLUMNS: [&str; 5] = ["rider_id", "name", "ftp", "ftp_per_kg", "finishes"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("table is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

pub type Row = Map<String, Value>;

pub fn check_columns(table: &ScannedTable) -> Result<(), ReportError> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|required| !table.columns.iter().any(|c| c == *required))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ReportError::MissingColumns(missing))
    }
}

/// Selects rows whose rider id OR name is listed. An empty filter selects
/// every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiderFilter {
    pub rider_ids: Vec<i64>,
    pub names: Vec<String>,
}

impl RiderFilter {
    pub fn is_empty(&self) -> bool {
        self.rider_ids.is_empty() && self.names.is_empty()
    }

    pub fn matches(&self, row: &Row) -> bool {
        if self.is_empty() {
            return true;
        }
        let id_match = row
            .get("rider_id")
            .and_then(Value::as_i64)
            .is_some_and(|id| self.rider_ids.contains(&id));
        let name_match = row
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| self.names.iter().any(|n| n == name));
        id_match || name_match
    }

    pub fn apply<'a>(&self, rows: &'a [Row]) -> Vec<&'a Row> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub shown: usize,
    pub total: usize,
    pub avg_ftp: Option<f64>,
    pub avg_ftp_per_kg: Option<f64>,
    pub total_finishes: f64,
}

fn mean(rows: &[&Row], column: &str) -> Option<f64> {
    let values: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_f64))
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn summarize(selected: &[&Row], total: usize) -> Summary {
    Summary {
        shown: selected.len(),
        total,
        avg_ftp: mean(selected, "ftp"),
        avg_ftp_per_kg: mean(selected, "ftp_per_kg"),
        total_finishes: selected
            .iter()
            .filter_map(|row| row.get("finishes").and_then(Value::as_f64))
            .fold(0.0, |total, n| total + n),
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let avg_ftp = match self.avg_ftp {
            Some(v) => format!("{v:.0}W"),
            None => "N/A".to_string(),
        };
        let avg_wkg = match self.avg_ftp_per_kg {
            Some(v) => format!("{v:.2}"),
            None => "N/A".to_string(),
        };
        write!(
            f,
            "Total Riders: {} | Avg FTP: {} | Avg FTP/kg: {} | Total Races: {:.0}",
            self.shown, avg_ftp, avg_wkg, self.total_finishes
        )
    }
}

/// Tab-separated rendering of a row's contract columns.
pub fn format_row(row: &Row) -> String {
    REQUIRED_COLUMNS
        .iter()
        .map(|c| match row.get(*c) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\t")
}
