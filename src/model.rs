use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::TableRef;

/// How a resource's records are applied to its destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Upsert by key: rows sharing the key are overwritten, others untouched.
    Merge { primary_key: String },
    /// Clear the destination and insert exactly this run's records.
    Replace,
}

impl Disposition {
    pub fn merge(primary_key: &str) -> Self {
        Disposition::Merge {
            primary_key: primary_key.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Merge { .. } => "merge",
            Disposition::Replace => "replace",
        }
    }
}

/// Which normalization path a response took.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Exploded,
    Whole,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Exploded => "exploded",
            Outcome::Whole => "whole",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Fetching,
    Normalizing,
    Writing,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Fetching => "fetching",
            RunState::Normalizing => "normalizing",
            RunState::Writing => "writing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }
}

/// What a successful pipeline run wrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSummary {
    pub load_id: String,
    pub pipeline_name: String,
    pub resource: String,
    pub destination: TableRef,
    pub disposition: Disposition,
    pub outcome: Outcome,
    pub rows_written: u64,
    pub rows_deleted: u64,
    pub new_columns: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for LoadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "load {} of pipeline {}: resource {} wrote {} row(s) into {} ({}, {} deleted, {} response)",
            self.load_id,
            self.pipeline_name,
            self.resource,
            self.rows_written,
            self.destination,
            self.disposition.as_str(),
            self.rows_deleted,
            self.outcome.as_str(),
        )?;
        if !self.new_columns.is_empty() {
            write!(f, "; new columns: {}", self.new_columns.join(", "))?;
        }
        Ok(())
    }
}
