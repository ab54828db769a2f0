//! Embedded store: destination tables, inferred schema, load bookkeeping.
//!
//! This module is split into three submodules:
//! - `model`: errors, table references and view models returned by repositories.
//! - `schema`: column naming and kind inference for schemaless records.
//! - `repo`: SQL functions writing and scanning destination tables.
//!
//! External modules should import from `zwift_scout::db`; the repository API
//! and commonly used models are re-exported here.

pub mod model;
pub mod repo;
pub mod schema;

pub use repo::*;

pub use model::{LoadContext, LoadRecord, ScannedTable, StoreError, TableRef, WriteStats};
