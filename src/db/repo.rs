use chrono::Utc;
use serde_json::{Map, Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, TypeInfo, ValueRef};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, instrument};

use super::model::{LoadContext, LoadRecord, ScannedTable, StoreError, TableRef, WriteStats};
use super::schema::{self, ColumnKind, LOAD_ID_COLUMN};
use crate::model::Disposition;

pub type Pool = SqlitePool;
type Result<T> = std::result::Result<T, StoreError>;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    // Every connection to an in-memory URL opens its own database.
    let max_connections = if normalized.contains(":memory:") { 1 } else { 4 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }

    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };

    if let Some(parent) = Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A value ready to bind.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
}

/// Encode `value` for a column of `kind`. Anything that does not fit the
/// kind is stored as its JSON text.
fn encode(kind: Option<ColumnKind>, value: &Value) -> Cell {
    match (kind, value) {
        (_, Value::Null) => Cell::Null,
        (Some(ColumnKind::BigInt), Value::Number(n)) if n.is_i64() => {
            n.as_i64().map_or(Cell::Null, Cell::Int)
        }
        (Some(ColumnKind::Double), Value::Number(n)) => n.as_f64().map_or(Cell::Null, Cell::Real),
        (Some(ColumnKind::Bool), Value::Bool(b)) => Cell::Bool(*b),
        (Some(ColumnKind::Text), Value::String(s)) => Cell::Text(s.clone()),
        (_, other) => Cell::Text(other.to_string()),
    }
}

fn bind_cell<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    cell: Cell,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Int(v) => query.bind(v),
        Cell::Real(v) => query.bind(v),
        Cell::Bool(v) => query.bind(v),
        Cell::Text(v) => query.bind(v),
    }
}

enum Scalar {
    Int(i64),
    Real(f64),
    Text(String),
}

fn decode(kind: Option<ColumnKind>, scalar: Scalar) -> Value {
    match (kind, scalar) {
        (Some(ColumnKind::Bool), Scalar::Int(i)) => Value::Bool(i != 0),
        (Some(ColumnKind::Double), Scalar::Int(i)) => Number::from_f64(i as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        (Some(ColumnKind::Json), Scalar::Text(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, Scalar::Int(i)) => Value::from(i),
        (_, Scalar::Real(f)) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        (_, Scalar::Text(s)) => Value::String(s),
    }
}

/// Statements that move stored values to the representation of the new
/// kind. Numeric widenings need none: decoding follows the catalog kind.
/// Columns declared with numeric affinity are rebuilt as TEXT before they
/// hold json, otherwise SQLite would coerce json text such as `1.0` back
/// into a number.
fn promotion_sql(table: &str, column: &str, from: ColumnKind, to: ColumnKind) -> Vec<String> {
    let col = quote_ident(column);
    if to != ColumnKind::Json {
        return Vec::new();
    }
    let rendered = match from {
        ColumnKind::Text => {
            return vec![format!(
                "UPDATE {table} SET {col} = json_quote({col}) WHERE {col} IS NOT NULL"
            )]
        }
        ColumnKind::Json => return Vec::new(),
        ColumnKind::Bool => format!("CASE WHEN {col} THEN 'true' ELSE 'false' END"),
        ColumnKind::BigInt => format!("CAST({col} AS TEXT)"),
        ColumnKind::Double => format!("CAST(CAST({col} AS REAL) AS TEXT)"),
    };
    let staging = quote_ident(&format!("{column}__json"));
    vec![
        format!("ALTER TABLE {table} ADD COLUMN {staging} TEXT"),
        format!("UPDATE {table} SET {staging} = {rendered} WHERE {col} IS NOT NULL"),
        format!("ALTER TABLE {table} DROP COLUMN {col}"),
        format!("ALTER TABLE {table} RENAME COLUMN {staging} TO {col}"),
    ]
}

async fn load_columns(
    conn: &mut SqliteConnection,
    destination: &TableRef,
) -> Result<BTreeMap<String, ColumnKind>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name, kind FROM _columns WHERE dataset = ? AND table_name = ? ORDER BY ordinal",
    )
    .bind(&destination.dataset)
    .bind(&destination.table)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .filter_map(|(name, kind)| ColumnKind::parse(&kind).map(|k| (name, k)))
        .collect())
}

/// Data columns of the physical table in declaration order.
async fn table_columns(conn: &mut SqliteConnection, destination: &TableRef) -> Result<Vec<String>> {
    let rows = sqlx::query(&format!(
        "PRAGMA table_info({})",
        quote_ident(&destination.physical_name())
    ))
    .fetch_all(conn)
    .await?;
    if rows.is_empty() {
        return Err(StoreError::TableNotFound(destination.to_string()));
    }
    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        if name != LOAD_ID_COLUMN {
            columns.push(name);
        }
    }
    Ok(columns)
}

/// Keep the last record for each key value.
fn dedup_by_key(rows: Vec<Map<String, Value>>, key: &str) -> Vec<Map<String, Value>> {
    let mut seen = HashSet::new();
    let mut kept: Vec<_> = rows
        .into_iter()
        .rev()
        .filter(|row| seen.insert(row.get(key).map(Value::to_string)))
        .collect();
    kept.reverse();
    kept
}

async fn insert_row(
    conn: &mut SqliteConnection,
    table: &str,
    row: &Map<String, Value>,
    kinds: &BTreeMap<String, ColumnKind>,
    load_id: &str,
) -> Result<()> {
    let present: Vec<(&String, &Value)> = row.iter().filter(|(_, v)| !v.is_null()).collect();
    let mut columns = vec![quote_ident(LOAD_ID_COLUMN)];
    columns.extend(present.iter().map(|(name, _)| quote_ident(name)));
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );

    let mut query = sqlx::query(&sql).bind(load_id.to_string());
    for (name, value) in present {
        query = bind_cell(query, encode(kinds.get(name).copied(), value));
    }
    query.execute(conn).await?;
    Ok(())
}

/// Apply `records` to `destination` under `disposition` in one transaction,
/// evolving the table schema as needed, and record the load in `_loads`.
#[instrument(skip_all, fields(table = %destination, disposition = disposition.as_str()))]
pub async fn write_records(
    pool: &Pool,
    destination: &TableRef,
    disposition: &Disposition,
    records: Vec<Value>,
    load: &LoadContext,
) -> Result<WriteStats> {
    let mut rows = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| schema::to_row(index, record))
        .collect::<Result<Vec<_>>>()?;

    let key = match disposition {
        Disposition::Merge { primary_key } => Some(schema::normalize_identifier(primary_key)),
        Disposition::Replace => None,
    };
    if let Some(key) = &key {
        if let Some(index) = rows
            .iter()
            .position(|row| row.get(key).map_or(true, Value::is_null))
        {
            return Err(StoreError::MissingPrimaryKey {
                key: key.clone(),
                index,
            });
        }
        rows = dedup_by_key(rows, key);
    }

    let table = quote_ident(&destination.physical_name());
    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ({} TEXT NOT NULL)",
        quote_ident(LOAD_ID_COLUMN)
    ))
    .execute(&mut *tx)
    .await?;

    let existing = load_columns(&mut tx, destination).await?;
    let plan = schema::plan(&existing, &rows);
    let mut stats = WriteStats::default();

    for (ordinal, (name, kind)) in (existing.len()..).zip(&plan.new_columns) {
        sqlx::query(&format!(
            "ALTER TABLE {table} ADD COLUMN {} {}",
            quote_ident(name),
            kind.sql_type()
        ))
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO _columns (dataset, table_name, column_name, kind, ordinal) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&destination.dataset)
        .bind(&destination.table)
        .bind(name)
        .bind(kind.as_str())
        .bind(ordinal as i64)
        .execute(&mut *tx)
        .await?;
        stats.new_columns.push(name.clone());
    }

    for (name, from, to) in &plan.promotions {
        for sql in promotion_sql(&table, name, *from, *to) {
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        sqlx::query("UPDATE _columns SET kind = ? WHERE dataset = ? AND table_name = ? AND column_name = ?")
            .bind(to.as_str())
            .bind(&destination.dataset)
            .bind(&destination.table)
            .bind(name)
            .execute(&mut *tx)
            .await?;
        debug!(column = %name, from = from.as_str(), to = to.as_str(), "widened column");
        stats.promoted_columns.push(name.clone());
    }

    let kinds = plan.apply_to(&existing);

    match &key {
        None => {
            stats.rows_deleted = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?
                .rows_affected();
            for row in &rows {
                insert_row(&mut tx, &table, row, &kinds, &load.load_id).await?;
                stats.rows_written += 1;
            }
        }
        Some(key) => {
            let delete_sql = format!("DELETE FROM {table} WHERE {} = ?", quote_ident(key));
            for row in &rows {
                let cell = encode(kinds.get(key).copied(), &row[key.as_str()]);
                stats.rows_deleted += bind_cell(sqlx::query(&delete_sql), cell)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                insert_row(&mut tx, &table, row, &kinds, &load.load_id).await?;
                stats.rows_written += 1;
            }
        }
    }

    sqlx::query(
        "INSERT INTO _loads (load_id, pipeline_name, resource, dataset, table_name, disposition, outcome, rows_written, rows_deleted, started_at, finished_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&load.load_id)
    .bind(&load.pipeline_name)
    .bind(&load.resource)
    .bind(&destination.dataset)
    .bind(&destination.table)
    .bind(disposition.as_str())
    .bind(load.outcome)
    .bind(stats.rows_written as i64)
    .bind(stats.rows_deleted as i64)
    .bind(load.started_at)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        rows_written = stats.rows_written,
        rows_deleted = stats.rows_deleted,
        new_columns = stats.new_columns.len(),
        "records written"
    );
    Ok(stats)
}

#[instrument(skip_all)]
pub async fn table_exists(pool: &Pool, destination: &TableRef) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(destination.physical_name())
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

#[instrument(skip_all)]
pub async fn row_count(pool: &Pool, destination: &TableRef) -> Result<i64> {
    if !table_exists(pool, destination).await? {
        return Err(StoreError::TableNotFound(destination.to_string()));
    }
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}",
        quote_ident(&destination.physical_name())
    ))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn decode_row(
    row: &SqliteRow,
    columns: &[String],
    kinds: &BTreeMap<String, ColumnKind>,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (idx, name) in columns.iter().enumerate() {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            continue;
        }
        let scalar = match raw.type_info().name() {
            "INTEGER" => Scalar::Int(row.try_get::<i64, _>(idx)?),
            "REAL" => Scalar::Real(row.try_get::<f64, _>(idx)?),
            "TEXT" => Scalar::Text(row.try_get::<String, _>(idx)?),
            _ => continue,
        };
        out.insert(name.clone(), decode(kinds.get(name).copied(), scalar));
    }
    Ok(out)
}

/// Read every row of `destination` in insertion order. Null cells are
/// omitted from the returned objects.
#[instrument(skip_all, fields(table = %destination))]
pub async fn scan_table(pool: &Pool, destination: &TableRef) -> Result<ScannedTable> {
    let mut conn = pool.acquire().await?;
    let columns = table_columns(&mut conn, destination).await?;
    let kinds = load_columns(&mut conn, destination).await?;
    if columns.is_empty() {
        return Ok(ScannedTable {
            columns,
            rows: Vec::new(),
        });
    }

    let select = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {select} FROM {} ORDER BY rowid",
        quote_ident(&destination.physical_name())
    );
    let raw_rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    let rows = raw_rows
        .iter()
        .map(|row| decode_row(row, &columns, &kinds))
        .collect::<Result<Vec<_>>>()?;
    Ok(ScannedTable { columns, rows })
}

#[instrument(skip_all)]
pub async fn recent_loads(pool: &Pool, limit: i64) -> Result<Vec<LoadRecord>> {
    let loads = sqlx::query_as::<_, LoadRecord>(
        "SELECT load_id, pipeline_name, resource, dataset, table_name, disposition, outcome, rows_written, rows_deleted, started_at, finished_at FROM _loads ORDER BY finished_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(loads)
}
