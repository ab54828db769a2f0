//! Column inference for schemaless records.
//!
//! Records arrive as arbitrary JSON. Each top-level field becomes a column
//! whose kind is inferred from the values seen; kinds only ever widen.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::model::StoreError;

/// Column holding non-object records.
pub const VALUE_COLUMN: &str = "value";
/// System column stamped on every row.
pub const LOAD_ID_COLUMN: &str = "_load_id";

static ACRONYM_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]+)([A-Z][a-z])").unwrap());
static CAMEL_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static ILLEGAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    BigInt,
    Double,
    Bool,
    Text,
    Json,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::BigInt => "bigint",
            ColumnKind::Double => "double",
            ColumnKind::Bool => "bool",
            ColumnKind::Text => "text",
            ColumnKind::Json => "json",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bigint" => Some(ColumnKind::BigInt),
            "double" => Some(ColumnKind::Double),
            "bool" => Some(ColumnKind::Bool),
            "text" => Some(ColumnKind::Text),
            "json" => Some(ColumnKind::Json),
            _ => None,
        }
    }

    /// Declared SQLite type; this fixes the column's affinity.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::BigInt => "INTEGER",
            ColumnKind::Double => "REAL",
            ColumnKind::Bool => "BOOLEAN",
            ColumnKind::Text | ColumnKind::Json => "TEXT",
        }
    }

    /// Kind of a single value; None for null.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnKind::Bool),
            Value::Number(n) if n.is_i64() => Some(ColumnKind::BigInt),
            Value::Number(_) => Some(ColumnKind::Double),
            Value::String(_) => Some(ColumnKind::Text),
            Value::Array(_) | Value::Object(_) => Some(ColumnKind::Json),
        }
    }

    /// Narrowest kind able to hold values of both kinds.
    pub fn unify(self, other: Self) -> Self {
        use ColumnKind::*;
        match (self, other) {
            (a, b) if a == b => a,
            (BigInt, Double) | (Double, BigInt) => Double,
            _ => Json,
        }
    }
}

/// snake_case a field name: `riderId` -> `rider_id`, `FTPPerKg` -> `ftp_per_kg`.
pub fn normalize_identifier(name: &str) -> String {
    let spaced = ACRONYM_BOUNDARY.replace_all(name.trim(), "${1}_${2}");
    let spaced = CAMEL_BOUNDARY.replace_all(&spaced, "${1}_${2}");
    let lowered = spaced.to_lowercase();
    let cleaned = ILLEGAL.replace_all(&lowered, "_");
    let cleaned = cleaned.trim_end_matches('_');
    match cleaned.chars().next() {
        None => "_".to_string(),
        Some(c) if c.is_ascii_digit() => format!("_{cleaned}"),
        Some(_) => cleaned.to_string(),
    }
}

/// Row shape of a record: objects keep their fields (names normalized),
/// anything else lands in `value`. Fails when two fields normalize to the
/// same column or a field claims the load id column.
pub fn to_row(index: usize, record: Value) -> Result<Map<String, Value>, StoreError> {
    let fields = match record {
        Value::Object(fields) => fields,
        other => {
            let mut row = Map::new();
            row.insert(VALUE_COLUMN.to_string(), other);
            return Ok(row);
        }
    };

    let mut row = Map::new();
    let mut sources: BTreeMap<String, String> = BTreeMap::new();
    for (field, value) in fields {
        let column = normalize_identifier(&field);
        if column == LOAD_ID_COLUMN {
            return Err(StoreError::ReservedColumn {
                index,
                field,
                column,
            });
        }
        if let Some(first) = sources.get(&column) {
            return Err(StoreError::ColumnCollision {
                index,
                column,
                first: first.clone(),
                second: field,
            });
        }
        sources.insert(column.clone(), field);
        row.insert(column, value);
    }
    Ok(row)
}

/// Schema changes needed before a batch of rows can be inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    pub new_columns: Vec<(String, ColumnKind)>,
    pub promotions: Vec<(String, ColumnKind, ColumnKind)>,
}

impl SchemaPlan {
    /// Column kinds after the plan is applied.
    pub fn apply_to(&self, existing: &BTreeMap<String, ColumnKind>) -> BTreeMap<String, ColumnKind> {
        let mut kinds = existing.clone();
        for (name, kind) in &self.new_columns {
            kinds.insert(name.clone(), *kind);
        }
        for (name, _, to) in &self.promotions {
            kinds.insert(name.clone(), *to);
        }
        kinds
    }
}

/// Compare the kinds seen in `rows` with the known columns. Columns whose
/// values are all null and that do not exist yet are left out.
pub fn plan(existing: &BTreeMap<String, ColumnKind>, rows: &[Map<String, Value>]) -> SchemaPlan {
    let mut seen: Vec<(String, ColumnKind)> = Vec::new();
    for row in rows {
        for (name, value) in row {
            let Some(kind) = ColumnKind::of(value) else {
                continue;
            };
            match seen.iter_mut().find(|(n, _)| n == name) {
                Some((_, k)) => *k = k.unify(kind),
                None => seen.push((name.clone(), kind)),
            }
        }
    }

    let mut out = SchemaPlan::default();
    for (name, kind) in seen {
        match existing.get(&name) {
            None => out.new_columns.push((name, kind)),
            Some(current) => {
                let widened = current.unify(kind);
                if widened != *current {
                    out.promotions.push((name, *current, widened));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Vec<Value>) -> Vec<Map<String, Value>> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| to_row(i, v).unwrap())
            .collect()
    }

    #[test]
    fn identifiers_are_snake_cased() {
        assert_eq!(normalize_identifier("rider_id"), "rider_id");
        assert_eq!(normalize_identifier("riderId"), "rider_id");
        assert_eq!(normalize_identifier("FTPPerKg"), "ftp_per_kg");
        assert_eq!(normalize_identifier("zp FTP"), "zp_ftp");
        assert_eq!(normalize_identifier("5kWkg"), "_5k_wkg");
        assert_eq!(normalize_identifier("weight (kg)"), "weight_kg");
        assert_eq!(normalize_identifier(""), "_");
    }

    #[test]
    fn non_objects_are_wrapped() {
        let row = to_row(0, json!([1, 2])).unwrap();
        assert_eq!(row.get(VALUE_COLUMN), Some(&json!([1, 2])));
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn colliding_field_names_are_rejected() {
        let err = to_row(3, json!({"riderId": 1, "rider_id": 2})).unwrap_err();
        match err {
            StoreError::ColumnCollision {
                index,
                column,
                first,
                second,
            } => {
                assert_eq!(index, 3);
                assert_eq!(column, "rider_id");
                assert_eq!(first, "riderId");
                assert_eq!(second, "rider_id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_id_field_is_reserved() {
        for field in ["_load_id", "_loadId"] {
            let err = to_row(0, json!({ field: "x", "rider_id": 1 })).unwrap_err();
            assert!(matches!(
                err,
                StoreError::ReservedColumn { field: f, column, .. }
                    if f == field && column == LOAD_ID_COLUMN
            ));
        }
    }

    #[test]
    fn kinds_widen() {
        use ColumnKind::*;
        assert_eq!(BigInt.unify(BigInt), BigInt);
        assert_eq!(BigInt.unify(Double), Double);
        assert_eq!(Double.unify(BigInt), Double);
        assert_eq!(Text.unify(BigInt), Json);
        assert_eq!(Bool.unify(BigInt), Json);
        assert_eq!(ColumnKind::of(&json!(1.5)), Some(Double));
        assert_eq!(ColumnKind::of(&json!(u64::MAX)), Some(Double));
        assert_eq!(ColumnKind::of(&Value::Null), None);
    }

    #[test]
    fn plan_adds_union_of_fields() {
        let rows = rows(vec![
            json!({"rider_id": 1, "name": "A"}),
            json!({"rider_id": 2, "ftp": 250.5, "club": null}),
        ]);
        let plan = plan(&BTreeMap::new(), &rows);
        let names: Vec<_> = plan.new_columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "rider_id", "ftp"]);
        assert!(plan.promotions.is_empty());
        assert!(!names.contains(&"club"));
    }

    #[test]
    fn plan_promotes_existing_columns() {
        let mut existing = BTreeMap::new();
        existing.insert("ftp".to_string(), ColumnKind::BigInt);
        existing.insert("name".to_string(), ColumnKind::Text);
        existing.insert("rider_id".to_string(), ColumnKind::BigInt);

        let rows = rows(vec![json!({"rider_id": 3, "ftp": 280.2, "name": 17})]);
        let plan = plan(&existing, &rows);
        assert!(plan.new_columns.is_empty());
        assert_eq!(
            plan.promotions,
            vec![
                ("ftp".to_string(), ColumnKind::BigInt, ColumnKind::Double),
                ("name".to_string(), ColumnKind::Text, ColumnKind::Json),
            ]
        );
        let after = plan.apply_to(&existing);
        assert_eq!(after["ftp"], ColumnKind::Double);
        assert_eq!(after["rider_id"], ColumnKind::BigInt);
    }
}
