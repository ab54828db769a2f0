//! Turns ranking API response bodies into record sequences.
//!
//! Club lookups nest their members under `riders`; batch lookups are kept as
//! one record whatever their contents.

use serde_json::Value;

use crate::model::Outcome;
use crate::zr::RawResponse;

/// Field of a club response holding the member riders.
pub const RIDERS_FIELD: &str = "riders";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Club,
    Batch,
}

/// Result of normalizing one response.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// One record per element of the nested collection.
    Exploded(Vec<Value>),
    /// The entire decoded body as a single record.
    Whole(Value),
}

impl Normalized {
    pub fn outcome(&self) -> Outcome {
        match self {
            Normalized::Exploded(_) => Outcome::Exploded,
            Normalized::Whole(_) => Outcome::Whole,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Normalized::Exploded(records) => records.len(),
            Normalized::Whole(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<Value> {
        match self {
            Normalized::Exploded(records) => records,
            Normalized::Whole(record) => vec![record],
        }
    }
}

pub fn normalize(raw: RawResponse, shape: Shape) -> Normalized {
    normalize_body(raw.body, shape)
}

pub fn normalize_body(body: Value, shape: Shape) -> Normalized {
    match (shape, body) {
        (Shape::Club, Value::Object(mut map)) => match map.remove(RIDERS_FIELD) {
            Some(Value::Array(riders)) => Normalized::Exploded(riders),
            Some(other) => {
                map.insert(RIDERS_FIELD.to_string(), other);
                Normalized::Whole(Value::Object(map))
            }
            None => Normalized::Whole(Value::Object(map)),
        },
        (_, body) => Normalized::Whole(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn club_with_riders_explodes_elementwise() {
        let riders = json!([
            {"rider_id": 1, "name": "A", "power": {"wkg5": 12.1}},
            {"rider_id": 2, "name": "B"},
            {"rider_id": 3, "name": "C", "ftp": 301}
        ]);
        let body = json!({"clubId": 20650, "name": "Club", "riders": riders.clone()});

        let normalized = normalize(RawResponse::ok(body), Shape::Club);
        assert_eq!(normalized.outcome(), Outcome::Exploded);
        assert_eq!(normalized.len(), 3);
        assert_eq!(Value::Array(normalized.into_records()), riders);
    }

    #[test]
    fn club_with_empty_riders_explodes_to_nothing() {
        let normalized = normalize_body(json!({"riders": []}), Shape::Club);
        assert_eq!(normalized, Normalized::Exploded(vec![]));
        assert!(normalized.is_empty());
    }

    #[test]
    fn club_without_riders_falls_back_to_whole() {
        let body = json!({"clubId": 20650, "name": "Club"});
        let normalized = normalize_body(body.clone(), Shape::Club);
        assert_eq!(normalized, Normalized::Whole(body));
    }

    #[test]
    fn club_with_non_array_riders_falls_back_to_whole() {
        for riders in [json!({"rider_id": 1}), json!("none"), Value::Null, json!(4)] {
            let body = json!({"clubId": 1, "riders": riders});
            let normalized = normalize_body(body.clone(), Shape::Club);
            assert_eq!(normalized.outcome(), Outcome::Whole);
            assert_eq!(normalized.into_records(), vec![body]);
        }
    }

    #[test]
    fn non_object_club_body_is_whole() {
        let body = json!([{"rider_id": 1}]);
        assert_eq!(
            normalize_body(body.clone(), Shape::Club),
            Normalized::Whole(body)
        );
    }

    #[test]
    fn batch_is_always_one_record() {
        let bodies = [
            json!({"ids": [5574, 5879996], "ok": true}),
            json!([{"rider_id": 5574}, {"rider_id": 5879996}, {"rider_id": 4598636}]),
            json!({"riders": [{"rider_id": 1}, {"rider_id": 2}]}),
        ];
        for body in bodies {
            let normalized = normalize_body(body.clone(), Shape::Batch);
            assert_eq!(normalized.len(), 1);
            assert_eq!(normalized, Normalized::Whole(body));
        }
    }
}
