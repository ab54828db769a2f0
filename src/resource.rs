use async_trait::async_trait;
use reqwest::Method;
use serde_json::json;
use tracing::warn;

use crate::model::Disposition;
use crate::normalize::{normalize, Normalized, Shape};
use crate::zr::{ApiError, RankingService, RawResponse};

/// Development sample club used when no club id is given.
pub const SAMPLE_CLUB_ID: i64 = 20650;
/// Development sample riders used when no rider ids are given.
pub const SAMPLE_RIDER_IDS: [i64; 3] = [4598636, 5574, 5879996];

pub const RIDER_KEY: &str = "rider_id";

/// A named fetch unit with the policy for applying its records.
#[async_trait]
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn disposition(&self) -> Disposition;

    fn shape(&self) -> Shape;

    async fn fetch(&self, api: &dyn RankingService) -> Result<RawResponse, ApiError>;

    /// Fetch and normalize in one step.
    async fn records(&self, api: &dyn RankingService) -> Result<Normalized, ApiError> {
        let raw = self.fetch(api).await?;
        Ok(normalize(raw, self.shape()))
    }
}

/// Members of one club, upserted by `rider_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubRiders {
    club_id: i64,
}

impl ClubRiders {
    pub fn new(club_id: i64) -> Self {
        Self { club_id }
    }

    pub fn endpoint(&self) -> String {
        format!("clubs/{}", self.club_id)
    }
}

#[async_trait]
impl Resource for ClubRiders {
    fn name(&self) -> &str {
        "club_riders"
    }

    fn disposition(&self) -> Disposition {
        Disposition::merge(RIDER_KEY)
    }

    fn shape(&self) -> Shape {
        Shape::Club
    }

    async fn fetch(&self, api: &dyn RankingService) -> Result<RawResponse, ApiError> {
        api.fetch(Method::GET, &self.endpoint(), None).await
    }
}

/// One batch lookup of explicit rider ids; replaces its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiderBatch {
    rider_ids: Vec<i64>,
}

impl RiderBatch {
    /// Returns None for an empty id list.
    pub fn new(rider_ids: Vec<i64>) -> Option<Self> {
        if rider_ids.is_empty() {
            None
        } else {
            Some(Self { rider_ids })
        }
    }

    /// Use the caller's ids, or `fallback` when none were supplied. The
    /// fallback is meant for development runs.
    pub fn or_fallback(rider_ids: Option<Vec<i64>>, fallback: &[i64]) -> Self {
        match rider_ids.and_then(Self::new) {
            Some(batch) => batch,
            None => {
                warn!(?fallback, "no rider ids given; using development sample ids");
                Self {
                    rider_ids: fallback.to_vec(),
                }
            }
        }
    }

    pub fn or_sample(rider_ids: Option<Vec<i64>>) -> Self {
        Self::or_fallback(rider_ids, &SAMPLE_RIDER_IDS)
    }

    pub fn rider_ids(&self) -> &[i64] {
        &self.rider_ids
    }
}

#[async_trait]
impl Resource for RiderBatch {
    fn name(&self) -> &str {
        "rider_batch"
    }

    fn disposition(&self) -> Disposition {
        Disposition::Replace
    }

    fn shape(&self) -> Shape {
        Shape::Batch
    }

    async fn fetch(&self, api: &dyn RankingService) -> Result<RawResponse, ApiError> {
        let payload = json!(self.rider_ids);
        api.fetch(Method::POST, "riders/", Some(&payload)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Method, String, Option<Value>)>>,
        body: Value,
    }

    #[async_trait]
    impl RankingService for Recorder {
        async fn fetch(
            &self,
            method: Method,
            endpoint: &str,
            payload: Option<&Value>,
        ) -> Result<RawResponse, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push((method, endpoint.to_string(), payload.cloned()));
            Ok(RawResponse::ok(self.body.clone()))
        }
    }

    #[test]
    fn declared_policies() {
        let club = ClubRiders::new(1);
        assert_eq!(club.disposition(), Disposition::merge("rider_id"));
        assert_eq!(club.shape(), Shape::Club);

        let batch = RiderBatch::or_sample(Some(vec![1]));
        assert_eq!(batch.disposition(), Disposition::Replace);
        assert_eq!(batch.shape(), Shape::Batch);
    }

    #[test]
    fn batch_falls_back_to_sample_ids() {
        assert_eq!(RiderBatch::or_sample(None).rider_ids(), &SAMPLE_RIDER_IDS);
        assert_eq!(
            RiderBatch::or_sample(Some(vec![])).rider_ids(),
            &SAMPLE_RIDER_IDS
        );
        assert_eq!(
            RiderBatch::or_fallback(None, &[9, 8]).rider_ids(),
            &[9, 8]
        );
        assert_eq!(RiderBatch::or_sample(Some(vec![7])).rider_ids(), &[7]);
        assert!(RiderBatch::new(vec![]).is_none());
    }

    #[tokio::test]
    async fn club_fetches_club_path() {
        let api = Recorder {
            body: json!({"riders": [{"rider_id": 1}, {"rider_id": 2}]}),
            ..Default::default()
        };
        let normalized = ClubRiders::new(20650).records(&api).await.unwrap();
        assert_eq!(normalized.len(), 2);

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Method::GET);
        assert_eq!(calls[0].1, "clubs/20650");
        assert!(calls[0].2.is_none());
    }

    #[tokio::test]
    async fn batch_posts_ids_and_keeps_body_whole() {
        let api = Recorder {
            body: json!([{"rider_id": 5574}, {"rider_id": 5879996}]),
            ..Default::default()
        };
        let batch = RiderBatch::or_sample(Some(vec![5574, 5879996]));
        let normalized = batch.records(&api).await.unwrap();
        assert_eq!(normalized.len(), 1);

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls[0].0, Method::POST);
        assert_eq!(calls[0].1, "riders/");
        assert_eq!(calls[0].2, Some(json!([5574, 5879996])));
    }
}
