#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use zwift_scout::db::{self, Pool, TableRef};
use zwift_scout::pipeline::Pipeline;
use zwift_scout::zr::ZrClient;

pub const API_KEY: &str = "test-key";

/// In-process stand-in for the ranking API under `/public/`.
#[derive(Clone, Default)]
pub struct StubApi {
    hits: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<String>>>,
    clubs: Arc<Mutex<HashMap<i64, Value>>>,
}

impl StubApi {
    pub fn set_club(&self, club_id: i64, body: Value) {
        self.clubs.lock().unwrap().insert(club_id, body);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn auth_headers(&self) -> Vec<String> {
        self.auth_headers.lock().unwrap().clone()
    }

    fn record(&self, headers: &HeaderMap) {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let auth = headers
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.auth_headers.lock().unwrap().push(auth);
    }

    /// Serve on an ephemeral port; returns the API base URL.
    pub async fn spawn(&self) -> Url {
        let app = Router::new()
            .route("/public/clubs/:id", get(club))
            .route("/public/riders/", post(riders))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{addr}/public/")).unwrap()
    }
}

async fn club(State(stub): State<StubApi>, Path(id): Path<i64>, headers: HeaderMap) -> Response {
    stub.record(&headers);
    let body = stub.clubs.lock().unwrap().get(&id).cloned();
    match body {
        Some(body) => Json(body).into_response(),
        None => (StatusCode::NOT_FOUND, "club not found").into_response(),
    }
}

async fn riders(
    State(stub): State<StubApi>,
    headers: HeaderMap,
    Json(ids): Json<Vec<i64>>,
) -> Json<Value> {
    stub.record(&headers);
    Json(json!({ "ids": ids, "ok": true }))
}

pub async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn raw_riders() -> TableRef {
    TableRef::new("raw", "riders")
}

pub fn pipeline(pool: &Pool, base_url: Url, api_key: Option<&str>, name: &str) -> Pipeline {
    let client = ZrClient::with_base_url(
        api_key.map(str::to_string),
        base_url,
        Duration::from_secs(5),
    )
    .unwrap();
    Pipeline::new(name, pool.clone(), Arc::new(client), raw_riders())
}

pub async fn rows(pool: &Pool) -> Vec<Value> {
    db::scan_table(pool, &raw_riders())
        .await
        .unwrap()
        .rows
        .into_iter()
        .map(Value::Object)
        .collect()
}
