use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

pub mod model;

pub use model::{ApiError, RawResponse};

pub const ZR_API_BASE: &str = "https://zwift-ranking.herokuapp.com/public/";
pub const API_KEY_ENV: &str = "ZRAPP_API_KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read the ranking API credential from the process environment. Blank
/// values count as absent.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[async_trait]
pub trait RankingService: Send + Sync {
    async fn fetch(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<RawResponse, ApiError>;
}

#[derive(Clone)]
pub struct ZrClient {
    http: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl fmt::Debug for ZrClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZrClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl ZrClient {
    pub fn new(api_key: Option<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(ZR_API_BASE)
            .map_err(|err| ApiError::Configuration(format!("invalid default base URL: {err}")))?;
        Self::with_base_url(api_key, base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_base_url(
        api_key: Option<String>,
        base_url: Url,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(concat!("zwift-scout/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn from_config(cfg: &Config, api_key: Option<String>) -> Result<Self, ApiError> {
        let base_url = cfg
            .base_url()
            .map_err(|err| ApiError::Configuration(err.to_string()))?;
        Self::with_base_url(api_key, base_url, cfg.timeout())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn api_key(&self) -> Result<&str, ApiError> {
        self.api_key.as_deref().ok_or_else(|| {
            ApiError::Configuration("ZRAPP_API_KEY environment variable not set".into())
        })
    }

    /// Build an authenticated request. Fails with `ApiError::Configuration`
    /// when no credential is configured.
    pub fn build_request(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<reqwest::Request, ApiError> {
        let api_key = self.api_key()?;
        let url = self.base_url.join(endpoint).map_err(|err| {
            ApiError::Configuration(format!("invalid endpoint `{endpoint}`: {err}"))
        })?;
        let mut builder = self
            .http
            .request(method, url)
            .header("Authorization", api_key)
            .header("Accept", "application/json");
        if let Some(body) = payload {
            builder = builder.json(body);
        }
        Ok(builder.build()?)
    }

    pub async fn fetch(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<RawResponse, ApiError> {
        let request = self.build_request(method, endpoint, payload)?;
        debug!(method = %request.method(), url = %request.url(), "ranking API request");

        let res = self.http.execute(request).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, endpoint, "ranking API error");
            return Err(ApiError::Http { status, body });
        }

        let text = res.text().await?;
        let body: Value = serde_json::from_str(&text)?;
        debug!(%status, bytes = text.len(), "ranking API response");
        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RankingService for ZrClient {
    async fn fetch(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
    ) -> Result<RawResponse, ApiError> {
        ZrClient::fetch(self, method, endpoint, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> &'a str {
        request.headers().get(name).and_then(|h| h.to_str().ok()).unwrap()
    }

    #[test]
    fn club_request_is_authenticated_get() {
        let client = ZrClient::new(Some("secret".into())).unwrap();
        let request = client.build_request(Method::GET, "clubs/20650", None).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.url().as_str(),
            "https://zwift-ranking.herokuapp.com/public/clubs/20650"
        );
        assert_eq!(header(&request, "Authorization"), "secret");
        assert!(request.body().is_none());
    }

    #[test]
    fn riders_request_posts_id_array() {
        let client = ZrClient::new(Some("secret".into())).unwrap();
        let payload = json!([5574, 5879996]);
        let request = client
            .build_request(Method::POST, "riders/", Some(&payload))
            .unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().path(), "/public/riders/");
        assert_eq!(header(&request, "Content-Type"), "application/json");
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(body).unwrap(), payload);
    }

    #[test]
    fn missing_or_blank_key_is_configuration_error() {
        for key in [None, Some("  ".to_string())] {
            let client = ZrClient::new(key).unwrap();
            let err = client
                .build_request(Method::GET, "clubs/1", None)
                .unwrap_err();
            assert!(matches!(err, ApiError::Configuration(_)));
        }
    }

    #[test]
    fn debug_output_hides_key() {
        let client = ZrClient::new(Some("secret".into())).unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("has_api_key: true"));
    }
}
