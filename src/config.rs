//! Configuration loader and validator for the ranking ingestion pipelines.
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::db::TableRef;
use crate::resource::{SAMPLE_CLUB_ID, SAMPLE_RIDER_IDS};
use crate::zr::ZR_API_BASE;

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub api: Api,
    pub store: Store,
    pub defaults: Defaults,
}

/// Ranking API settings. The credential is not part of the file; binaries
/// read it from `ZRAPP_API_KEY` at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Embedded store location and raw destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Store {
    pub path: String,
    pub dataset: String,
    pub table: String,
}

/// Arguments used when a command is invoked without explicit input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Defaults {
    pub club_id: i64,
    pub rider_ids: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: Api {
                base_url: ZR_API_BASE.to_string(),
                timeout_secs: 30,
            },
            store: Store {
                path: "./data/raw.db".to_string(),
                dataset: "raw".to_string(),
                table: "riders".to_string(),
            },
            defaults: Defaults {
                club_id: SAMPLE_CLUB_ID,
                rider_ids: SAMPLE_RIDER_IDS.to_vec(),
            },
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Base URL with a guaranteed trailing slash so endpoint joins keep the
    /// `/public/` prefix.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let mut raw = self.api.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|_| ConfigError::Invalid("api.base_url must be an absolute URL"))
    }

    /// SQLite URL for the store; `DATABASE_URL` wins when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| format!("sqlite://{}", self.store.path))
    }

    pub fn destination(&self) -> TableRef {
        TableRef::new(&self.store.dataset, &self.store.table)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, the built-in defaults are used.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let cfg = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Config::default(),
    };
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.api.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    cfg.base_url()?;
    if cfg.api.timeout_secs == 0 {
        return Err(ConfigError::Invalid("api.timeout_secs must be > 0"));
    }

    if cfg.store.path.trim().is_empty() {
        return Err(ConfigError::Invalid("store.path must be non-empty"));
    }
    if !IDENTIFIER.is_match(&cfg.store.dataset) {
        return Err(ConfigError::Invalid("store.dataset must be a plain identifier"));
    }
    if !IDENTIFIER.is_match(&cfg.store.table) {
        return Err(ConfigError::Invalid("store.table must be a plain identifier"));
    }

    if cfg.defaults.rider_ids.is_empty() {
        return Err(ConfigError::Invalid("defaults.rider_ids must be non-empty"));
    }

    Ok(())
}

/// Example YAML matching the built-in defaults.
pub fn example() -> &'static str {
    r#"api:
  base_url: "https://zwift-ranking.herokuapp.com/public/"
  timeout_secs: 30

store:
  path: "./data/raw.db"
  dataset: "raw"
  table: "riders"

defaults:
  club_id: 20650
  rider_ids:
    - 4598636
    - 5574
    - 5879996
"#
}
