use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Decoded body of a successful ranking API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("ranking API returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("failed to reach ranking API: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid JSON from ranking API: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Transport(err) => err.status(),
            _ => None,
        }
    }
}
