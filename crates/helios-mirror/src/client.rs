//! HTTP client for the telemetry mirror
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | `POST` | `/frames` | store one record, returns [`MirrorAck`] |
//! | `GET` | `/frames` | every stored record |
//! | `GET` | `/frames/{id}` | one record, or 404 |

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{MirrorError, Result};
use crate::record::{MirrorAck, MirrorRecord};

/// Default mirror base URL
pub const DEFAULT_MIRROR_URL: &str = "http://localhost:8080";

/// Default request timeout in milliseconds
pub const DEFAULT_MIRROR_TIMEOUT_MS: u64 = 1000;

/// Mirror client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Base URL; `/frames` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(
        with = "helios_link::config::humantime_serde",
        default = "default_timeout"
    )]
    pub timeout: Duration,
}

fn default_base_url() -> String {
    DEFAULT_MIRROR_URL.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_MIRROR_TIMEOUT_MS)
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_timeout(),
        }
    }
}

impl MirrorConfig {
    /// Config for `base_url` with the default timeout
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Client for the mirror's `/frames` resource
#[derive(Debug, Clone)]
pub struct MirrorClient {
    http: Client,
    frames_url: String,
}

impl MirrorClient {
    /// Build a client from `config`
    pub fn new(config: &MirrorConfig) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(MirrorError::InvalidUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("helios-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            frames_url: format!("{base}/frames"),
        })
    }

    /// URL of the frames collection
    pub fn frames_url(&self) -> &str {
        &self.frames_url
    }

    /// Store one record
    pub async fn send(&self, record: &MirrorRecord) -> Result<MirrorAck> {
        trace!(url = %self.frames_url, "POST record");
        let response = self.http.post(&self.frames_url).json(record).send().await?;
        let response = check_status(response).await?;
        let ack: MirrorAck = response.json().await?;
        debug!(id = ?ack.id, "Mirror stored record");
        Ok(ack)
    }

    /// Every stored record
    ///
    /// The mirror answers 404 when its table is empty; that is an empty list.
    pub async fn fetch_all(&self) -> Result<Vec<MirrorRecord>> {
        let response = self.http.get(&self.frames_url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let body: Value = check_status(response).await?.json().await?;

        // Either a bare array or an envelope with a `data` array
        let rows = match body {
            Value::Array(rows) => rows,
            Value::Object(mut envelope) => match envelope.remove("data") {
                Some(Value::Array(rows)) => rows,
                _ => {
                    return Err(MirrorError::UnexpectedResponse(
                        "object without a data array".into(),
                    ))
                }
            },
            other => {
                return Err(MirrorError::UnexpectedResponse(format!(
                    "expected array, got {other}"
                )))
            }
        };

        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| MirrorError::UnexpectedResponse(e.to_string()))
            })
            .collect()
    }

    /// One record by id, `None` if the mirror has no such record
    pub async fn fetch(&self, id: u64) -> Result<Option<MirrorRecord>> {
        let url = format!("{}/{id}", self.frames_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: MirrorRecord = check_status(response).await?.json().await?;
        if record.id.is_none() {
            return Err(MirrorError::UnexpectedResponse("record without id".into()));
        }
        Ok(Some(record))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(body);
    Err(MirrorError::Status {
        status: status.as_u16(),
        message,
    })
}
