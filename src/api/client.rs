//! HTTP client for the metrics provider.

use super::{AllResponse, HashResponse};
use crate::config::Settings;
use crate::error::ApiError;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Longest error body kept in an `ApiError::Status`.
const MAX_ERROR_BODY: usize = 256;

/// Fetches `/api/all` and `/api/hash` from the configured provider.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    hash_endpoint: String,
}

impl ApiClient {
    pub fn new(settings: &Settings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            http,
            endpoint: settings.all_endpoint(),
            hash_endpoint: settings.hash_endpoint(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch and decode one combined payload.
    ///
    /// The provider answers a partially failed collection with a non-2xx
    /// status and an `{"error": ..., "data": {...}}` envelope; in that case
    /// the data that did get collected is returned.
    pub async fn fetch_all(&self) -> Result<AllResponse, ApiError> {
        let (status, body) = self.get(&self.endpoint).await?;
        if status.is_success() {
            return Ok(AllResponse::from_json(&body)?);
        }

        match salvage_partial(&body) {
            Some((upstream_error, data)) => {
                warn!(
                    status = status.as_u16(),
                    upstream_error = %upstream_error,
                    "metrics API reported a partial failure, using the data it returned",
                );
                Ok(data)
            }
            None => Err(status_error(status, &body)),
        }
    }

    /// Fetch the provider's current random digest.
    pub async fn fetch_hash(&self) -> Result<HashResponse, ApiError> {
        let (status, body) = self.get(&self.hash_endpoint).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let hash = HashResponse::from_json(&body)?;
        if let Some(ref warning) = hash.warning {
            warn!(warning = %warning, "hash endpoint reported a warning");
        }
        Ok(hash)
    }

    async fn get(&self, url: &str) -> Result<(StatusCode, Vec<u8>), ApiError> {
        let started = Instant::now();
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;

        debug!(
            endpoint = %url,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched",
        );
        Ok((status, body.to_vec()))
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> ApiError {
    let mut text = String::from_utf8_lossy(body).trim().to_string();
    if text.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        text.truncate(cut);
    }
    ApiError::Status {
        status: status.as_u16(),
        body: text,
    }
}

/// Extract `data` from an error envelope, if it carries any.
fn salvage_partial(body: &[u8]) -> Option<(String, AllResponse)> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let envelope = value.as_object()?;
    let data = envelope.get("data")?;
    if !data.is_object() {
        return None;
    }
    let upstream_error = envelope
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Some((upstream_error, AllResponse::from_value(data.clone())))
}
