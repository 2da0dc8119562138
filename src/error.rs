//! Error types for the fallible collaborators around the sampler.

use thiserror::Error;

/// Failure fetching or decoding the metrics API payload.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON from metrics API: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Invalid runtime settings.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("interval must be a positive number of seconds, got {0}")]
    Interval(f64),

    #[error("timeout must be a positive number of seconds, got {0}")]
    Timeout(f64),

    #[error("metrics API URL must start with http:// or https://, got '{0}'")]
    Url(String),

    #[error("process row limit must be at least 1")]
    TopN,
}
