//! Runtime settings validated from the command line.

use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_TOP_N: usize = 15;

/// Settings shared by the poller, the client and the display.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Base URL of the metrics provider, without trailing slash
    pub api_url: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub top_n: usize,
    pub disk_filter: String,
    pub process_filter: String,
    /// Poll on the interval from startup
    pub live: bool,
}

impl Settings {
    pub fn new(api_url: &str, interval_secs: f64, timeout_secs: f64, top_n: usize) -> Result<Self, ConfigError> {
        if !interval_secs.is_finite() || interval_secs <= 0.0 {
            return Err(ConfigError::Interval(interval_secs));
        }
        if !timeout_secs.is_finite() || timeout_secs <= 0.0 {
            return Err(ConfigError::Timeout(timeout_secs));
        }
        let api_url = api_url.trim().trim_end_matches('/');
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Url(api_url.to_string()));
        }
        if top_n == 0 {
            return Err(ConfigError::TopN);
        }

        Ok(Self {
            api_url: api_url.to_string(),
            interval: Duration::from_secs_f64(interval_secs),
            timeout: Duration::from_secs_f64(timeout_secs),
            top_n,
            disk_filter: String::new(),
            process_filter: String::new(),
            live: true,
        })
    }

    /// URL of the combined metrics endpoint.
    pub fn all_endpoint(&self) -> String {
        format!("{}/api/all", self.api_url)
    }

    /// URL of the random digest endpoint.
    pub fn hash_endpoint(&self) -> String {
        format!("{}/api/hash", self.api_url)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            top_n: DEFAULT_TOP_N,
            disk_filter: String::new(),
            process_filter: String::new(),
            live: true,
        }
    }
}
