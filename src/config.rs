//! Tracker configuration.
//!
//! Hosts either use [`TrackerConfig::default`] or ship a JSON document; every field is optional
//! and falls back to its default. Credentials are deliberately absent: the bearer token is
//! attached to the API client at runtime.

use serde::{Deserialize, Serialize};

use crate::position::PositionOptions;
use crate::record::DeviceEnvironment;
use crate::TrailError;

/// Connection settings for the trail API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct ApiConfig {
    /// Base URL of the API, without a trailing slash (e.g. `https://api.example.com/api`)
    pub base_url: String,

    /// Per-request timeout.
    /// Default: 30 seconds
    pub request_timeout_secs: u64,

    /// Retries for rate-limited or (for idempotent requests) failed calls.
    /// Default: 3
    pub max_retries: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Everything the recorder needs besides the platform bindings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct TrackerConfig {
    pub position: PositionOptions,
    pub api: ApiConfig,
    pub device: DeviceEnvironment,
}

impl TrackerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, TrailError> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| TrailError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrailError> {
        let url = &self.api.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TrailError::Config(format!("api.baseUrl must be an http(s) URL, got {:?}", url)));
        }
        if self.api.request_timeout_secs == 0 {
            return Err(TrailError::Config("api.requestTimeoutSecs must be positive".to_string()));
        }
        if self.position.timeout_ms == 0 {
            return Err(TrailError::Config("position.timeoutMs must be positive".to_string()));
        }
        Ok(())
    }
}
