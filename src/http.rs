//! HTTP client for the trail API.
//!
//! This module provides:
//! - `POST /trails` to persist a recorded trail ([`TrailStore`] implementation)
//! - `GET /trails?page=&limit=` to list historical trails
//! - `DELETE /trails/{id}`
//!
//! Rate-limited responses (429) are retried with exponential backoff for every request.
//! Transport errors are retried only for GET and DELETE: a create that failed mid-flight may
//! already have been stored, and retrying it blindly would duplicate the trail.

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;

use crate::config::ApiConfig;
use crate::history::{parse_trail_list, StoredTrail};
use crate::record::TrailRecord;
use crate::store::{TrailId, TrailStore};
use crate::{StoreError, TrailError};

/// Upper bound on the backoff exponent (500ms, 1s, 2s, 4s max).
const MAX_BACKOFF_SHIFT: u32 = 3;

#[derive(Debug, Deserialize)]
struct IdOnly {
    #[serde(rename = "_id", alias = "id")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreatedTrail {
    Trail { trail: IdOnly },
    Data { data: IdOnly },
    Bare(IdOnly),
}

/// Extract the new trail's id from a create response.
fn parse_created_id(body: &[u8]) -> Result<TrailId, StoreError> {
    let created: CreatedTrail =
        serde_json::from_slice(body).map_err(|e| StoreError::Decode(e.to_string()))?;
    Ok(match created {
        CreatedTrail::Trail { trail } => trail.id,
        CreatedTrail::Data { data } => data.id,
        CreatedTrail::Bare(bare) => bare.id,
    })
}

/// Wait before the next attempt.
fn retry_delay(status: Option<StatusCode>, attempt: u32) -> Duration {
    let shift = attempt.min(MAX_BACKOFF_SHIFT);
    match status {
        Some(StatusCode::TOO_MANY_REQUESTS) => Duration::from_millis(500 * (1 << shift)),
        _ => Duration::from_millis(200 * (1 << shift)),
    }
}

/// Client for the trail endpoints.
pub struct TrailApiClient {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    max_retries: u32,
}

impl TrailApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, TrailError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TrailError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: None,
            max_retries: config.max_retries,
        })
    }

    /// Attach the caller's bearer credential to every request.
    pub fn with_bearer_token(mut self, token: &str) -> Self {
        self.auth_header = Some(format!("Bearer {}", token));
        self
    }

    fn trails_url(&self) -> String {
        format!("{}/trails", self.base_url)
    }

    /// Fetch one page of historical trails.
    pub async fn list_trails(&self, page: u32, limit: u32) -> Result<Vec<StoredTrail>, StoreError> {
        let url = format!("{}?page={}&limit={}", self.trails_url(), page, limit);
        let body = self.execute(Method::GET, &url, None).await?;
        let trails = parse_trail_list(&body)?;
        info!("[TrailApiClient] Loaded {} trails (page {})", trails.len(), page);
        Ok(trails)
    }

    pub async fn delete_trail(&self, id: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.trails_url(), id);
        self.execute(Method::DELETE, &url, None).await?;
        info!("[TrailApiClient] Deleted trail {}", id);
        Ok(())
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&TrailRecord>,
    ) -> Result<Vec<u8>, StoreError> {
        let idempotent = method != Method::POST;
        let mut retries = 0;
        let req_start = Instant::now();

        loop {
            let mut request = self.client.request(method.clone(), url);
            if let Some(ref auth) = self.auth_header {
                request = request.header(AUTHORIZATION, auth);
            }
            if let Some(record) = body {
                request = request.json(record);
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status == StatusCode::TOO_MANY_REQUESTS && retries < self.max_retries {
                        let wait = retry_delay(Some(status), retries);
                        retries += 1;
                        warn!(
                            "[TrailApiClient] {} {} rate limited, retry {} after {:?}",
                            method, url, retries, wait
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }

                    if !status.is_success() {
                        return Err(StoreError::Status {
                            code: status.as_u16(),
                        });
                    }

                    let bytes = resp
                        .bytes()
                        .await
                        .map_err(|e| StoreError::Transport(format!("Body download error: {}", e)))?;

                    debug!(
                        "[TrailApiClient] {} {} -> {} ({} bytes) in {:?}",
                        method,
                        url,
                        status,
                        bytes.len(),
                        req_start.elapsed()
                    );
                    return Ok(bytes.to_vec());
                }
                Err(e) => {
                    if !idempotent || retries >= self.max_retries {
                        return Err(StoreError::Transport(e.to_string()));
                    }

                    let wait = retry_delay(None, retries);
                    retries += 1;
                    warn!(
                        "[TrailApiClient] {} {} error: {}, retry {} after {:?}",
                        method, url, e, retries, wait
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

impl TrailStore for TrailApiClient {
    async fn create_trail(&self, record: &TrailRecord) -> Result<TrailId, StoreError> {
        let body = self.execute(Method::POST, &self.trails_url(), Some(record)).await?;
        parse_created_id(&body)
    }
}
