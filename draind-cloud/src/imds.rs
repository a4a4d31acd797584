//! Instance Metadata Service v2 token caching and document fetch.

use std::time::{Duration, Instant};

use draind_types::CloudError;
use tokio::sync::Mutex;

use crate::backoff::retry_with_backoff;
use crate::error::{map_reqwest_error, map_response};

const DEFAULT_BASE_URL: &str = "http://169.254.169.254";
const TOKEN_TTL_SECONDS: &str = "21600";

/// A cached IMDSv2 session token and its expiry instant.
#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Client for the instance metadata service, caching the IMDSv2 session
/// token behind a mutex (spec §9 design note) so concurrent pollers share
/// one token and refresh it at most once per expiry.
pub struct ImdsClient {
    client: reqwest::Client,
    base_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl ImdsClient {
    /// Build a client against the real link-local IMDS endpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Build a client against an arbitrary base URL (tests, proxies).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: Mutex::new(None),
        }
    }

    async fn fetch_token(&self) -> Result<String, CloudError> {
        let resp = self
            .client
            .put(format!("{}/latest/api/token", self.base_url))
            .header("X-aws-ec2-metadata-token-ttl-seconds", TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = map_response(resp).await?;
        resp.text().await.map_err(map_reqwest_error)
    }

    async fn token(&self, force_refresh: bool) -> Result<String, CloudError> {
        let mut guard = self.token.lock().await;
        if !force_refresh {
            if let Some(cached) = guard.as_ref() {
                if cached.is_fresh() {
                    return Ok(cached.value.clone());
                }
            }
        }
        let value = self.fetch_token().await?;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(21_000),
        });
        Ok(value)
    }

    /// Fetch a metadata document at `path` (e.g. `/latest/meta-data/instance-id`),
    /// retrying once on a 401 after forcing a token refresh.
    pub async fn get(&self, path: &str) -> Result<String, CloudError> {
        retry_with_backoff(|| async {
            let token = self.token(false).await?;
            let resp = self
                .client
                .get(format!("{}{}", self.base_url, path))
                .header("X-aws-ec2-metadata-token", token)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            match map_response(resp).await {
                Err(CloudError::Unauthorized(_)) => {
                    let token = self.token(true).await?;
                    let resp = self
                        .client
                        .get(format!("{}{}", self.base_url, path))
                        .header("X-aws-ec2-metadata-token", token)
                        .send()
                        .await
                        .map_err(map_reqwest_error)?;
                    let resp = map_response(resp).await?;
                    resp.text().await.map_err(map_reqwest_error)
                }
                Err(e) => Err(e),
                Ok(resp) => resp.text().await.map_err(map_reqwest_error),
            }
        })
        .await
    }

    /// Shorthand for the instance id document.
    pub async fn instance_id(&self) -> Result<String, CloudError> {
        self.get("/latest/meta-data/instance-id").await
    }
}

impl Default for ImdsClient {
    fn default() -> Self {
        Self::new()
    }
}
