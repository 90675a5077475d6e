//! CDN purge clients

use crate::error::{CdnError, Result};
use crate::purge::PurgeRequest;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use citadel_config::CdnSettings;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Edge cache purge API.
#[async_trait]
pub trait CdnClient: Send + Sync {
    /// Remove the described content from the edge.
    async fn purge(&self, request: &PurgeRequest) -> Result<()>;

    /// Public URL of a path on the CDN.
    fn build_url(&self, path: &str) -> String;
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Purge client that posts JSON requests to an HTTP purge endpoint.
///
/// Requests carry `Authorization: Bearer <token>` when a token is set.
/// Timeouts, connection failures, 408, 429 and 5xx responses are retried per
/// the [`RetryPolicy`]; any other status fails immediately.
#[derive(Debug, Clone)]
pub struct HttpCdnClient {
    http_client: Client,
    endpoint: Url,
    api_token: Option<String>,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl HttpCdnClient {
    pub fn new(
        endpoint: &str,
        api_token: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("citadel-cdn/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            endpoint,
            api_token,
            base_url: base_url.into(),
            retry_policy,
        })
    }

    /// Build a client from the `cdn` settings section.
    pub fn from_settings(settings: &CdnSettings) -> Result<Self> {
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or_else(|| CdnError::Config("cdn.endpoint is not set".to_string()))?;

        Self::new(
            endpoint,
            settings.api_token.clone(),
            settings.base_url.clone(),
            settings.timeout(),
            RetryPolicy::exponential(settings.max_attempts),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    async fn send_once(&self, request: &PurgeRequest) -> Result<()> {
        let mut builder = self.http_client.post(self.endpoint.clone()).json(request);
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CdnError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CdnClient for HttpCdnClient {
    async fn purge(&self, request: &PurgeRequest) -> Result<()> {
        request.validate()?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(endpoint = %self.endpoint, attempt, "Sending CDN purge");

            match self.send_once(request).await {
                Ok(()) => {
                    info!(
                        urls = request.urls.len(),
                        tags = request.tags.len(),
                        purge_all = request.purge_all,
                        attempt,
                        "CDN purge accepted"
                    );
                    return Ok(());
                }
                Err(e) if e.is_retryable() && self.retry_policy.should_retry(attempt) => {
                    let delay = self.retry_policy.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, ?delay, "CDN purge failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(error = %e, attempt, "CDN purge failed");
                    return Err(e);
                }
            }
        }
    }

    fn build_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// Client used when the CDN is disabled. Accepts every valid request.
#[derive(Debug, Clone)]
pub struct NoopCdnClient {
    base_url: String,
}

impl NoopCdnClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CdnClient for NoopCdnClient {
    async fn purge(&self, request: &PurgeRequest) -> Result<()> {
        request.validate()?;
        debug!(tags = ?request.tags, urls = ?request.urls, "CDN disabled, purge skipped");
        Ok(())
    }

    fn build_url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }
}

/// In-process client that records every purge. Can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingCdnClient {
    requests: Mutex<Vec<PurgeRequest>>,
    failing: AtomicBool,
}

impl RecordingCdnClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent purges fail with a 503.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful purges, oldest first.
    pub fn requests(&self) -> Vec<PurgeRequest> {
        self.requests.lock().clone()
    }

    /// Every tag purged so far.
    pub fn purged_tags(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .flat_map(|r| r.tags.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl CdnClient for RecordingCdnClient {
    async fn purge(&self, request: &PurgeRequest) -> Result<()> {
        request.validate()?;
        if self.failing.load(Ordering::SeqCst) {
            return Err(CdnError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.requests.lock().push(request.clone());
        Ok(())
    }

    fn build_url(&self, path: &str) -> String {
        join_url("http://cdn.test", path)
    }
}
