use crate::config::ScraperConfig;
use rand::{Rng, rng};
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Retry policy ──────────────────────────────────────────────────────────────

/// Backoff rules shared by every site client and the downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_base: Duration,
    pub server_error_delay: Duration,
    pub network_error_delay: Duration,
    pub politeness_min: Duration,
    pub politeness_max: Duration,
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn is_retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    /// `base * 2^attempt`, attempt counted from 0.
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        self.rate_limit_base.saturating_mul(1u32 << attempt.min(16))
    }

    /// How long to wait before retrying after `status`, or `None` if the status is final.
    pub fn delay_for_status(&self, status: StatusCode, attempt: u32) -> Option<Duration> {
        if !Self::is_retryable(status) {
            return None;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            Some(self.rate_limit_backoff(attempt))
        } else {
            Some(self.server_error_delay)
        }
    }

    pub fn politeness_delay(&self) -> Duration {
        if self.politeness_max <= self.politeness_min {
            return self.politeness_min;
        }
        let min = self.politeness_min.as_millis() as u64;
        let max = self.politeness_max.as_millis() as u64;
        Duration::from_millis(rng().random_range(min..=max))
    }

    /// Sleep for a random duration inside the politeness window.
    pub async fn polite_delay(&self) {
        pause(self.politeness_delay()).await;
    }
}

pub(crate) async fn pause(duration: Duration) {
    if !duration.is_zero() {
        sleep(duration).await;
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{url}: gave up after {attempts} attempts ({last})")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct HttpClient {
    inner: reqwest::Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig, policy: RetryPolicy) -> Result<Self, FetchError> {
        Self::with_headers(config, policy, HeaderMap::new())
    }

    /// Client that sends `headers` on every request on top of the user agent.
    pub fn with_headers(
        config: &ScraperConfig,
        policy: RetryPolicy,
        headers: HeaderMap,
    ) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()
            .map_err(FetchError::Build)?;

        Ok(Self {
            inner,
            policy,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a request under the client's own policy.
    pub async fn execute<F>(&self, url: &str, build: F) -> Result<Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        self.execute_with(&self.policy, url, build).await
    }

    /// Run a request with politeness delay and retry on 429, 5xx and transport errors.
    ///
    /// The request is rebuilt for every attempt. The first response with a
    /// non-retryable status is returned as-is, 4xx included; callers decide what a
    /// 404 means for them.
    pub async fn execute_with<F>(
        &self,
        policy: &RetryPolicy,
        url: &str,
        build: F,
    ) -> Result<Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        self.execute_from(policy, 0, url, build)
            .await
            .map(|(resp, _)| resp)
    }

    /// [`execute_with`](Self::execute_with) resuming at `first_attempt`, for callers
    /// with their own retry loop. Also returns the attempt the response came from.
    pub async fn execute_from<F>(
        &self,
        policy: &RetryPolicy,
        first_attempt: u32,
        url: &str,
        build: F,
    ) -> Result<(Response, u32), FetchError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let mut last = String::from("no attempts made");

        for attempt in first_attempt..policy.max_attempts {
            policy.polite_delay().await;
            debug!("{} (attempt {}/{})", url, attempt + 1, policy.max_attempts);

            match build(&self.inner).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let Some(backoff) = policy.delay_for_status(status, attempt) else {
                        return Ok((resp, attempt));
                    };
                    warn!("HTTP {} from {} on attempt {}", status, url, attempt + 1);
                    last = format!("HTTP {}", status);
                    if attempt + 1 < policy.max_attempts {
                        debug!("Backing off {:?}", backoff);
                        pause(backoff).await;
                    }
                }
                Err(e) => {
                    warn!("Request to {} failed on attempt {}: {}", url, attempt + 1, e);
                    last = e.to_string();
                    if attempt + 1 < policy.max_attempts {
                        pause(policy.network_error_delay).await;
                    }
                }
            }
        }

        Err(FetchError::Exhausted {
            url: url.to_string(),
            attempts: policy.max_attempts,
            last,
        })
    }

    /// GET with extra per-request headers and the client timeout.
    pub async fn get(&self, url: &str, headers: &HeaderMap) -> Result<Response, FetchError> {
        let timeout = self.timeout;
        self.execute(url, |c| c.get(url).headers(headers.clone()).timeout(timeout))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::spawn_server;
    use axum::Router;
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            rate_limit_base: Duration::from_secs(5),
            server_error_delay: Duration::from_secs(2),
            network_error_delay: Duration::from_secs(2),
            politeness_min: Duration::ZERO,
            politeness_max: Duration::ZERO,
        }
    }

    #[test]
    fn rate_limit_backoff_doubles() {
        let p = policy();
        assert_eq!(p.rate_limit_backoff(0), Duration::from_secs(5));
        assert_eq!(p.rate_limit_backoff(1), Duration::from_secs(10));
        assert_eq!(p.rate_limit_backoff(2), Duration::from_secs(20));
    }

    #[test]
    fn only_429_and_5xx_are_retried() {
        let p = policy();
        assert!(RetryPolicy::is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(RetryPolicy::is_retryable(StatusCode::BAD_GATEWAY));
        assert!(!RetryPolicy::is_retryable(StatusCode::NOT_FOUND));
        assert_eq!(
            p.delay_for_status(StatusCode::SERVICE_UNAVAILABLE, 2),
            Some(Duration::from_secs(2))
        );
        assert_eq!(p.delay_for_status(StatusCode::FORBIDDEN, 0), None);
        assert_eq!(p.delay_for_status(StatusCode::OK, 0), None);
    }

    #[test]
    fn politeness_delay_stays_in_window() {
        let mut p = policy();
        p.politeness_min = Duration::from_millis(10);
        p.politeness_max = Duration::from_millis(20);
        for _ in 0..50 {
            let d = p.politeness_delay();
            assert!(d >= p.politeness_min && d <= p.politeness_max);
        }
    }

    #[tokio::test]
    async fn retries_through_rate_limit_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down")
                    } else {
                        (axum::http::StatusCode::OK, "ok")
                    }
                }
            }),
        );
        let base = spawn_server(app).await;

        let cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        let client = HttpClient::new(&cfg.scraper, cfg.retry.policy()).unwrap();
        let resp = client.get(&format!("{}/flaky", base), &HeaderMap::new()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_server_errors_exhaust_the_budget() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/down",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }
            }),
        );
        let base = spawn_server(app).await;

        let cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        let client = HttpClient::new(&cfg.scraper, cfg.retry.policy()).unwrap();
        let err = client.get(&format!("{}/down", base), &HeaderMap::new()).await.unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn resumed_execution_only_spends_the_remaining_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/down",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::SERVICE_UNAVAILABLE
                }
            }),
        );
        let base = spawn_server(app).await;

        let cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        let client = HttpClient::new(&cfg.scraper, cfg.retry.policy()).unwrap();
        let url = format!("{}/down", base);
        let err = client
            .execute_from(client.policy(), 2, &url, |c| c.get(&url))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_are_returned_without_retry() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/missing",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::http::StatusCode::NOT_FOUND
                }
            }),
        );
        let base = spawn_server(app).await;

        let cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        let client = HttpClient::new(&cfg.scraper, cfg.retry.policy()).unwrap();
        let resp = client.get(&format!("{}/missing", base), &HeaderMap::new()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
