//! NSE India: JSON APIs behind a cookie wall.
//!
//! The API endpoints reject requests that do not carry the cookies handed out
//! by the site root, so every client visits the root once before its first API
//! call. The visit is lazy and only marked done when it succeeds.

use crate::config::{ScraperConfig, SourcesConfig};
use crate::models::{ReportReference, SearchResult};
use crate::utils::preview;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::cleaner::source_host;
use super::http_client::{FetchError, HttpClient, RetryPolicy};
use super::parsers::{parse_autocomplete, parse_filings};
use super::{ReportSource, SourceError, read_text};

const BROWSER_HEADERS: &[(&str, &str)] = &[
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.5"),
    ("upgrade-insecure-requests", "1"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
    ("cache-control", "max-age=0"),
];

fn header_map(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in pairs {
        let name = HeaderName::from_bytes(k.as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(v)) {
            map.insert(name, value);
        }
    }
    map
}

/// Cookie bootstrap state, owned by one client.
#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
}

pub struct NseClient {
    client: HttpClient,
    base_url: String,
    archive_url: String,
    host: String,
    search_timeout: std::time::Duration,
    session: Mutex<SessionState>,
}

impl NseClient {
    pub fn new(
        scraper: &ScraperConfig,
        sources: &SourcesConfig,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let base_url = sources.nse_url.trim_end_matches('/').to_string();
        Ok(Self {
            client: HttpClient::with_headers(scraper, policy, header_map(BROWSER_HEADERS))?,
            host: source_host(&base_url),
            archive_url: sources.nse_archive_url.trim_end_matches('/').to_string(),
            base_url,
            search_timeout: std::time::Duration::from_secs(scraper.search_timeout_secs),
            session: Mutex::new(SessionState::default()),
        })
    }

    /// Visit the site root once to collect cookies. No-op after the first success.
    pub async fn ensure_session(&self) {
        let mut session = self.session.lock().await;
        if session.initialized {
            return;
        }

        info!("Initializing {} session", self.host);
        let root = format!("{}/", self.base_url);
        match self.client.get(&root, &HeaderMap::new()).await {
            Ok(resp) if resp.status().is_success() => {
                session.initialized = true;
                debug!("{} session ready", self.host);
            }
            Ok(resp) => warn!("{} root answered HTTP {}", self.host, resp.status()),
            Err(e) => warn!("Failed to initialize {} session: {}", self.host, e),
        }
    }

    #[cfg(test)]
    async fn is_initialized(&self) -> bool {
        self.session.lock().await.initialized
    }

    fn api_headers(&self, referer: &str) -> HeaderMap {
        let mut headers = header_map(&[
            ("accept", "*/*"),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("x-requested-with", "XMLHttpRequest"),
        ]);
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(reqwest::header::REFERER, value);
        }
        headers
    }

    fn reports_referer(&self, symbol: &str) -> String {
        format!(
            "{}/companies-listing/corporate-filings-annual-reports?symbol={}&tabIndex=equity",
            self.base_url, symbol
        )
    }

    async fn fetch_filings(&self, symbol: &str) -> Result<String, SourceError> {
        self.ensure_session().await;

        let url = format!("{}/api/annual-reports", self.base_url);
        let headers = self.api_headers(&self.reports_referer(symbol));
        let timeout = self.client.timeout();

        let resp = self
            .client
            .execute(&url, |c| {
                c.get(&url)
                    .query(&[("index", "equities"), ("symbol", symbol)])
                    .headers(headers.clone())
                    .timeout(timeout)
            })
            .await?;
        read_text(&url, resp).await
    }
}

#[async_trait]
impl ReportSource for NseClient {
    fn name(&self) -> &str {
        &self.host
    }

    fn http(&self) -> &HttpClient {
        &self.client
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SourceError> {
        self.ensure_session().await;
        info!("Searching {} for {:?}", self.host, query);

        let url = format!("{}/api/search/autocomplete", self.base_url);
        let headers = self.api_headers(&format!("{}/", self.base_url));
        let timeout = self.search_timeout;

        let resp = self
            .client
            .execute(&url, |c| {
                c.get(&url)
                    .query(&[("q", query)])
                    .headers(headers.clone())
                    .timeout(timeout)
            })
            .await?;
        let body = read_text(&url, resp).await?;

        Ok(parse_autocomplete(&body).unwrap_or_else(|e| {
            warn!("{}: {:#}. Response preview: {}", self.host, e, preview(&body, 200));
            Vec::new()
        }))
    }

    async fn list_reports(
        &self,
        company: &SearchResult,
    ) -> Result<Vec<ReportReference>, SourceError> {
        info!("Fetching annual reports for {}", company.identifier);
        let body = self.fetch_filings(&company.identifier).await?;
        Ok(parse_filings(&body, &self.archive_url, false).unwrap_or_else(|e| {
            warn!("{}: {:#}", self.host, e);
            Vec::new()
        }))
    }

    async fn list_sustainability_reports(
        &self,
        company: &SearchResult,
    ) -> Result<Vec<ReportReference>, SourceError> {
        info!("Fetching BRSR reports for {}", company.identifier);
        let body = self.fetch_filings(&company.identifier).await?;
        Ok(parse_filings(&body, &self.archive_url, true).unwrap_or_else(|e| {
            warn!("{}: {:#}", self.host, e);
            Vec::new()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::spawn_server;
    use axum::Router;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn nse_client(root_hits: Arc<AtomicUsize>) -> NseClient {
        let app = Router::new()
            .route(
                "/",
                get(move || {
                    let hits = root_hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        ([("set-cookie", "nsit=abc; Path=/")], "home")
                    }
                }),
            )
            .route(
                "/api/search/autocomplete",
                get(|headers: AxumHeaders| async move {
                    if headers.get("cookie").is_none() {
                        return (StatusCode::UNAUTHORIZED, "{}".to_string()).into_response();
                    }
                    let body = r#"{"symbols":[{"symbol":"ACME","symbol_info":"Acme Limited"}]}"#;
                    body.into_response()
                }),
            )
            .route(
                "/api/annual-reports",
                get(|| async {
                    r#"{"data":[
                        {"fileName":"ACME_AR_2022.pdf","fromYr":"2022"},
                        {"fileName":"ACME_BRSR_2023.pdf","fromYr":2023}
                    ]}"#
                }),
            );
        let base = spawn_server(app).await;

        let mut cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        cfg.sources.nse_url = base.clone();
        cfg.sources.nse_archive_url = format!("{}/archives", base);
        NseClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy()).unwrap()
    }

    #[tokio::test]
    async fn session_bootstrap_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let client = nse_client(hits.clone()).await;
        assert!(!client.is_initialized().await);

        let results = client.search("acme").await.unwrap();
        assert_eq!(results[0].identifier, "ACME");
        assert_eq!(results[0].name, "Acme Limited");

        client.search("acme").await.unwrap();
        client.list_reports(&results[0]).await.unwrap();
        assert!(client.is_initialized().await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn annual_and_sustainability_listings() {
        let client = nse_client(Arc::new(AtomicUsize::new(0))).await;
        let company = SearchResult {
            name: "Acme Limited".into(),
            identifier: "ACME".into(),
        };

        let all = client.list_reports(&company).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].year, "2023");
        assert!(all[1].url.ends_with("/archives/ACME_AR_2022.pdf"));

        let brsr = client.list_sustainability_reports(&company).await.unwrap();
        assert_eq!(brsr.len(), 1);
        assert_eq!(brsr[0].description, "BRSR 2023 - ACME_BRSR_2023.pdf");
    }
}
