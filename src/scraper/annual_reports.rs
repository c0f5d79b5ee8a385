//! annualreports.com: HTML search page and per-company report listings.

use crate::config::{ScraperConfig, SourcesConfig};
use crate::models::{ReportReference, SearchResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::{debug, info, warn};

use super::cleaner::source_host;
use super::http_client::{FetchError, HttpClient, RetryPolicy};
use super::parsers::{parse_company_links, parse_report_links};
use super::{ReportSource, SourceError, read_text};

pub struct AnnualReportsClient {
    client: HttpClient,
    base_url: String,
    host: String,
}

impl AnnualReportsClient {
    pub fn new(
        scraper: &ScraperConfig,
        sources: &SourcesConfig,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        let base_url = sources.annual_reports_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        if let Ok(referer) = HeaderValue::from_str(&format!("{}/", base_url)) {
            headers.insert(REFERER, referer);
        }

        Ok(Self {
            client: HttpClient::with_headers(scraper, policy, headers)?,
            host: source_host(&base_url),
            base_url,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/Companies", self.base_url)
    }
}

#[async_trait]
impl ReportSource for AnnualReportsClient {
    fn name(&self) -> &str {
        &self.host
    }

    fn http(&self) -> &HttpClient {
        &self.client
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SourceError> {
        let url = self.search_url();
        let timeout = self.client.timeout();
        info!("Searching {} for {:?}", self.host, query);

        let resp = self
            .client
            .execute(&url, |c| c.get(&url).query(&[("search", query)]).timeout(timeout))
            .await?;

        // An exact match redirects straight to the company page
        let final_url = resp.url().to_string();
        if final_url.contains("/Company/") {
            debug!("Search redirected to {}", final_url);
            return Ok(vec![SearchResult {
                name: query.to_string(),
                identifier: final_url,
            }]);
        }

        let html = read_text(&url, resp).await?;
        Ok(parse_company_links(&html, &self.base_url).unwrap_or_else(|e| {
            warn!("{}: could not parse search results: {:#}", self.host, e);
            Vec::new()
        }))
    }

    async fn list_reports(
        &self,
        company: &SearchResult,
    ) -> Result<Vec<ReportReference>, SourceError> {
        let url = company.identifier.as_str();
        info!("Fetching reports from {}", url);

        let resp = self.client.get(url, &HeaderMap::new()).await?;
        let html = read_text(url, resp).await?;

        Ok(parse_report_links(&html, &self.base_url).unwrap_or_else(|e| {
            warn!("{}: could not parse report links: {:#}", self.host, e);
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
    use axum::extract::Query;
    use axum::response::{Html, IntoResponse, Redirect, Response};
    use axum::routing::get;
    use std::collections::HashMap;

    async fn companies(Query(q): Query<HashMap<String, String>>) -> Response {
        match q.get("search").map(String::as_str) {
            Some("Acme") => Redirect::to("/Company/acme").into_response(),
            _ => Html(concat!(
                r#"<a href="/Company/acme">Acme Corp</a>"#,
                r#"<a href="/Company/acme-energy">Acme Energy</a>"#,
            ))
            .into_response(),
        }
    }

    async fn company_page() -> Html<&'static str> {
        Html(
            r#"<a href="/files/acme_2021.pdf">2021 Annual Report</a>
               <a href="/files/acme_2022.pdf">2022 Annual Report</a>"#,
        )
    }

    async fn client() -> AnnualReportsClient {
        let app = Router::new()
            .route("/Companies", get(companies))
            .route("/Company/acme", get(company_page));
        let base = spawn_server(app).await;
        let mut cfg = AppConfig::for_tests(std::path::Path::new("unused"));
        cfg.sources.annual_reports_url = base;
        AnnualReportsClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy()).unwrap()
    }

    #[tokio::test]
    async fn search_follows_exact_match_redirect() {
        let client = client().await;
        let results = client.search("Acme").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Acme");
        assert!(results[0].identifier.ends_with("/Company/acme"));
    }

    #[tokio::test]
    async fn search_parses_result_list() {
        let client = client().await;
        let results = client.search("Acm").await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Acme Corp", "Acme Energy"]);
    }

    #[tokio::test]
    async fn list_reports_sorted_newest_first() {
        let client = client().await;
        let company = client.search("Acme").await.unwrap().remove(0);
        let reports = client.list_reports(&company).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].year, "2022");
        assert!(reports[0].url.ends_with("/files/acme_2022.pdf"));
        assert_eq!(client.name(), "127.0.0.1");
    }
}
