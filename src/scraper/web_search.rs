//! Secondary reports (TCFD, CDP, benchmarks) found through DuckDuckGo's HTML endpoint.

use crate::config::{ScraperConfig, SourcesConfig};
use crate::models::ReportReference;
use tracing::{debug, info, warn};

use super::cleaner::{sanitize_filename, source_host, year_from_link};
use super::http_client::{FetchError, HttpClient, RetryPolicy};
use super::parsers::{is_relevant, parse_search_hits};
use super::{SourceError, read_text};

/// Report types saved under `Sustainability/`.
pub const SUSTAINABILITY_QUERIES: &[&str] = &["TCFD Report", "Sustainability Report", "CDP Report"];

/// Report types saved under `Benchmarks/`.
pub const BENCHMARK_QUERIES: &[&str] = &["Industry Outlook Report", "Peer Comparison"];

const MAX_TITLE_CHARS: usize = 50;

pub struct WebSearchClient {
    client: HttpClient,
    search_url: String,
    host: String,
    limit: usize,
}

impl WebSearchClient {
    pub fn new(
        scraper: &ScraperConfig,
        sources: &SourcesConfig,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(scraper, policy)?,
            host: source_host(&sources.web_search_url),
            search_url: sources.web_search_url.clone(),
            limit: sources.web_search_limit,
        })
    }

    pub fn name(&self) -> &str {
        &self.host
    }

    pub fn http(&self) -> &HttpClient {
        &self.client
    }

    /// Up to `limit` relevant PDF links for `"<company> <report type> filetype:pdf"`.
    pub async fn search_pdfs(
        &self,
        company: &str,
        report_type: &str,
    ) -> Result<Vec<ReportReference>, SourceError> {
        let query = format!("{} {} filetype:pdf", company, report_type);
        info!("Searching for: {}", query);

        let url = self.search_url.as_str();
        let timeout = self.client.timeout();
        let resp = self
            .client
            .execute(url, |c| c.post(url).form(&[("q", query.as_str())]).timeout(timeout))
            .await?;
        let html = read_text(url, resp).await?;

        let hits = parse_search_hits(&html).unwrap_or_else(|e| {
            warn!("{}: could not parse results: {:#}", self.host, e);
            Vec::new()
        });

        let mut reports = Vec::new();
        for hit in hits {
            if reports.len() >= self.limit {
                break;
            }
            if !is_relevant(company, &hit.title) {
                debug!("Skipping irrelevant title: {}", hit.title);
                continue;
            }
            if !hit.href.to_lowercase().contains(".pdf") {
                continue;
            }

            let mut title: String =
                sanitize_filename(&hit.title).chars().take(MAX_TITLE_CHARS).collect();
            if title.trim().is_empty() {
                title = "report".to_string();
            }
            info!("Found PDF candidate: {}", hit.title);
            reports.push(ReportReference {
                year: year_from_link(&hit.title, &hit.href),
                url: hit.href,
                description: format!("{} {}", report_type, title.trim()),
            });
        }

        Ok(reports)
    }
}
