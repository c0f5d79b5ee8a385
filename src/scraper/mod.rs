pub mod annual_reports;
pub mod cleaner;
pub mod http_client;
pub mod news;
pub mod nse;
pub mod parsers;
pub mod web_search;

use crate::models::{ReportReference, SearchResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use self::http_client::{FetchError, HttpClient};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A source that could not be reached. Parse problems are not errors: they
/// degrade to empty results.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(#[from] FetchError),

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("failed to read body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// A site that lists downloadable reports for a company.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Folder name under the downloads root, usually the site host.
    fn name(&self) -> &str;

    /// Client to download this source's files with (cookies and headers included).
    fn http(&self) -> &HttpClient;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SourceError>;

    async fn list_reports(
        &self,
        company: &SearchResult,
    ) -> Result<Vec<ReportReference>, SourceError>;

    /// Sustainability-specific (BRSR) filings, for sources that tell them apart.
    async fn list_sustainability_reports(
        &self,
        _company: &SearchResult,
    ) -> Result<Vec<ReportReference>, SourceError> {
        Ok(Vec::new())
    }
}

// ── Helpers shared by the clients ─────────────────────────────────────────────

/// Read a successful response as text; any other status is a `SourceError::Status`.
pub(crate) async fn read_text(url: &str, resp: reqwest::Response) -> Result<String, SourceError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(SourceError::Status {
            url: url.to_string(),
            status,
        });
    }
    resp.text().await.map_err(|source| SourceError::Body {
        url: url.to_string(),
        source,
    })
}
