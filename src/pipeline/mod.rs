//! Pipeline orchestrator: ties site clients → downloader → storage together.
//!
//! ## Steps
//!
//! For one company query, in order and one request at a time:
//!   1. Report sources (annualreports.com, NSE): search, take the first match,
//!      list its reports and download them. NSE's BRSR filings go to `BRSR/`.
//!   2. Web search for sustainability and benchmark PDFs.
//!   3. News and Reddit snapshots.
//!
//! A failing source is logged and skipped; it never stops the others.
//! Idempotent: files already on disk as valid PDFs are not requested again.

use crate::config::AppConfig;
use crate::models::ReportReference;
use crate::scraper::annual_reports::AnnualReportsClient;
use crate::scraper::cleaner::{report_filename, source_host};
use crate::scraper::http_client::HttpClient;
use crate::scraper::news::NewsClient;
use crate::scraper::nse::NseClient;
use crate::scraper::web_search::{BENCHMARK_QUERIES, SUSTAINABILITY_QUERIES, WebSearchClient};
use crate::scraper::{ReportSource, SourceError};
use crate::storage::{
    DownloadOutcome, Downloader, Layout, Section, company_folder, write_snapshot,
};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub const NEWS_PREFIX: &str = "news_fulltext";
pub const SOCIAL_PREFIX: &str = "social_media_consolidated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceSelection {
    #[value(name = "annualreports")]
    AnnualReports,
    Nse,
    Sustainability,
    News,
    All,
}

impl SourceSelection {
    pub fn includes(self, other: SourceSelection) -> bool {
        self == SourceSelection::All || self == other
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub sources_tried: usize,
    pub sources_failed: usize,
    pub reports_found: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub news_items: usize,
    pub social_posts: usize,
}

pub struct Pipeline {
    config: AppConfig,
    layout: Layout,
    downloader: Downloader,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        let layout = Layout::new(&config.download.root);
        let downloader = Downloader::new(&config.download, config.retry.policy());
        Self {
            config,
            layout,
            downloader,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Site clients for the report sources in `selection`.
    pub fn report_sources(&self, selection: SourceSelection) -> Result<Vec<Box<dyn ReportSource>>> {
        let cfg = &self.config;
        let mut sources: Vec<Box<dyn ReportSource>> = Vec::new();

        if selection.includes(SourceSelection::AnnualReports) {
            let client = AnnualReportsClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy())
                .context("Failed to build annualreports.com client")?;
            sources.push(Box::new(client));
        }
        if selection.includes(SourceSelection::Nse) {
            let client = NseClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy())
                .context("Failed to build NSE client")?;
            sources.push(Box::new(client));
        }
        Ok(sources)
    }

    pub async fn run(&self, company: &str, selection: SourceSelection) -> Result<PipelineStats> {
        company_folder(company)?;
        let mut stats = PipelineStats::default();

        // ── 1. Report sources ────────────────────────────────────────────────
        let sources = self.report_sources(selection)?;
        self.run_sources(company, &sources, &mut stats).await;

        // ── 2. Sustainability & benchmark PDFs ───────────────────────────────
        if selection.includes(SourceSelection::Sustainability) {
            info!("=== Secondary reports (TCFD/CDP/Benchmarks) ===");
            stats.sources_tried += 1;
            if let Err(e) = self.run_web_search(company, &mut stats).await {
                warn!("Web search: {:#}", e);
                stats.sources_failed += 1;
            }
        }

        // ── 3. News & social ─────────────────────────────────────────────────
        if selection.includes(SourceSelection::News) {
            info!("=== News & social media ===");
            stats.sources_tried += 1;
            if let Err(e) = self.run_news(company, &mut stats).await {
                warn!("News: {:#}", e);
                stats.sources_failed += 1;
            }
        }

        info!(
            "=== Done: {} reports found | {} downloaded | {} already on disk | {} failed | \
             {} news | {} posts ===",
            stats.reports_found,
            stats.downloaded,
            stats.skipped,
            stats.failed,
            stats.news_items,
            stats.social_posts,
        );
        Ok(stats)
    }

    /// Every report source in order; a failure only skips that source.
    pub async fn run_sources(
        &self,
        company: &str,
        sources: &[Box<dyn ReportSource>],
        stats: &mut PipelineStats,
    ) {
        for source in sources {
            info!("=== Processing {} ===", source.name());
            stats.sources_tried += 1;
            if let Err(e) = self.process_source(source.as_ref(), company, stats).await {
                warn!("{}: {}", source.name(), e);
                stats.sources_failed += 1;
            }
        }
    }

    async fn process_source(
        &self,
        source: &dyn ReportSource,
        company: &str,
        stats: &mut PipelineStats,
    ) -> Result<(), SourceError> {
        let results = source.search(company).await?;
        let Some(target) = results.first() else {
            warn!("No companies found on {}", source.name());
            return Ok(());
        };
        info!("Found: {} ({})", target.name, target.identifier);

        let reports = source.list_reports(target).await?;
        info!("Found {} reports", reports.len());
        let folder = self.layout.section_dir(source.name(), company, Section::Reports);
        self.download_all(source.http(), &reports, &folder, stats).await;

        let brsr = source.list_sustainability_reports(target).await?;
        if !brsr.is_empty() {
            info!("Found {} standalone BRSR reports", brsr.len());
            let folder = self.layout.section_dir(source.name(), company, Section::Brsr);
            self.download_all(source.http(), &brsr, &folder, stats).await;
        }
        Ok(())
    }

    async fn download_all(
        &self,
        http: &HttpClient,
        reports: &[ReportReference],
        folder: &Path,
        stats: &mut PipelineStats,
    ) {
        stats.reports_found += reports.len();
        for report in reports {
            let filename = report_filename(report);
            match self.downloader.download(http, &report.url, folder, &filename).await {
                Ok(DownloadOutcome::Skipped) => stats.skipped += 1,
                Ok(_) => stats.downloaded += 1,
                Err(e) => {
                    warn!("Failed to download {}: {}", report.url, e);
                    stats.failed += 1;
                }
            }
        }
    }

    async fn run_web_search(&self, company: &str, stats: &mut PipelineStats) -> Result<()> {
        let cfg = &self.config;
        let search = WebSearchClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy())
            .context("Failed to build web search client")?;

        let groups = [
            (SUSTAINABILITY_QUERIES, Section::Sustainability),
            (BENCHMARK_QUERIES, Section::Benchmarks),
        ];
        for (queries, section) in groups {
            let folder = self.layout.section_dir(search.name(), company, section);
            for report_type in queries {
                match search.search_pdfs(company, report_type).await {
                    Ok(reports) => self.download_all(search.http(), &reports, &folder, stats).await,
                    Err(e) => warn!("{} search failed: {}", report_type, e),
                }
            }
        }
        Ok(())
    }

    async fn run_news(&self, company: &str, stats: &mut PipelineStats) -> Result<()> {
        let cfg = &self.config;
        let news = NewsClient::new(&cfg.scraper, &cfg.sources, cfg.retry.policy())
            .context("Failed to build news client")?;

        let items = news.fetch_massive_news(company, news.news_limit()).await;
        stats.news_items = items.len();
        let news_dir = self
            .layout
            .section_dir(&source_host(&cfg.sources.news_rss_url), company, Section::News);
        write_snapshot(&news_dir, NEWS_PREFIX, &items)?;

        let posts = news.fetch_reddit_posts(company).await.unwrap_or_else(|e| {
            warn!("Reddit: {}", e);
            Vec::new()
        });
        stats.social_posts = posts.len();
        let social_dir = self
            .layout
            .section_dir(&source_host(&cfg.sources.reddit_url), company, Section::Social);
        write_snapshot(&social_dir, SOCIAL_PREFIX, &posts)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchResult;
    use crate::scraper::http_client::FetchError;
    use crate::testing::spawn_server;
    use async_trait::async_trait;
    use axum::Router;
    use axum::http::header;
    use axum::routing::get;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockSource {
        client: HttpClient,
        base: String,
    }

    #[async_trait]
    impl ReportSource for MockSource {
        fn name(&self) -> &str {
            "mock.example"
        }

        fn http(&self) -> &HttpClient {
            &self.client
        }

        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, SourceError> {
            Ok(vec![SearchResult {
                name: "Acme".into(),
                identifier: "/Company/acme".into(),
            }])
        }

        async fn list_reports(
            &self,
            _company: &SearchResult,
        ) -> Result<Vec<ReportReference>, SourceError> {
            Ok(vec![ReportReference {
                year: "2022".into(),
                url: format!("{}/files/2022.pdf", self.base),
                description: "Annual Report".into(),
            }])
        }
    }

    struct DeadSource {
        client: HttpClient,
    }

    #[async_trait]
    impl ReportSource for DeadSource {
        fn name(&self) -> &str {
            "dead.example"
        }

        fn http(&self) -> &HttpClient {
            &self.client
        }

        async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SourceError> {
            Err(SourceError::Unavailable(FetchError::Exhausted {
                url: query.to_string(),
                attempts: 3,
                last: "connection refused".into(),
            }))
        }

        async fn list_reports(
            &self,
            _company: &SearchResult,
        ) -> Result<Vec<ReportReference>, SourceError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn end_to_end_download_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/files/2022.pdf",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ([(header::CONTENT_TYPE, "application/pdf")], b"%PDF-1.5 acme".to_vec())
                }
            }),
        );
        let base = spawn_server(app).await;

        let cfg = AppConfig::for_tests(dir.path());
        let client = || HttpClient::new(&cfg.scraper, cfg.retry.policy()).unwrap();
        let sources: Vec<Box<dyn ReportSource>> = vec![
            Box::new(DeadSource { client: client() }),
            Box::new(MockSource {
                client: client(),
                base: base.clone(),
            }),
        ];
        let pipeline = Pipeline::new(cfg.clone());

        let mut first = PipelineStats::default();
        pipeline.run_sources("Acme", &sources, &mut first).await;
        assert_eq!(first.sources_tried, 2);
        assert_eq!(first.sources_failed, 1);
        assert_eq!(first.downloaded, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let expected = dir.path().join("mock.example/Acme/2022_Annual Report.pdf");
        assert_eq!(std::fs::read(&expected).unwrap(), b"%PDF-1.5 acme");
        let files = std::fs::read_dir(dir.path().join("mock.example/Acme")).unwrap();
        assert_eq!(files.count(), 1);

        let mut second = PipelineStats::default();
        pipeline.run_sources("Acme", &sources, &mut second).await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.downloaded, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unusable_company_name_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(AppConfig::for_tests(dir.path()));

        let err = pipeline.run("???", SourceSelection::All).await.unwrap_err();
        assert!(err.to_string().contains("no usable characters"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn selection_all_includes_everything() {
        assert!(SourceSelection::All.includes(SourceSelection::Nse));
        assert!(SourceSelection::Nse.includes(SourceSelection::Nse));
        assert!(!SourceSelection::News.includes(SourceSelection::Nse));
    }

    #[test]
    fn report_sources_follow_selection() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(AppConfig::for_tests(dir.path()));
        assert_eq!(pipeline.report_sources(SourceSelection::All).unwrap().len(), 2);
        assert_eq!(pipeline.report_sources(SourceSelection::Nse).unwrap().len(), 1);
        assert!(pipeline.report_sources(SourceSelection::News).unwrap().is_empty());
    }
}
