//! Google News RSS with full article text, plus Reddit search.

use crate::config::{ScraperConfig, SourcesConfig};
use crate::models::{NewsItem, SocialPost};
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::http_client::{FetchError, HttpClient, RetryPolicy};
use super::parsers::{extract_article_text, parse_reddit, parse_rss, strip_html};
use super::{SourceError, read_text};

const CONSENT_HOST: &str = "consent.google.com";
const REDDIT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) BRSR-Research-Script/1.0";

/// Query suffixes for the wide news sweep; the first entry is the bare company name.
const MASSIVE_VARIANTS: &[&str] = &[
    "",
    "share price",
    "finance",
    "business",
    "sustainability",
    "projects",
    "growth",
];
const MIN_PER_VARIANT: usize = 5;

pub struct NewsClient {
    client: HttpClient,
    rss_url: String,
    reddit_url: String,
    news_limit: usize,
    reddit_limit: usize,
}

impl NewsClient {
    pub fn new(
        scraper: &ScraperConfig,
        sources: &SourcesConfig,
        policy: RetryPolicy,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            client: HttpClient::new(scraper, policy)?,
            rss_url: sources.news_rss_url.clone(),
            reddit_url: sources.reddit_url.trim_end_matches('/').to_string(),
            news_limit: sources.news_limit,
            reddit_limit: sources.reddit_limit,
        })
    }

    pub fn news_limit(&self) -> usize {
        self.news_limit
    }

    /// Main text of one article, or an empty string when it cannot be had.
    async fn article_text(&self, url: &str) -> String {
        let resp = match self.client.get(url, &HeaderMap::new()).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("Article fetch failed: {}", e);
                return String::new();
            }
        };
        if resp.url().as_str().contains(CONSENT_HOST) {
            debug!("Consent wall for {}", url);
            return String::new();
        }
        let Ok(html) = read_text(url, resp).await else {
            return String::new();
        };
        extract_article_text(&html).unwrap_or_default()
    }

    /// Up to `limit` articles from the past year matching `query`.
    pub async fn fetch_news(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NewsItem>, SourceError> {
        info!("Fetching news for {:?} (limit {})", query, limit);

        let url = self.rss_url.as_str();
        let q = format!("{} when:1y", query);
        let timeout = self.client.timeout();
        let resp = self
            .client
            .execute(url, |c| {
                c.get(url)
                    .query(&[("q", q.as_str()), ("hl", "en-IN"), ("gl", "IN"), ("ceid", "IN:en")])
                    .timeout(timeout)
            })
            .await?;
        let xml = read_text(url, resp).await?;

        let entries = parse_rss(&xml).unwrap_or_else(|e| {
            warn!("News feed unreadable: {:#}", e);
            Vec::new()
        });

        let mut items = Vec::new();
        for entry in entries {
            if items.len() >= limit {
                break;
            }
            let (Some(title), Some(link)) = (entry.title, entry.link) else {
                continue;
            };

            let summary = entry.description.as_deref().map(strip_html).unwrap_or_default();
            let full_text = self.article_text(&link).await;
            let is_full_text = !full_text.is_empty();
            let content = if is_full_text { full_text } else { summary };
            if content.is_empty() {
                continue;
            }

            debug!("Article ({} chars): {}", content.len(), title);
            items.push(NewsItem {
                title,
                content,
                is_full_text,
                published_at: entry.pub_date,
                url: link,
                scraped_at: Utc::now().to_rfc3339(),
                search_query: None,
            });
        }

        info!("Collected {} articles for {:?}", items.len(), query);
        Ok(items)
    }

    /// News across several query variants, deduplicated by URL, capped at `total`.
    ///
    /// A variant that fails is logged and skipped.
    pub async fn fetch_massive_news(&self, company: &str, total: usize) -> Vec<NewsItem> {
        let per_query = MIN_PER_VARIANT.max(total / MASSIVE_VARIANTS.len() + 2);
        let mut seen = HashSet::new();
        let mut all = Vec::new();

        for suffix in MASSIVE_VARIANTS {
            if all.len() >= total {
                break;
            }
            let query = if suffix.is_empty() {
                company.to_string()
            } else {
                format!("{} {}", company, suffix)
            };

            match self.fetch_news(&query, per_query).await {
                Ok(items) => {
                    for mut item in items {
                        if seen.insert(item.url.clone()) {
                            item.search_query = Some(query.clone());
                            all.push(item);
                        }
                    }
                }
                Err(e) => warn!("News query {:?} failed: {}", query, e),
            }
        }

        all.truncate(total);
        info!("Massive news sweep for {}: {} unique articles", company, all.len());
        all
    }

    /// Newest Reddit posts mentioning `company`. Rate limiting is not retried.
    pub async fn fetch_reddit_posts(&self, company: &str) -> Result<Vec<SocialPost>, SourceError> {
        info!("Fetching Reddit posts for {}", company);

        let url = format!("{}/search.json", self.reddit_url);
        let limit = self.reddit_limit.to_string();
        let timeout = self.client.timeout();
        let single_shot = self.client.policy().clone().with_max_attempts(1);

        let resp = match self
            .client
            .execute_with(&single_shot, &url, |c| {
                c.get(&url)
                    .query(&[("q", company), ("sort", "new"), ("limit", limit.as_str())])
                    .header(USER_AGENT, HeaderValue::from_static(REDDIT_USER_AGENT))
                    .timeout(timeout)
            })
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Reddit unavailable, skipping: {}", e);
                return Ok(Vec::new());
            }
        };

        let body = read_text(&url, resp).await?;
        Ok(parse_reddit(&body).unwrap_or_else(|e| {
            warn!("Reddit payload unreadable: {:#}", e);
            Vec::new()
        }))
    }
}
