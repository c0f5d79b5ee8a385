use crate::models::{
    RawAutocomplete, RawFilingList, RawRedditListing, RawRssItem, ReportReference, SearchResult,
    SocialPost, UNKNOWN_YEAR,
};
use anyhow::{Context, Result};
use chrono::DateTime;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;
use url::Url;

use super::cleaner::{absolutize, normalise_reports, year_from_json, year_from_link};

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ── annualreports.com ─────────────────────────────────────────────────────────

/// Company links on a search results page (`/Company/<slug>`).
pub fn parse_company_links(html: &str, base_url: &str) -> Result<Vec<SearchResult>> {
    let doc = Html::parse_document(html);
    let a_sel = selector("a[href]")?;

    let mut seen = HashSet::new();
    let mut results = Vec::new();

    for a in doc.select(&a_sel) {
        let Some(href) = a.value().attr("href") else { continue };
        if !href.contains("/Company/") {
            continue;
        }
        let url = absolutize(base_url, href);
        let name = element_text(&a);
        if name.is_empty() || !seen.insert(url.clone()) {
            continue;
        }
        results.push(SearchResult { name, identifier: url });
    }

    Ok(results)
}

/// PDF-like links on a company page: href contains ".pdf" or the text says "download".
pub fn parse_report_links(html: &str, base_url: &str) -> Result<Vec<ReportReference>> {
    let doc = Html::parse_document(html);
    let a_sel = selector("a[href]")?;

    let mut reports = Vec::new();
    for a in doc.select(&a_sel) {
        let Some(href) = a.value().attr("href") else { continue };
        let text = element_text(&a);

        if !href.to_lowercase().contains(".pdf") && !text.to_lowercase().contains("download") {
            continue;
        }

        let year = year_from_link(&text, href);
        if year == UNKNOWN_YEAR {
            warn!("Could not extract year from text={:?} href={:?}", text, href);
        }

        reports.push(ReportReference {
            year,
            url: absolutize(base_url, href),
            description: text,
        });
    }

    Ok(normalise_reports(reports))
}

// ── NSE ───────────────────────────────────────────────────────────────────────

pub fn parse_autocomplete(body: &str) -> Result<Vec<SearchResult>> {
    let payload: RawAutocomplete =
        serde_json::from_str(body).context("autocomplete payload is not JSON")?;

    Ok(payload
        .symbols
        .into_iter()
        .filter_map(|s| {
            let symbol = s.symbol?.trim().to_string();
            if symbol.is_empty() {
                return None;
            }
            let name = s
                .symbol_info
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| symbol.clone());
            Some(SearchResult { name, identifier: symbol })
        })
        .collect())
}

const SUSTAINABILITY_KEYWORDS: &[&str] = &["brsr", "business"];

/// BRSR filings are recognised by their file name only.
pub fn is_sustainability_filing(file_name: &str) -> bool {
    let lower = file_name.to_lowercase();
    SUSTAINABILITY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Rows of the annual-reports API. With `sustainability_only`, keeps BRSR filings
/// and describes them as such.
pub fn parse_filings(
    body: &str,
    archive_base: &str,
    sustainability_only: bool,
) -> Result<Vec<ReportReference>> {
    let payload: RawFilingList =
        serde_json::from_str(body).context("annual-reports payload is not JSON")?;

    let reports = payload
        .data
        .into_iter()
        .filter_map(|row| {
            let file_name = row.file_name?.trim().to_string();
            if file_name.is_empty() {
                return None;
            }
            if sustainability_only && !is_sustainability_filing(&file_name) {
                return None;
            }
            let year = year_from_json(row.from_year.as_ref());
            let url = if file_name.starts_with("http") {
                file_name.clone()
            } else {
                format!("{}/{}", archive_base.trim_end_matches('/'), file_name)
            };
            let description = if sustainability_only {
                format!("BRSR {} - {}", year, file_name)
            } else {
                format!("Annual Report {}", year)
            };
            Some(ReportReference { year, url, description })
        })
        .collect();

    Ok(normalise_reports(reports))
}

// ── Web search (DuckDuckGo HTML) ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub href: String,
}

pub fn parse_search_hits(html: &str) -> Result<Vec<SearchHit>> {
    let doc = Html::parse_document(html);
    let a_sel = selector("a.result__a")?;

    Ok(doc
        .select(&a_sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            Some(SearchHit {
                title: element_text(&a),
                href: unwrap_redirect(href),
            })
        })
        .collect())
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>`.
pub fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}

/// A hit is relevant when any significant word of the company name is in its title.
pub fn is_relevant(company: &str, title: &str) -> bool {
    let title = title.to_lowercase();
    let mut words: Vec<String> = company
        .split_whitespace()
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
        .collect();
    if words.is_empty() {
        words.push(company.trim().to_lowercase());
    }
    words.iter().any(|w| title.contains(w.as_str()))
}

// ── News RSS ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RawRssItem>,
}

pub fn parse_rss(xml: &str) -> Result<Vec<RawRssItem>> {
    let rss: Rss = quick_xml::de::from_str(xml).context("RSS feed did not parse")?;
    Ok(rss.channel.items)
}

/// Plain text of an HTML fragment (RSS descriptions carry markup).
pub fn strip_html(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    doc.root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Article text ──────────────────────────────────────────────────────────────

const NOISE_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript", "iframe"];
const MIN_BLOCK_CHARS: usize = 20;
const MIN_PARAGRAPH_TEXT: usize = 200;
const MIN_DIV_TEXT: usize = 100;
const MAX_DIV_TEXT: usize = 5000;
const MIN_ARTICLE_TEXT: usize = 50;

/// Text of `el` without anything inside script/style/nav/... elements.
fn visible_text(el: &ElementRef) -> String {
    let mut parts = Vec::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| NOISE_TAGS.contains(&e.name()))
        });
        if !hidden {
            let t = text.trim();
            if !t.is_empty() {
                parts.push(t.to_string());
            }
        }
    }
    parts.join(" ")
}

/// Main text of an article page.
///
/// Paragraphs under `<article>` (or anywhere when there is none); when that is
/// thin, the largest `<div>`; finally the meta description.
pub fn extract_article_text(html: &str) -> Result<String> {
    let doc = Html::parse_document(html);
    let article_sel = selector("article")?;
    let p_sel = selector("p")?;
    let div_sel = selector("div")?;
    let meta_sel = selector(r#"meta[name="description"], meta[property="og:description"]"#)?;

    let meta_desc = doc
        .select(&meta_sel)
        .find_map(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .unwrap_or_default();

    let paragraphs: Vec<String> = match doc.select(&article_sel).next() {
        Some(article) => article.select(&p_sel).map(|p| visible_text(&p)).collect(),
        None => doc.select(&p_sel).map(|p| visible_text(&p)).collect(),
    };
    let mut full_text = paragraphs
        .into_iter()
        .filter(|t| t.chars().count() > MIN_BLOCK_CHARS)
        .collect::<Vec<_>>()
        .join(" ");

    if full_text.chars().count() < MIN_PARAGRAPH_TEXT {
        let best = doc
            .select(&div_sel)
            .map(|d| visible_text(&d))
            .max_by_key(|t| t.chars().count())
            .unwrap_or_default();
        let best_len = best.chars().count();
        if best_len > full_text.chars().count() && best_len > MIN_DIV_TEXT {
            full_text = best.chars().take(MAX_DIV_TEXT).collect();
        }
    }

    if full_text.chars().count() > MIN_ARTICLE_TEXT {
        Ok(full_text)
    } else {
        Ok(meta_desc)
    }
}

// ── Reddit ────────────────────────────────────────────────────────────────────

pub fn parse_reddit(body: &str) -> Result<Vec<SocialPost>> {
    let listing: RawRedditListing =
        serde_json::from_str(body).context("reddit payload is not JSON")?;

    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| {
            let post = child.data;
            let content = post
                .selftext
                .filter(|s| !s.trim().is_empty())
                .or(post.title)
                .unwrap_or_default();
            let date = post
                .created_utc
                .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
                .map(|d| d.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string());
            SocialPost {
                platform: "Reddit".to_string(),
                content,
                author: post.author,
                date,
                url: post.url,
            }
        })
        .collect())
}
