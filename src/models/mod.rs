use serde::{Deserialize, Serialize};

// ── Search result ─────────────────────────────────────────────────────────────

/// A company matched on one source. `identifier` is a page URL or a ticker symbol
/// depending on the site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchResult {
    pub name: String,
    pub identifier: String,
}

// ── Report reference ──────────────────────────────────────────────────────────

pub const UNKNOWN_YEAR: &str = "Unknown";

/// One downloadable document listed by a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportReference {
    pub year: String,        // "2023" or "Unknown"
    pub url: String,
    pub description: String,
}

impl ReportReference {
    /// Parsed year, `None` for "Unknown" or anything that is not a number.
    pub fn numeric_year(&self) -> Option<u32> {
        self.year.trim().parse().ok()
    }
}

// ── News & social snapshots ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub content: String,
    pub is_full_text: bool,
    pub published_at: Option<String>,
    pub url: String,
    pub scraped_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialPost {
    pub platform: String,
    pub content: String,
    pub author: Option<String>,
    pub date: Option<String>,
    pub url: Option<String>,
}

// ── Raw rows (site payloads) ──────────────────────────────────────────────────

/// NSE autocomplete payload: `{"symbols": [{"symbol": .., "symbol_info": ..}]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAutocomplete {
    #[serde(default)]
    pub symbols: Vec<RawSymbol>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSymbol {
    pub symbol: Option<String>,
    pub symbol_info: Option<String>,
}

/// NSE annual-reports payload: `{"data": [{"fileName": .., "fromYr": ..}]}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFilingList {
    #[serde(default)]
    pub data: Vec<RawFiling>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFiling {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
    // string on some rows, number on others
    #[serde(rename = "fromYr")]
    pub from_year: Option<serde_json::Value>,
}

/// Reddit search listing, only the fields we keep.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRedditListing {
    #[serde(default)]
    pub data: RawRedditData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRedditData {
    #[serde(default)]
    pub children: Vec<RawRedditChild>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRedditChild {
    #[serde(default)]
    pub data: RawRedditPost,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRedditPost {
    pub title: Option<String>,
    pub selftext: Option<String>,
    pub author: Option<String>,
    pub created_utc: Option<f64>,
    pub url: Option<String>,
}

/// One `<item>` of an RSS channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRssItem {
    pub title: Option<String>,
    pub link: Option<String>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<String>,
    pub description: Option<String>,
}
