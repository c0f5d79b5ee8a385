use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::scraper::http_client::RetryPolicy;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Shared HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

/// Backoff and politeness settings shared by every client and the downloader
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_rate_limit_base_ms")]
    pub rate_limit_base_ms: u64,

    #[serde(default = "default_error_delay_ms")]
    pub server_error_delay_ms: u64,

    #[serde(default = "default_error_delay_ms")]
    pub network_error_delay_ms: u64,

    #[serde(default = "default_politeness_min_ms")]
    pub politeness_min_ms: u64,

    #[serde(default = "default_politeness_max_ms")]
    pub politeness_max_ms: u64,
}

/// Site endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_annual_reports_url")]
    pub annual_reports_url: String,

    #[serde(default = "default_nse_url")]
    pub nse_url: String,

    #[serde(default = "default_nse_archive_url")]
    pub nse_archive_url: String,

    #[serde(default = "default_web_search_url")]
    pub web_search_url: String,

    #[serde(default = "default_news_rss_url")]
    pub news_rss_url: String,

    #[serde(default = "default_reddit_url")]
    pub reddit_url: String,

    #[serde(default = "default_web_search_limit")]
    pub web_search_limit: usize,

    #[serde(default = "default_feed_limit")]
    pub news_limit: usize,

    #[serde(default = "default_feed_limit")]
    pub reddit_limit: usize,
}

/// Downloader configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_root")]
    pub root: PathBuf,

    #[serde(default = "default_download_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_download_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_chunk_log_bytes")]
    pub chunk_log_bytes: u64,
}

/// Which wire format the answer endpoint speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// POST {"prompt"} and read "answer"
    #[default]
    Prompt,
    /// Ollama-style POST /api/generate and read "response"
    Ollama,
}

/// Questionnaire analysis configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub backend: GeneratorBackend,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_analysis_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    #[serde(default = "default_questions_path")]
    pub questions_path: PathBuf,

    #[serde(default = "default_true")]
    pub skip_existing: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 ",
        "(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
    )
    .to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_search_timeout_secs() -> u64 {
    15
}
fn default_max_attempts() -> u32 {
    3
}
fn default_rate_limit_base_ms() -> u64 {
    5000
}
fn default_error_delay_ms() -> u64 {
    2000
}
fn default_politeness_min_ms() -> u64 {
    1000
}
fn default_politeness_max_ms() -> u64 {
    3000
}
fn default_annual_reports_url() -> String {
    "https://www.annualreports.com".to_string()
}
fn default_nse_url() -> String {
    "https://www.nseindia.com".to_string()
}
fn default_nse_archive_url() -> String {
    "https://nsearchives.nseindia.com/annual_reports".to_string()
}
fn default_web_search_url() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}
fn default_news_rss_url() -> String {
    "https://news.google.com/rss/search".to_string()
}
fn default_reddit_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_web_search_limit() -> usize {
    3
}
fn default_feed_limit() -> usize {
    50
}
fn default_download_root() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_download_attempts() -> u32 {
    5
}
fn default_download_timeout_secs() -> u64 {
    60
}
fn default_chunk_log_bytes() -> u64 {
    1024 * 1024
}
fn default_model() -> String {
    "gemma:7b".to_string()
}
fn default_analysis_timeout_secs() -> u64 {
    600
}
fn default_top_k() -> usize {
    3
}
fn default_context_char_budget() -> usize {
    25_000
}
fn default_questions_path() -> PathBuf {
    PathBuf::from("brsr_questions.json")
}
fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rate_limit_base_ms: default_rate_limit_base_ms(),
            server_error_delay_ms: default_error_delay_ms(),
            network_error_delay_ms: default_error_delay_ms(),
            politeness_min_ms: default_politeness_min_ms(),
            politeness_max_ms: default_politeness_max_ms(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            annual_reports_url: default_annual_reports_url(),
            nse_url: default_nse_url(),
            nse_archive_url: default_nse_archive_url(),
            web_search_url: default_web_search_url(),
            news_rss_url: default_news_rss_url(),
            reddit_url: default_reddit_url(),
            web_search_limit: default_web_search_limit(),
            news_limit: default_feed_limit(),
            reddit_limit: default_feed_limit(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            root: default_download_root(),
            max_attempts: default_download_attempts(),
            timeout_secs: default_download_timeout_secs(),
            chunk_log_bytes: default_chunk_log_bytes(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            backend: GeneratorBackend::default(),
            model: default_model(),
            timeout_secs: default_analysis_timeout_secs(),
            top_k: default_top_k(),
            context_char_budget: default_context_char_budget(),
            questions_path: default_questions_path(),
            skip_existing: true,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            rate_limit_base: Duration::from_millis(self.rate_limit_base_ms),
            server_error_delay: Duration::from_millis(self.server_error_delay_ms),
            network_error_delay: Duration::from_millis(self.network_error_delay_ms),
            politeness_min: Duration::from_millis(self.politeness_min_ms),
            politeness_max: Duration::from_millis(
                self.politeness_max_ms.max(self.politeness_min_ms),
            ),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("BRSR").separator("__"))
            .build()
            .context("Could not read configuration")?;

        Self::from_config(cfg)
    }

    fn from_config(cfg: config::Config) -> Result<Self> {
        cfg.try_deserialize().context("Invalid configuration")
    }

    /// Configuration with every sleep disabled, for tests against a local server.
    #[cfg(test)]
    pub fn for_tests(root: &std::path::Path) -> Self {
        let mut cfg = AppConfig::default();
        cfg.retry = RetryConfig {
            max_attempts: 3,
            rate_limit_base_ms: 0,
            server_error_delay_ms: 0,
            network_error_delay_ms: 0,
            politeness_min_ms: 0,
            politeness_max_ms: 0,
        };
        cfg.scraper.timeout_secs = 5;
        cfg.download.root = root.to_path_buf();
        cfg.download.max_attempts = 3;
        cfg.download.timeout_secs = 5;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.download.max_attempts, 5);
        assert_eq!(cfg.analysis.top_k, 3);
        assert_eq!(cfg.analysis.context_char_budget, 25_000);
        assert_eq!(cfg.download.root, PathBuf::from("downloads"));
    }

    #[test]
    fn policy_clamps_inverted_politeness_window() {
        let retry = RetryConfig {
            politeness_min_ms: 500,
            politeness_max_ms: 100,
            ..RetryConfig::default()
        };
        let policy = retry.policy();
        assert_eq!(policy.politeness_min, Duration::from_millis(500));
        assert_eq!(policy.politeness_max, Duration::from_millis(500));
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"analysis": {"top_k": 5, "backend": "ollama"}}"#).unwrap();
        assert_eq!(cfg.analysis.top_k, 5);
        assert_eq!(cfg.analysis.backend, GeneratorBackend::Ollama);
        assert_eq!(cfg.analysis.model, "gemma:7b");
        assert_eq!(cfg.retry.rate_limit_base_ms, 5000);
    }

    fn overrides(pairs: &[(&str, &str)]) -> config::Config {
        pairs
            .iter()
            .fold(config::Config::builder(), |builder, (key, value)| {
                builder.set_override(*key, *value).unwrap()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn overrides_reach_their_sections() {
        let cfg = AppConfig::from_config(overrides(&[
            ("download.root", "/srv/reports"),
            ("analysis.endpoint", "http://llm.local/answer"),
        ]))
        .unwrap();
        assert_eq!(cfg.download.root, PathBuf::from("/srv/reports"));
        assert_eq!(cfg.analysis.endpoint.as_deref(), Some("http://llm.local/answer"));
        assert_eq!(cfg.analysis.top_k, 3);
    }

    #[test]
    fn malformed_value_is_an_error_not_a_reset() {
        let err = AppConfig::from_config(overrides(&[
            ("download.root", "/srv/reports"),
            ("analysis.top_k", "three"),
        ]))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid configuration"));
    }
}
