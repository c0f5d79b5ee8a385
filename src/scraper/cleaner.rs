use crate::models::{ReportReference, UNKNOWN_YEAR};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;
use std::collections::HashSet;
use url::Url;

static YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(19|20)\d{2}").expect("year pattern is valid"));

const MAX_DESCRIPTION_CHARS: usize = 80;

// ── Years ─────────────────────────────────────────────────────────────────────

/// First 19xx/20xx in `text`.
pub fn find_year(text: &str) -> Option<String> {
    YEAR_RE.find(text).map(|m| m.as_str().to_string())
}

/// Year from the link text first, then the href, else "Unknown".
pub fn year_from_link(text: &str, href: &str) -> String {
    find_year(text)
        .or_else(|| find_year(href))
        .unwrap_or_else(|| UNKNOWN_YEAR.to_string())
}

/// NSE sends `fromYr` as either a string or a number.
pub fn year_from_json(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => UNKNOWN_YEAR.to_string(),
    }
}

// ── Report lists ──────────────────────────────────────────────────────────────

/// Newest first by numeric year; unparseable years go last. Stable for ties.
pub fn sort_reports(reports: &mut [ReportReference]) {
    reports.sort_by_key(|r| match r.numeric_year() {
        Some(year) => (false, Reverse(year)),
        None => (true, Reverse(0)),
    });
}

/// Keep the first occurrence of every URL, preserving order.
pub fn dedupe_by_url(reports: Vec<ReportReference>) -> Vec<ReportReference> {
    let mut seen = HashSet::new();
    reports
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

/// Dedupe then sort, the order every client returns.
pub fn normalise_reports(reports: Vec<ReportReference>) -> Vec<ReportReference> {
    let mut reports = dedupe_by_url(reports);
    sort_reports(&mut reports);
    reports
}

// ── URLs ──────────────────────────────────────────────────────────────────────

/// Resolve `href` against `base`; falls back to plain concatenation for
/// bases that do not parse.
pub fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(u) => u.to_string(),
        Err(_) => format!("{}/{}", base.trim_end_matches('/'), href.trim_start_matches('/')),
    }
}

/// Host of a URL without a leading "www.", used as the source folder name.
pub fn source_host(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| sanitize_filename(url))
}

// ── File names ────────────────────────────────────────────────────────────────

/// Keep letters, digits, space, '-' and '_'.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<year>_<description>.pdf`
pub fn report_filename(report: &ReportReference) -> String {
    let mut desc: String = sanitize_filename(&report.description)
        .chars()
        .take(MAX_DESCRIPTION_CHARS)
        .collect();
    desc = desc.trim().to_string();
    if desc.is_empty() {
        desc = "Report".to_string();
    }
    let year = sanitize_filename(&report.year);
    let year = if year.is_empty() { UNKNOWN_YEAR.to_string() } else { year };
    format!("{}_{}.pdf", year, desc)
}
