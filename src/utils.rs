//! Utility functions for URL identity, source matching, text clean-up and
//! date parsing.
//!
//! This module provides helper functions used throughout the pipeline:
//! - URL normalisation and content hashing for idempotent ingestion
//! - Trusted-source resolution against the allow-list
//! - Search API snippet clean-up
//! - Lenient publish-date parsing
//! - String truncation for logging

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalise a URL for hashing.
///
/// Scheme and host are lowercased and default ports removed by [`Url`];
/// the fragment is dropped. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.trim().to_string(),
    }
}

/// Content hash of a URL: lowercase hex MD5 of its normalised form.
///
/// This is the idempotency key stored in `news_articles.url_hash`.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(content_hash("https://a.com/x#top"), content_hash("HTTPS://A.COM/x"));
/// ```
pub fn content_hash(url: &str) -> String {
    let digest = Md5::digest(normalize_url(url).as_bytes());
    format!("{:x}", digest)
}

/// Resolve the trusted source domain for a link.
///
/// Returns `None` unless the link is `http`/`https` and its host equals an
/// allow-listed domain or is a subdomain of one. When several entries
/// match, the longest (most specific) one wins.
pub fn resolve_source_host<'a, I>(link: &str, allowed: I) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let url = Url::parse(link).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.trim_end_matches('.').to_lowercase();

    allowed
        .into_iter()
        .filter(|domain| {
            host == domain.as_str()
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
        .max_by_key(|domain| domain.len())
        .cloned()
}

/// Strip highlight tags and common HTML entities from a search API snippet.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_api_text("<b>KT</b> &quot;AI&quot;"), "KT \"AI\"");
/// ```
pub fn clean_api_text(s: &str) -> String {
    let stripped = TAG_RE.replace_all(s, "");
    let decoded = stripped
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    collapse_whitespace(&decoded)
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    WS_RE.replace_all(s.trim(), " ").into_owned()
}

/// Parse a publish-date string from page metadata or the search API.
///
/// Accepts RFC 3339, RFC 2822 and the common naive layouts used by Korean
/// publishers. Naive values are taken as KST (UTC+9), the publishers' zone.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, layout) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let kst = chrono::FixedOffset::east_opt(9 * 3600)?;
    for layout in [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y.%m.%d %H:%M:%S",
        "%Y.%m.%d %H:%M",
        "%Y.%m.%d. %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return kst
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    for layout in ["%Y-%m-%d", "%Y.%m.%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, layout) {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return kst
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc));
        }
    }
    None
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended. Truncation respects char boundaries.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn allow(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[test]
    fn test_truncate_for_log_multibyte() {
        let s = "삼성전자 실적 발표";
        let result = truncate_for_log(s, 4);
        assert!(result.starts_with("삼성전자…"));
    }

    #[test]
    fn test_content_hash_is_stable_md5_hex() {
        let h = content_hash("https://www.chosun.com/economy/2024/01/01/ABC/");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("https://www.chosun.com/economy/2024/01/01/ABC/"));
    }

    #[test]
    fn test_content_hash_normalizes_case_port_and_fragment() {
        assert_eq!(
            content_hash("HTTPS://WWW.Chosun.com:443/a?id=1#comments"),
            content_hash("https://www.chosun.com/a?id=1")
        );
        assert_ne!(
            content_hash("https://www.chosun.com/a?id=1"),
            content_hash("https://www.chosun.com/a?id=2")
        );
    }

    #[test]
    fn test_resolve_source_host_subdomain() {
        let allowed = allow(&["chosun.com", "yna.co.kr"]);
        assert_eq!(
            resolve_source_host("https://www.chosun.com/x", &allowed).as_deref(),
            Some("chosun.com")
        );
        assert_eq!(
            resolve_source_host("http://yna.co.kr/view/1", &allowed).as_deref(),
            Some("yna.co.kr")
        );
    }

    #[test]
    fn test_resolve_source_host_prefers_longest_entry() {
        let allowed = allow(&["chosun.com", "it.chosun.com"]);
        assert_eq!(
            resolve_source_host("https://it.chosun.com/news/1", &allowed).as_deref(),
            Some("it.chosun.com")
        );
    }

    #[test]
    fn test_resolve_source_host_rejects_untrusted_and_lookalikes() {
        let allowed = allow(&["chosun.com"]);
        assert_eq!(resolve_source_host("https://n.news.naver.com/1", &allowed), None);
        assert_eq!(resolve_source_host("https://notchosun.com/1", &allowed), None);
        assert_eq!(resolve_source_host("ftp://chosun.com/1", &allowed), None);
        assert_eq!(resolve_source_host("not a url", &allowed), None);
    }

    #[test]
    fn test_clean_api_text() {
        assert_eq!(clean_api_text("<b>KT</b> &quot;AI&quot; 투자"), "KT \"AI\" 투자");
        assert_eq!(clean_api_text("  a &amp; b  "), "a & b");
    }

    #[test]
    fn test_parse_published_rfc2822() {
        let dt = parse_published("Mon, 06 May 2024 09:30:00 +0900").unwrap();
        assert_eq!(dt.hour(), 0);
        assert_eq!(dt.day(), 6);
    }

    #[test]
    fn test_parse_published_naive_is_kst() {
        let dt = parse_published("2024-05-06 09:30:00").unwrap();
        assert_eq!((dt.day(), dt.hour(), dt.minute()), (6, 0, 30));
        let date_only = parse_published("2024.05.06").unwrap();
        assert_eq!((date_only.day(), date_only.hour()), (5, 15));
    }

    #[test]
    fn test_parse_published_rejects_garbage() {
        assert_eq!(parse_published(""), None);
        assert_eq!(parse_published("yesterday"), None);
    }
}
