//! Fast-path extraction over plain HTTP.
//!
//! One shared [`reqwest::Client`] (and its connection pool) serves every
//! fast-path task. Hosts flagged as needing a rendered DOM are handed to the
//! robust tier before any request is made. Every failure here is a tier
//! transition, never a terminal outcome.

use super::extract::parse_article;
use super::{PageFetcher, TierOutcome};
use crate::config::{ExtractionSettings, Settings};
use crate::error::FetchError;
use crate::models::CandidateLink;
use crate::utils::resolve_source_host;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Plain HTTP page fetcher with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(settings: &ExtractionSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .user_agent(settings.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            timeout_secs: settings.fetch_timeout_secs,
        })
    }
}

impl PageFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else {
                FetchError::from(e)
            }
        };
        let resp = self.client.get(url).send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.text().await.map_err(classify)
    }
}

/// Whether a link must be rendered in a browser to yield its article.
pub fn requires_rendering(link: &CandidateLink, settings: &Settings) -> bool {
    let hosts = &settings.sources.render_required_hosts;
    hosts.contains(&link.source_host) || resolve_source_host(&link.url, hosts).is_some()
}

/// Try one link on the fast path.
///
/// Returns [`TierOutcome::Success`] or [`TierOutcome::RetryOtherTier`];
/// never [`TierOutcome::Drop`].
#[instrument(level = "debug", skip_all, fields(url = %link.url))]
pub async fn attempt<F: PageFetcher>(fetcher: &F, link: CandidateLink, settings: &Settings) -> TierOutcome {
    if requires_rendering(&link, settings) {
        debug!(host = %link.source_host, "Host needs rendering; routing to browser");
        return TierOutcome::RetryOtherTier(link);
    }

    let html = match fetcher.fetch_html(&link.url).await {
        Ok(html) => html,
        Err(e) => {
            warn!(url = %link.url, error = %e, "Fast scrape failed; retrying with browser");
            return TierOutcome::RetryOtherTier(link);
        }
    };

    match parse_article(&html, &link.source_host, settings) {
        Ok(content) => TierOutcome::Success(link, content),
        Err(e) => {
            warn!(url = %link.url, error = %e, "Fast extraction failed; retrying with browser");
            TierOutcome::RetryOtherTier(link)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory fetcher that records every URL it was asked for.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub pages: HashMap<String, String>,
        pub requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn with(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::Network("connection refused".into()))
        }
    }

    pub(crate) fn article_html(title: &str) -> String {
        let body = std::iter::repeat_n("실적 발표 채용 확대", 20).collect::<Vec<_>>().join(" ");
        format!("<html><head><title>{title}</title></head><body><article><p>{body}</p></article></body></html>")
    }

    pub(crate) fn link(url: &str, host: &str) -> CandidateLink {
        CandidateLink {
            url: url.to_string(),
            source_host: host.to_string(),
            alias: "KT".to_string(),
            url_hash: crate::utils::content_hash(url),
            api_title: String::new(),
            api_pub_date: String::new(),
        }
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.sources.render_required_hosts = ["jtbc.co.kr".to_string()].into_iter().collect();
        s
    }

    #[tokio::test]
    async fn test_success() {
        let fetcher = FakeFetcher::default().with("https://chosun.com/a", &article_html("Headline"));
        let outcome = attempt(&fetcher, link("https://chosun.com/a", "chosun.com"), &settings()).await;
        match outcome {
            TierOutcome::Success(l, content) => {
                assert_eq!(l.url, "https://chosun.com/a");
                assert_eq!(content.title, "Headline");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_render_required_host_never_fetched() {
        let fetcher = FakeFetcher::default().with("https://news.jtbc.co.kr/a", &article_html("T"));
        let l = link("https://news.jtbc.co.kr/a", "jtbc.co.kr");
        let outcome = attempt(&fetcher, l.clone(), &settings()).await;
        assert_eq!(outcome, TierOutcome::RetryOtherTier(l));
        assert!(fetcher.requested().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_tier_transition() {
        let fetcher = FakeFetcher::default();
        let l = link("https://chosun.com/missing", "chosun.com");
        let outcome = attempt(&fetcher, l.clone(), &settings()).await;
        assert_eq!(outcome, TierOutcome::RetryOtherTier(l));
        assert_eq!(fetcher.requested(), vec!["https://chosun.com/missing".to_string()]);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_tier_transition() {
        let fetcher = FakeFetcher::default()
            .with("https://chosun.com/js", "<html><body><div id='app'></div></body></html>");
        let l = link("https://chosun.com/js", "chosun.com");
        let outcome = attempt(&fetcher, l.clone(), &settings()).await;
        assert_eq!(outcome, TierOutcome::RetryOtherTier(l));
    }
}
