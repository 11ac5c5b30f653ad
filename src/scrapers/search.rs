//! Link discovery through the news search API.
//!
//! Each alias is paged through sequentially, pausing before every call to
//! stay under the provider's rate limit. Aliases run concurrently up to the
//! discovery limit. A 429 earns exactly one delayed retry; any other failure
//! (or a second 429) ends that alias's paging but keeps what was gathered.
//!
//! # Filtering
//!
//! An item survives only if its publisher link is `http(s)` on an
//! allow-listed domain and its content hash is neither already stored nor
//! seen earlier in this run (first occurrence wins).

use crate::config::{SearchSettings, Settings};
use crate::error::SearchError;
use crate::models::CandidateLink;
use crate::utils::{clean_api_text, content_hash, resolve_source_host};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// One item of a search results page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchItem {
    pub title: String,
    /// Publisher URL; preferred over `link` when present.
    pub originallink: String,
    /// Aggregator URL.
    pub link: String,
    #[serde(rename = "pubDate")]
    pub pub_date: String,
}

impl SearchItem {
    fn resolved_link(&self) -> &str {
        if self.originallink.trim().is_empty() {
            self.link.trim()
        } else {
            self.originallink.trim()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

/// A paginated keyword search provider.
pub trait SearchClient {
    /// Fetch one page: `page_size` items starting at 1-based offset `start`.
    async fn search(
        &self,
        query: &str,
        start: u32,
        page_size: u32,
    ) -> Result<Vec<SearchItem>, SearchError>;
}

/// Naver news search (`/v1/search/news.json`).
#[derive(Debug)]
pub struct NaverSearch {
    client: reqwest::Client,
    endpoint: String,
    client_id: String,
    client_secret: String,
    sort: String,
}

impl NaverSearch {
    pub fn new(
        settings: &SearchSettings,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            sort: settings.sort.clone(),
        })
    }
}

impl SearchClient for NaverSearch {
    #[instrument(level = "debug", skip(self))]
    async fn search(
        &self,
        query: &str,
        start: u32,
        page_size: u32,
    ) -> Result<Vec<SearchItem>, SearchError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .header("X-Naver-Client-Id", &self.client_id)
            .header("X-Naver-Client-Secret", &self.client_secret)
            .query(&[
                ("query", query.to_string()),
                ("display", page_size.to_string()),
                ("start", start.to_string()),
                ("sort", self.sort.clone()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(SearchError::RateLimited);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| SearchError::Parse(e.to_string()))?;
        Ok(parsed.items)
    }
}

/// Page through the search API for one alias and keep trusted links.
///
/// Never fails: errors end the paging early and are logged.
#[instrument(level = "info", skip(search, settings))]
pub async fn fetch_alias_links<S: SearchClient>(
    search: &S,
    alias: &str,
    settings: &Settings,
) -> Vec<CandidateLink> {
    let cfg = &settings.search;
    let mut links = Vec::new();

    for start in (1..=cfg.per_alias_cap).step_by(cfg.page_size as usize) {
        if start > cfg.max_start {
            break;
        }
        sleep(cfg.request_interval()).await;

        let items = match search.search(alias, start, cfg.page_size).await {
            Ok(items) => items,
            Err(SearchError::RateLimited) => {
                warn!(%alias, start, "Rate limit hit; retrying once");
                sleep(cfg.rate_limit_retry_delay()).await;
                match search.search(alias, start, cfg.page_size).await {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(%alias, start, error = %e, "Retry failed; keeping partial results");
                        break;
                    }
                }
            }
            Err(e) => {
                error!(%alias, start, error = %e, "Failed to fetch links");
                break;
            }
        };

        let page_len = items.len();
        if page_len == 0 {
            break;
        }
        for item in items {
            let url = item.resolved_link();
            match resolve_source_host(url, &settings.sources.allowed_hosts) {
                Some(source_host) => links.push(CandidateLink {
                    url: url.to_string(),
                    source_host,
                    alias: alias.to_string(),
                    url_hash: content_hash(url),
                    api_title: clean_api_text(&item.title),
                    api_pub_date: item.pub_date.clone(),
                }),
                None => debug!(%url, "Skipping untrusted source"),
            }
        }
        if page_len < cfg.page_size as usize {
            break;
        }
    }

    debug!(%alias, count = links.len(), "Collected trusted links");
    links
}

/// Drop links already stored or already seen in this batch.
pub fn dedupe_links<I>(links: I, existing: &HashSet<String>) -> Vec<CandidateLink>
where
    I: IntoIterator<Item = CandidateLink>,
{
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| !existing.contains(&link.url_hash) && seen.insert(link.url_hash.clone()))
        .collect()
}

/// Discover new candidate links for every alias.
///
/// Output order follows alias order, then search order within an alias.
#[instrument(level = "info", skip_all, fields(aliases = aliases.len()))]
pub async fn collect_all_links<S: SearchClient>(
    search: &S,
    aliases: &[String],
    existing: &HashSet<String>,
    settings: &Settings,
) -> Vec<CandidateLink> {
    info!("Starting link collection");
    let per_alias: Vec<Vec<CandidateLink>> = stream::iter(aliases)
        .map(|alias| fetch_alias_links(search, alias, settings))
        .buffered(settings.concurrency.discovery)
        .collect()
        .await;

    let unique = dedupe_links(per_alias.into_iter().flatten(), existing);
    info!(count = unique.len(), "Collected new unique links to scrape");
    unique
}
