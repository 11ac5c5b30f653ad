//! Data models for the ingestion pipeline.
//!
//! This module defines the core data structures that flow between the
//! pipeline stages:
//! - [`Entity`]: A tracked company, loaded once per run from the reference store
//! - [`CandidateLink`]: A trusted, not-yet-ingested link returned by discovery
//! - [`ExtractedContent`]: Title/body/date recovered from a page by either tier
//! - [`FilterResult`]: The relevance verdict for one article
//! - [`NewArticle`] / [`StoredArticle`]: Article rows before and after commit
//! - [`ClusterAssignment`]: A near-duplicate group produced by deduplication
//! - [`RunReport`]: Counts and outcome of one pipeline run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked company.
///
/// Reference data owned by the store. The pipeline only ever reads it and
/// folds it into an alias → id map at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Primary key in the `companies` table.
    pub id: i64,
    /// Canonical company name.
    pub name: String,
    /// Keyword used against the search API.
    pub alias: String,
}

/// A link discovered through the search API that passed the trusted-source
/// check and is not yet ingested.
///
/// Never persisted itself; only the [`NewArticle`] derived from it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    /// The resolved article URL (publisher link, not the aggregator link).
    pub url: String,
    /// The allow-listed source domain the URL belongs to (e.g. `chosun.com`).
    pub source_host: String,
    /// The search alias that produced this link.
    pub alias: String,
    /// Content hash of the normalised URL; the idempotency key.
    pub url_hash: String,
    /// Title snippet returned by the search API, highlight tags removed.
    pub api_title: String,
    /// Raw publish-date string returned by the search API.
    pub api_pub_date: String,
}

/// Article content recovered from HTML.
///
/// Identical in shape regardless of which extraction tier produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub title: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A single keyword phrase that matched during scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub keyword: String,
    pub weight: i64,
}

/// Why a [`FilterResult`] came out the way it did.
///
/// Serialized to JSON into the `matched_keywords` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterDetail {
    /// Distinct keyword phrases in first-occurrence order.
    Matches(Vec<KeywordMatch>),
    /// The entity-specific exclusion phrase found in the title.
    Excluded(String),
}

/// The outcome of relevance filtering for one article.
///
/// Derived deterministically from title, body and alias; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterResult {
    pub passed: bool,
    pub score: i64,
    pub detail: FilterDetail,
}

impl FilterResult {
    /// Serialized form stored alongside the article.
    pub fn detail_json(&self) -> String {
        serde_json::to_string(&self.detail).unwrap_or_default()
    }
}

/// An article staged for the end-of-run commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub company_id: i64,
    pub title: String,
    pub url: String,
    pub url_hash: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub search_alias: String,
    pub score: i64,
    pub matched_keywords: String,
    pub passed: bool,
}

/// An article row as loaded back for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub article_id: i64,
    pub url_hash: String,
    pub body: String,
}

/// A group of near-duplicate articles sharing one cluster id.
///
/// `members[0]` is the representative; the rest are duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAssignment {
    pub cluster_id: i64,
    pub members: Vec<String>,
}

impl ClusterAssignment {
    /// The content hash of the representative article.
    pub fn representative(&self) -> &str {
        &self.members[0]
    }
}

/// Summary of a single pipeline run.
///
/// Logged on completion and optionally written as JSON by
/// [`crate::outputs::json::write_run_report`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: Option<DateTime<Utc>>,
    /// The last stage the run reached (`done` or `aborted` when finished).
    pub stage: String,
    pub entities: usize,
    pub discovered: usize,
    pub fast_succeeded: usize,
    pub robust_attempted: usize,
    pub robust_succeeded: usize,
    pub dropped: usize,
    pub staged: usize,
    pub passed: usize,
    pub committed: usize,
    /// Unclustered articles considered by deduplication.
    pub dedup_candidates: usize,
    pub clustered_articles: usize,
    pub clusters: usize,
    pub abort_reason: Option<String>,
    pub commit_error: Option<String>,
    pub dedup_error: Option<String>,
    pub elapsed_ms: u128,
}

impl RunReport {
    /// A run succeeds unless it aborted; commit and dedup failures are
    /// reported but do not fail the run.
    pub fn succeeded(&self) -> bool {
        self.abort_reason.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_detail_json_matches() {
        let result = FilterResult {
            passed: true,
            score: 15,
            detail: FilterDetail::Matches(vec![KeywordMatch {
                keyword: "채용".into(),
                weight: 15,
            }]),
        };
        assert_eq!(
            result.detail_json(),
            r#"{"matches":[{"keyword":"채용","weight":15}]}"#
        );
    }

    #[test]
    fn test_filter_detail_json_excluded() {
        let result = FilterResult {
            passed: false,
            score: 0,
            detail: FilterDetail::Excluded("KT&G".into()),
        };
        assert_eq!(result.detail_json(), r#"{"excluded":"KT&G"}"#);
    }

    #[test]
    fn test_cluster_representative_is_first_member() {
        let cluster = ClusterAssignment {
            cluster_id: 4,
            members: vec!["a".into(), "b".into()],
        };
        assert_eq!(cluster.representative(), "a");
    }

    #[test]
    fn test_report_success_ignores_commit_and_dedup_errors() {
        let mut report = RunReport {
            commit_error: Some("boom".into()),
            dedup_error: Some("embed failed".into()),
            ..Default::default()
        };
        assert!(report.succeeded());
        report.abort_reason = Some("no entities".into());
        assert!(!report.succeeded());
    }
}
