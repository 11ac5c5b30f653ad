//! The ingestion run as an explicit state machine.
//!
//! ```text
//! LoadingReferenceData → DiscoveringLinks → FastExtracting → RobustExtracting
//!     → Committing → Deduplicating → Done
//! ```
//!
//! `Aborted` is reachable only from `LoadingReferenceData`: without the
//! company map and the existing-hash snapshot there is no safe way to
//! proceed. Every later failure is contained in its stage and recorded on the
//! [`RunReport`]. A failed commit rolls back the whole batch and the run moves
//! on to deduplicate the backlog that is already stored.

use crate::config::Settings;
use crate::dedup::run_dedup;
use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::filter::{KeywordRules, filter_and_score};
use crate::models::{CandidateLink, ExtractedContent, NewArticle, RunReport};
use crate::scrapers::search::{SearchClient, collect_all_links};
use crate::scrapers::{PageFetcher, TierOutcome, fast, robust};
use crate::store;
use crate::utils::{parse_published, truncate_for_log};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LoadingReferenceData,
    DiscoveringLinks,
    FastExtracting,
    RobustExtracting,
    Committing,
    Deduplicating,
    Done,
    Aborted,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LoadingReferenceData => "loading_reference_data",
            Stage::DiscoveringLinks => "discovering_links",
            Stage::FastExtracting => "fast_extracting",
            Stage::RobustExtracting => "robust_extracting",
            Stage::Committing => "committing",
            Stage::Deduplicating => "deduplicating",
            Stage::Done => "done",
            Stage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(report: &mut RunReport, stage: Stage) {
    info!(stage = %stage, "Entering stage");
    report.stage = stage.to_string();
}

/// Snapshot taken once before any network work.
struct ReferenceData {
    entity_map: HashMap<String, i64>,
    existing_hashes: HashSet<String>,
}

/// One configured ingestion run over injected collaborators.
pub struct Pipeline<'a, S, F, R, E> {
    pub pool: &'a SqlitePool,
    pub settings: &'a Settings,
    pub rules: &'a KeywordRules,
    pub search: &'a S,
    pub fast_fetcher: &'a F,
    pub robust_fetcher: &'a R,
    pub embedder: &'a E,
}

impl<S, F, R, E> Pipeline<'_, S, F, R, E>
where
    S: SearchClient,
    F: PageFetcher,
    R: PageFetcher,
    E: Embedder,
{
    /// Run every stage. Never panics on a bad page; the report carries
    /// the outcome.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> RunReport {
        let t0 = Instant::now();
        let mut report = RunReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        enter(&mut report, Stage::LoadingReferenceData);
        let reference = match self.load_reference_data().await {
            Ok(reference) => reference,
            Err(e) => {
                error!(error = %e, "Aborting run");
                report.abort_reason = Some(e.to_string());
                enter(&mut report, Stage::Aborted);
                report.elapsed_ms = t0.elapsed().as_millis();
                return report;
            }
        };
        report.entities = reference.entity_map.len();

        enter(&mut report, Stage::DiscoveringLinks);
        let aliases: Vec<String> = reference.entity_map.keys().cloned().sorted().collect();
        let links = collect_all_links(self.search, &aliases, &reference.existing_hashes, self.settings).await;
        report.discovered = links.len();

        enter(&mut report, Stage::FastExtracting);
        let (mut extracted, overflow) = self.fast_tier(links).await;
        report.fast_succeeded = extracted.len();

        enter(&mut report, Stage::RobustExtracting);
        report.robust_attempted = overflow.len();
        let (rescued, dropped) = self.robust_tier(overflow).await;
        report.robust_succeeded = rescued.len();
        report.dropped = dropped;
        extracted.extend(rescued);

        let staged = self.stage_articles(extracted, &reference.entity_map);
        report.staged = staged.len();
        report.passed = staged.iter().filter(|a| a.passed).count();

        enter(&mut report, Stage::Committing);
        if staged.is_empty() {
            info!("Nothing to commit");
        } else {
            match store::insert_articles(self.pool, &staged).await {
                Ok(n) => {
                    report.committed = n as usize;
                    info!(committed = n, "Committed new articles");
                }
                Err(e) => {
                    error!(error = %e, staged = staged.len(), "Commit failed; batch rolled back");
                    report.commit_error = Some(e.to_string());
                }
            }
        }

        self.deduplicate(&mut report).await;
        enter(&mut report, Stage::Done);
        report.elapsed_ms = t0.elapsed().as_millis();
        report
    }

    /// Run only the deduplication stage over the stored backlog.
    #[instrument(level = "info", skip_all)]
    pub async fn run_dedup_only(&self) -> RunReport {
        let t0 = Instant::now();
        let mut report = RunReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        self.deduplicate(&mut report).await;
        enter(&mut report, Stage::Done);
        report.elapsed_ms = t0.elapsed().as_millis();
        report
    }

    async fn load_reference_data(&self) -> Result<ReferenceData, PipelineError> {
        let entity_map = store::load_entity_map(self.pool).await?;
        if entity_map.is_empty() {
            return Err(PipelineError::NoEntities);
        }
        let existing_hashes = store::load_existing_hashes(self.pool).await?;
        Ok(ReferenceData {
            entity_map,
            existing_hashes,
        })
    }

    async fn fast_tier(
        &self,
        links: Vec<CandidateLink>,
    ) -> (Vec<(CandidateLink, ExtractedContent)>, Vec<CandidateLink>) {
        let outcomes: Vec<TierOutcome> = stream::iter(links)
            .map(|link| fast::attempt(self.fast_fetcher, link, self.settings))
            .buffer_unordered(self.settings.concurrency.fast)
            .collect()
            .await;

        let mut extracted = Vec::new();
        let mut overflow = Vec::new();
        for outcome in outcomes {
            match outcome {
                TierOutcome::Success(link, content) => extracted.push((link, content)),
                TierOutcome::RetryOtherTier(link) => overflow.push(link),
                TierOutcome::Drop(link, reason) => {
                    warn!(url = %link.url, %reason, "Dropped link");
                }
            }
        }
        info!(
            succeeded = extracted.len(),
            overflow = overflow.len(),
            "Fast extraction finished"
        );
        (extracted, overflow)
    }

    async fn robust_tier(
        &self,
        links: Vec<CandidateLink>,
    ) -> (Vec<(CandidateLink, ExtractedContent)>, usize) {
        if links.is_empty() {
            return (Vec::new(), 0);
        }
        let outcomes: Vec<TierOutcome> = stream::iter(links)
            .map(|link| robust::attempt(self.robust_fetcher, link, self.settings))
            .buffer_unordered(self.settings.concurrency.robust)
            .collect()
            .await;

        let mut extracted = Vec::new();
        let mut dropped = 0usize;
        for outcome in outcomes {
            match outcome {
                TierOutcome::Success(link, content) => extracted.push((link, content)),
                TierOutcome::RetryOtherTier(link) | TierOutcome::Drop(link, _) => {
                    warn!(url = %link.url, "Dropped link after browser attempt");
                    dropped += 1;
                }
            }
        }
        info!(succeeded = extracted.len(), dropped, "Robust extraction finished");
        (extracted, dropped)
    }

    /// Score every extracted article and build the rows to insert.
    fn stage_articles(
        &self,
        extracted: Vec<(CandidateLink, ExtractedContent)>,
        entity_map: &HashMap<String, i64>,
    ) -> Vec<NewArticle> {
        extracted
            .into_iter()
            .filter_map(|(link, content)| {
                let Some(&company_id) = entity_map.get(&link.alias) else {
                    warn!(alias = %link.alias, url = %link.url, "No company for alias; skipping");
                    return None;
                };
                let result = filter_and_score(self.rules, &content.title, &content.body, &link.alias);
                let published_at = content
                    .published_at
                    .or_else(|| parse_published(&link.api_pub_date));
                info!(
                    title = %truncate_for_log(&content.title, 80),
                    passed = result.passed,
                    score = result.score,
                    "Staged article"
                );
                Some(NewArticle {
                    company_id,
                    title: content.title,
                    url: link.url,
                    url_hash: link.url_hash,
                    body: content.body,
                    published_at,
                    search_alias: link.alias,
                    score: result.score,
                    matched_keywords: result.detail_json(),
                    passed: result.passed,
                })
            })
            .collect()
    }

    async fn deduplicate(&self, report: &mut RunReport) {
        enter(report, Stage::Deduplicating);
        if !self.settings.dedup.enabled {
            info!("Deduplication disabled");
            return;
        }
        match run_dedup(self.pool, self.embedder, self.settings).await {
            Ok(summary) => {
                report.dedup_candidates = summary.candidates;
                report.clustered_articles = summary.clustered_articles;
                report.clusters = summary.clusters;
            }
            Err(e) => {
                warn!(error = %e, "Deduplication failed; clusters left unassigned");
                report.dedup_error = Some(e.to_string());
            }
        }
    }
}
