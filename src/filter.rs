//! Relevance filtering and keyword scoring.
//!
//! [`KeywordRules`] is built once from [`FilterSettings`] (one precompiled
//! alternation over every keyword phrase plus lowercase lookup tables) and
//! passed explicitly to [`filter_and_score`]. Scoring is pure: the same
//! inputs and rules always give the same [`FilterResult`].
//!
//! # Evaluation order
//!
//! 1. **Exclusion** (title only): an alias-specific phrase in the title fails
//!    the article with score 0.
//! 2. **Scoring** (title + body): each distinct matching phrase contributes its
//!    weight once. A phrase at or below the hard-exclusion weight fails the
//!    article immediately with that weight as the score.
//! 3. **Threshold**: no matches, or a sum below the pass threshold, fails.

use crate::config::FilterSettings;
use crate::models::{FilterDetail, FilterResult, KeywordMatch};
use itertools::Itertools;
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Immutable, precompiled keyword and exclusion configuration.
#[derive(Debug, Clone)]
pub struct KeywordRules {
    /// One capture group per phrase, in `keywords` order.
    matcher: Option<Regex>,
    /// (configured phrase, weight), longest phrase first
    keywords: Vec<(String, i64)>,
    /// alias → [(configured phrase, lowercase phrase)]
    exclusions: HashMap<String, Vec<(String, String)>>,
    pass_threshold: i64,
    hard_exclusion_weight: i64,
}

impl KeywordRules {
    /// Compile the rules. Phrases are ordered longest-first so a long phrase
    /// is never shadowed by a shorter one it contains. Phrases differing only
    /// in case collapse to the first configured spelling.
    pub fn new(settings: &FilterSettings) -> Result<Self, regex::Error> {
        let mut by_lowercase = HashMap::new();
        for (keyword, weight) in &settings.keywords {
            by_lowercase
                .entry(keyword.to_lowercase())
                .or_insert_with(|| (keyword.clone(), *weight));
        }
        let keywords: Vec<(String, i64)> = by_lowercase
            .into_iter()
            .sorted_by(|(a, _), (b, _)| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)))
            .map(|(_, phrase)| phrase)
            .collect();

        let matcher = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|(k, _)| format!("({})", regex::escape(k)))
                .join("|");
            let pattern = if settings.word_boundaries {
                format!(r"\b{{start-half}}(?:{alternation})\b{{end-half}}")
            } else {
                format!("(?:{alternation})")
            };
            Some(
                RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .size_limit(64 * (1 << 20))
                    .build()?,
            )
        };

        let exclusions = settings
            .exclusions
            .iter()
            .map(|(alias, phrases)| {
                let phrases = phrases
                    .iter()
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| (p.clone(), p.to_lowercase()))
                    .collect();
                (alias.clone(), phrases)
            })
            .collect();

        Ok(Self {
            matcher,
            keywords,
            exclusions,
            pass_threshold: settings.pass_threshold,
            hard_exclusion_weight: settings.hard_exclusion_weight,
        })
    }

    /// Distinct matching phrases in order of first occurrence.
    fn matches(&self, text: &str) -> Vec<KeywordMatch> {
        let Some(matcher) = &self.matcher else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        matcher
            .captures_iter(text)
            .filter_map(|caps| {
                // exactly one phrase group participates in each match
                let index = caps.iter().skip(1).position(|group| group.is_some())?;
                let (keyword, weight) = &self.keywords[index];
                seen.insert(index).then(|| KeywordMatch {
                    keyword: keyword.clone(),
                    weight: *weight,
                })
            })
            .collect()
    }
}

/// Decide whether an article is relevant to `alias` and score it.
pub fn filter_and_score(rules: &KeywordRules, title: &str, body: &str, alias: &str) -> FilterResult {
    if let Some(phrases) = rules.exclusions.get(alias) {
        let lowered_title = title.to_lowercase();
        if let Some((phrase, _)) = phrases.iter().find(|(_, lower)| lowered_title.contains(lower)) {
            debug!(%title, exclusion = %phrase, "Filtered by exclusion rule");
            return FilterResult {
                passed: false,
                score: 0,
                detail: FilterDetail::Excluded(phrase.clone()),
            };
        }
    }

    let text = format!("{title} {body}");
    let mut score = 0i64;
    let mut matched = Vec::new();
    for m in rules.matches(&text) {
        let weight = m.weight;
        score += weight;
        matched.push(m);
        if weight <= rules.hard_exclusion_weight {
            debug!(%title, keyword = %matched[matched.len() - 1].keyword, "Filtered as irrelevant");
            return FilterResult {
                passed: false,
                score: weight,
                detail: FilterDetail::Matches(matched),
            };
        }
    }

    if matched.is_empty() || score < rules.pass_threshold {
        debug!(%title, score, threshold = rules.pass_threshold, "Filtered by low score");
        return FilterResult {
            passed: false,
            score,
            detail: FilterDetail::Matches(matched),
        };
    }

    info!(%title, score, "Article passed relevance filter");
    FilterResult {
        passed: true,
        score,
        detail: FilterDetail::Matches(matched),
    }
}
