//! Link discovery and two-tier article extraction.
//!
//! This module contains the acquisition side of the pipeline. Links are
//! discovered once through the search API, then every link goes through the
//! fast tier and only the overflow goes through the robust tier:
//!
//! 1. **Discovery** ([`search`]): page the search API per alias, keep trusted
//!    and not-yet-ingested links
//! 2. **Fast path** ([`fast`]): plain HTTP GET, cheap and highly concurrent
//! 3. **Robust path** ([`robust`]): headless browser render, one isolated
//!    session per link, near-serialized
//!
//! Both tiers share [`extract::parse_article`] and report back a
//! [`TierOutcome`] instead of raising errors, so a failed link never
//! affects its siblings.
//!
//! # Tier transitions
//!
//! | Tier | Success | Failure |
//! |------|---------|---------|
//! | fast | [`TierOutcome::Success`] | [`TierOutcome::RetryOtherTier`] |
//! | robust | [`TierOutcome::Success`] | [`TierOutcome::Drop`] |

use crate::error::FetchError;
use crate::models::{CandidateLink, ExtractedContent};

pub mod extract;
pub mod fast;
pub mod robust;
pub mod search;

/// Anything that can turn a URL into an HTML document.
///
/// Implemented by [`fast::HttpFetcher`] and [`robust::BrowserFetcher`];
/// tests substitute in-memory fakes.
pub trait PageFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

/// The result of one extraction attempt for one link.
#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    /// Content was extracted; the caller filters and stages it.
    Success(CandidateLink, ExtractedContent),
    /// The fast tier could not handle the link; hand it to the robust tier.
    RetryOtherTier(CandidateLink),
    /// The robust tier failed too; the link is abandoned for this run.
    Drop(CandidateLink, String),
}
