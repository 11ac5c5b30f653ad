//! Error types for each failure class of the pipeline.
//!
//! Recoverable per-link errors ([`FetchError`], [`ExtractError`]) never leave
//! the extraction task that produced them; they are folded into a
//! [`crate::scrapers::TierOutcome`]. [`PipelineError`] is reserved for fatal
//! setup failures that abort a run before any network work begins.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search API rate limit hit")]
    RateLimited,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Network(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Browser error: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

impl From<chromiumoxide::error::CdpError> for FetchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        FetchError::Browser(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("Extracted text is too short ({chars} < {min} chars)")]
    TooShort { chars: usize, min: usize },

    #[error("Failed to parse article title")]
    MissingTitle,
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("Embedding provider is disabled")]
    Disabled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid embedding response: {0}")]
    Parse(String),

    #[error("Expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Local model error: {0}")]
    Local(String),

    #[error("Unsupported embedding configuration: {0}")]
    Unsupported(String),
}

impl EmbedError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            EmbedError::Network(_) => true,
            EmbedError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        EmbedError::Network(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load reference data: {0}")]
    ReferenceData(#[from] sqlx::Error),

    #[error("Company map is empty; nothing to track")]
    NoEntities,
}
