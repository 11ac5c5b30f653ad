//! Pipeline settings loaded from a YAML file.
//!
//! Every field has a default mirroring the production constants, so an empty
//! file is a valid configuration. Settings are loaded and validated once at
//! process start and then shared read-only.
//!
//! ```yaml
//! sources:
//!   allowed_hosts: [chosun.com, yna.co.kr]
//!   render_required_hosts: [jtbc.co.kr]
//!   body_selectors:
//!     chosun.com: section.article-body
//! filter:
//!   pass_threshold: 10
//!   keywords:
//!     채용: 15
//!     부고: -999
//!   exclusions:
//!     KT: ["KT&G", "kt wiz"]
//! ```

use crate::error::ConfigError;
use scraper::Selector;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub search: SearchSettings,
    pub sources: SourceSettings,
    pub extraction: ExtractionSettings,
    pub browser: BrowserSettings,
    pub concurrency: ConcurrencySettings,
    pub filter: FilterSettings,
    pub dedup: DedupSettings,
    pub embedding: EmbeddingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub endpoint: String,
    /// Items requested per call (`display`).
    pub page_size: u32,
    /// Highest `start` offset the provider accepts.
    pub max_start: u32,
    /// Upper bound on items requested per alias per run.
    pub per_alias_cap: u32,
    /// Pause before every search call.
    pub request_interval_ms: u64,
    /// Pause before the single retry after a 429.
    pub rate_limit_retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub sort: String,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://openapi.naver.com/v1/search/news.json".to_string(),
            page_size: 100,
            max_start: 1000,
            per_alias_cap: 300,
            request_interval_ms: 500,
            rate_limit_retry_delay_ms: 1000,
            timeout_secs: 20,
            sort: "date".to_string(),
        }
    }
}

impl SearchSettings {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn rate_limit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Trusted publisher domains; links elsewhere are discarded.
    pub allowed_hosts: BTreeSet<String>,
    /// Domains whose articles need a rendered DOM; these skip the fast path.
    pub render_required_hosts: BTreeSet<String>,
    /// Domain → CSS selector for the article body.
    pub body_selectors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub min_body_chars: usize,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_body_chars: 100,
            fetch_timeout_secs: 20,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Bound on navigation plus waiting for `<body>`.
    pub render_timeout_secs: u64,
    pub chrome_executable: Option<String>,
    pub no_sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            render_timeout_secs: 20,
            chrome_executable: None,
            no_sandbox: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConcurrencySettings {
    pub discovery: usize,
    pub fast: usize,
    pub robust: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            discovery: 2,
            fast: 50,
            robust: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub pass_threshold: i64,
    /// A matched keyword at or below this weight fails the article outright.
    pub hard_exclusion_weight: i64,
    /// Anchor keyword matches on word boundaries. Agglutinative languages
    /// (particles glued to nouns) usually want this off.
    pub word_boundaries: bool,
    pub keywords: BTreeMap<String, i64>,
    /// Alias → title phrases that disqualify an article for that alias.
    pub exclusions: BTreeMap<String, Vec<String>>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            pass_threshold: 10,
            hard_exclusion_weight: -999,
            word_boundaries: true,
            keywords: BTreeMap::new(),
            exclusions: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub min_cluster_size: usize,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.8,
            min_cluster_size: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `http`, `local` or `disabled`.
    pub provider: String,
    /// OpenAI-compatible `/embeddings` endpoint for the `http` provider.
    pub url: String,
    pub model: String,
    /// Environment variable holding the bearer token, if any.
    pub api_key_env: Option<String>,
    pub batch_size: usize,
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            url: "http://localhost:11434/v1/embeddings".to_string(),
            model: "multilingual-e5-small".to_string(),
            api_key_env: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 60,
        }
    }
}

/// Load settings from a YAML file and validate them.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let settings = parse_settings(&content)?;
    info!(
        allowed_hosts = settings.sources.allowed_hosts.len(),
        keywords = settings.filter.keywords.len(),
        "Loaded settings"
    );
    Ok(settings)
}

/// Parse and validate settings from YAML text.
pub fn parse_settings(yaml: &str) -> Result<Settings, ConfigError> {
    let mut settings: Settings = if yaml.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    settings.normalize();
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Lowercase host names so lookups against parsed URLs line up.
    fn normalize(&mut self) {
        let lower = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|h| h.trim().to_lowercase()).collect()
        };
        self.sources.allowed_hosts = lower(&self.sources.allowed_hosts);
        self.sources.render_required_hosts = lower(&self.sources.render_required_hosts);
        self.sources.body_selectors = std::mem::take(&mut self.sources.body_selectors)
            .into_iter()
            .map(|(host, sel)| (host.trim().to_lowercase(), sel))
            .collect();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.search.page_size) {
            return Err(ConfigError::Invalid("search.page_size must be in 1..=100".into()));
        }
        if self.search.max_start == 0 || self.search.per_alias_cap == 0 {
            return Err(ConfigError::Invalid(
                "search.max_start and search.per_alias_cap must be > 0".into(),
            ));
        }
        let c = &self.concurrency;
        if c.discovery == 0 || c.fast == 0 || c.robust == 0 {
            return Err(ConfigError::Invalid("concurrency limits must be >= 1".into()));
        }
        if !(self.dedup.similarity_threshold > 0.0 && self.dedup.similarity_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "dedup.similarity_threshold must be in (0.0, 1.0]".into(),
            ));
        }
        if self.dedup.min_cluster_size < 2 {
            return Err(ConfigError::Invalid("dedup.min_cluster_size must be >= 2".into()));
        }
        for (host, sel) in &self.sources.body_selectors {
            if Selector::parse(sel).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "sources.body_selectors.{host}: invalid selector '{sel}'"
                )));
            }
        }
        if self.filter.keywords.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("filter.keywords must not contain empty phrases".into()));
        }
        match self.embedding.provider.as_str() {
            "disabled" | "http" | "local" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown embedding provider: '{other}'. Must be disabled, http, or local."
                )));
            }
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid("embedding.batch_size must be > 0".into()));
        }
        Ok(())
    }
}
