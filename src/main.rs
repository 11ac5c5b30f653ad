//! # InsightBee News
//!
//! A batch ingestion pipeline for company news. It discovers article links
//! per tracked company through a news search API, extracts article text with
//! a fast HTTP path and a headless-browser fallback, scores each article for
//! relevance, stores the batch atomically, and clusters near-duplicate
//! coverage by embedding similarity.
//!
//! ## Usage
//!
//! ```sh
//! insightbee_news --init-db
//! insightbee_news -c ./insightbee.yaml --report-dir ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Reference data**: load the company map and stored URL hashes
//! 2. **Discovery**: page the search API per company alias
//! 3. **Extraction**: fast HTTP tier (high concurrency), then browser tier
//!    for the overflow (near-serial)
//! 4. **Scoring**: keyword relevance filter
//! 5. **Commit**: one transaction for the whole batch
//! 6. **Deduplication**: embedding similarity clustering over the backlog

use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod embedding;
mod error;
mod filter;
mod models;
mod outputs;
mod pipeline;
mod scrapers;
mod store;
mod utils;

use cli::Cli;
use config::{Settings, load_settings};
use filter::KeywordRules;
use outputs::json;
use pipeline::Pipeline;
use scrapers::fast::HttpFetcher;
use scrapers::robust::BrowserFetcher;
use scrapers::search::NaverSearch;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    info!("insightbee_news starting up");

    let args = Cli::parse();
    debug!(config = %args.config.display(), dedup_only = args.dedup_only, "Parsed CLI arguments");

    let settings = if args.config.exists() {
        load_settings(&args.config)?
    } else {
        warn!(path = %args.config.display(), "Settings file not found; using defaults");
        Settings::default()
    };

    let pool = store::connect(&args.database_url).await?;
    store::migrate(&pool).await?;
    if args.init_db {
        info!("Database initialized");
        return Ok(());
    }

    let (client_id, client_secret) = match (&args.naver_client_id, &args.naver_client_secret) {
        (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
        _ if args.dedup_only => ("", ""),
        _ => {
            error!("NAVER_CLIENT_ID and NAVER_CLIENT_SECRET are required for a full run");
            return Err("missing search API credentials".into());
        }
    };

    let rules = KeywordRules::new(&settings.filter)?;
    let search = NaverSearch::new(&settings.search, client_id, client_secret)?;
    let fast_fetcher = HttpFetcher::new(&settings.extraction)?;
    let robust_fetcher = BrowserFetcher::new(&settings);
    let embedder = embedding::create_embedder(&settings.embedding)?;

    let pipeline = Pipeline {
        pool: &pool,
        settings: &settings,
        rules: &rules,
        search: &search,
        fast_fetcher: &fast_fetcher,
        robust_fetcher: &robust_fetcher,
        embedder: &embedder,
    };

    let report = if args.dedup_only {
        pipeline.run_dedup_only().await
    } else {
        pipeline.run().await
    };

    info!(
        stage = %report.stage,
        entities = report.entities,
        discovered = report.discovered,
        fast_succeeded = report.fast_succeeded,
        robust_succeeded = report.robust_succeeded,
        dropped = report.dropped,
        passed = report.passed,
        committed = report.committed,
        dedup_candidates = report.dedup_candidates,
        clusters = report.clusters,
        clustered_articles = report.clustered_articles,
        elapsed_ms = report.elapsed_ms,
        "Run finished"
    );
    if let Some(e) = &report.commit_error {
        warn!(error = %e, "Run finished without committing its batch");
    }
    if let Some(e) = &report.dedup_error {
        warn!(error = %e, "Deduplication did not complete");
    }

    if let Some(dir) = &args.report_dir {
        if let Err(e) = json::write_run_report(&report, dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to write run report");
        }
    }

    pool.close().await;

    if report.succeeded() {
        Ok(())
    } else {
        Err(report.abort_reason.unwrap_or_default().into())
    }
}
