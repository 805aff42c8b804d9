//! # News Tracker
//!
//! Scrapes a news listing page, keeps a ledger of every item seen so far,
//! and publishes that ledger to a git repository so the next run, on this
//! machine or another, only reports what is genuinely new.
//!
//! ## Features
//!
//! - Extracts title, link, thumbnail and timestamp from each news card
//! - Deduplicates by link against the persisted ledger (`postedNews.json`)
//! - Optionally downloads and resizes thumbnails of new items
//! - Commits and pushes the ledger from a throwaway clone
//!
//! ## Usage
//!
//! ```sh
//! URL=https://n.example/news \
//! REPOURLWITHTOKEN=https://token@github.com/me/state.git \
//! NAME=news-bot EMAIL=bot@n.example \
//!   news_tracker
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Extract** the listing page and **load** the ledger, concurrently
//! 2. **Merge** new items into the ledger
//! 3. **Enrich** new items with resized thumbnails (optional, bounded parallelism)
//! 4. **Save** the ledger locally, then commit and push it

use clap::Parser;
use std::error::Error;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dedup;
mod enrich;
mod http;
mod models;
mod pipeline;
mod scrapers;
mod store;
mod utils;

use cli::Cli;
use config::Settings;
use http::{ReqwestFetcher, RetryFetch};
use store::StateStore;
use store::remote::GitRemote;
use utils::redact_credentials;

const FETCH_RETRIES: usize = 3;
const FETCH_BASE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("news_tracker starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) => debug!(error = %e, "No .env loaded"),
    }

    let args = Cli::parse();
    let settings = match Settings::resolve(args) {
        Ok(settings) => settings,
        Err(e) => {
            error!(stage = "config", error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        page = %settings.page_url,
        repo = %redact_credentials(&settings.repo_url),
        state_file = %settings.state_file.display(),
        timestamps = ?settings.rules.policy(),
        enrich = settings.enrich.enabled,
        "Configuration loaded"
    );

    let fetcher = RetryFetch::new(
        ReqwestFetcher::new(settings.http_timeout)?,
        FETCH_RETRIES,
        FETCH_BASE_DELAY,
    );
    let remote = GitRemote {
        repo_url: settings.repo_url.clone(),
        branch: settings.branch.clone(),
        author: settings.author.clone(),
        message: settings.commit_message.clone(),
    };
    let store = StateStore::new(settings.state_file.clone(), remote);

    let report = match pipeline::run(&fetcher, &store, &settings).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, path = %store.path().display(), "Run failed");
            return Err(e.into());
        }
    };

    let elapsed = start_time.elapsed();
    info!(
        extracted = report.extracted,
        previously_seen = report.previously_seen,
        added = report.added,
        enriched = report.enrichment.map(|e| e.succeeded),
        enrich_failed = report.enrichment.map(|e| e.failed),
        synced = report.synced,
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
