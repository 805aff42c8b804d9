//! One tracker run, end to end.
//!
//! ```text
//! fetch_listing ─┐
//!                ├─> merge ─> enrich (optional) ─> save
//! store.load ────┘
//! ```
//!
//! Extraction failures shrink the batch to nothing but never stop the run,
//! so `save` is reached even when the page is down. Only a corrupt state
//! file or a failed save aborts.

use crate::config::Settings;
use crate::dedup::merge;
use crate::enrich::{EnrichReport, enrich_records};
use crate::http::Fetch;
use crate::scrapers::listing::fetch_listing;
use crate::store::{RemoteSync, StateStore, StoreError};
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not load seen-set: {0}")]
    Load(#[source] StoreError),
    #[error("could not save seen-set: {0}")]
    Save(#[source] StoreError),
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub extracted: usize,
    pub previously_seen: usize,
    pub added: usize,
    pub enrichment: Option<EnrichReport>,
    /// Whether the remote copy was updated (or confirmed up to date).
    pub synced: bool,
}

/// Scrape, merge, optionally enrich, and persist.
#[instrument(level = "info", skip_all, fields(page = %settings.page_url))]
pub async fn run<F, R>(
    fetcher: &F,
    store: &StateStore<R>,
    settings: &Settings,
) -> Result<RunReport, PipelineError>
where
    F: Fetch,
    R: RemoteSync,
{
    let (extracted, loaded) = tokio::join!(
        fetch_listing(fetcher, &settings.page_url, &settings.rules),
        store.load()
    );
    let seen = loaded.map_err(PipelineError::Load)?;

    let mut report = RunReport {
        extracted: extracted.len(),
        previously_seen: seen.len(),
        ..RunReport::default()
    };

    let merged = merge(&seen, extracted);
    let added = merged.added_since(seen.len());
    report.added = added.len();
    info!(
        extracted = report.extracted,
        previously_seen = report.previously_seen,
        added = report.added,
        "Merged news items"
    );
    for record in added {
        info!(title = %record.title, link = ?record.link, "New item");
    }

    if settings.enrich.enabled && !added.is_empty() {
        report.enrichment = Some(enrich_records(fetcher, added, &settings.enrich).await);
    }

    if added.is_empty() && !settings.sync_unchanged {
        store
            .write_local(&merged)
            .await
            .map_err(PipelineError::Save)?;
        info!("Nothing new; skipping remote sync");
    } else {
        store.save(&merged).await.map_err(PipelineError::Save)?;
        report.synced = true;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CommitAuthor, EnrichSettings, SelectorConfig, TimestampPolicy,
    };
    use crate::enrich::tests::png;
    use crate::http::tests::StaticFetcher;
    use crate::models::SeenSet;
    use crate::models::tests::record;
    use crate::scrapers::listing::ListingRules;
    use crate::store::tests::RecordingRemote;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use url::Url;

    const PAGE_URL: &str = "https://n.example/news";

    const PAGE: &str = r#"
        <div class="news-list-card">
          <a class="news-list-card-teaser-image" href="/news/1"
             style="background-image:url('/img/1.png?w=400')"></a>
          <h2 class="heading-size-2"><a href="/news/1">One</a></h2>
        </div>
        <div class="news-list-card">
          <h2 class="heading-size-2"><a href="/news/2">Two</a></h2>
        </div>
    "#;

    const EMPTY_PAGE: &str = "<html><body><p>Nothing today</p></body></html>";

    fn settings(dir: &Path) -> Settings {
        Settings {
            page_url: Url::parse(PAGE_URL).unwrap(),
            repo_url: "https://token@git.example/state.git".to_string(),
            author: CommitAuthor {
                name: "bot".to_string(),
                email: "bot@n.example".to_string(),
            },
            state_file: dir.join("postedNews.json"),
            branch: "master".to_string(),
            commit_message: "Update postedNews.json".to_string(),
            sync_unchanged: true,
            http_timeout: Duration::from_secs(5),
            rules: ListingRules::compile(&SelectorConfig::default(), TimestampPolicy::Extracted)
                .unwrap(),
            enrich: EnrichSettings {
                output_dir: dir.join("thumbs"),
                ..EnrichSettings::default()
            },
        }
    }

    fn store(path: &PathBuf, fail: bool) -> StateStore<RecordingRemote> {
        StateStore::new(
            path,
            RecordingRemote {
                fail,
                ..RecordingRemote::default()
            },
        )
    }

    async fn seed(path: &PathBuf, seen: &SeenSet) {
        store(path, false).write_local(seen).await.unwrap();
    }

    #[tokio::test]
    async fn test_first_run_records_every_card() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let fetcher = StaticFetcher::default().with(PAGE_URL, PAGE);
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(report.extracted, 2);
        assert_eq!(report.previously_seen, 0);
        assert_eq!(report.added, 2);
        assert!(report.synced);
        assert_eq!(report.enrichment, None);

        let saved = store.load().await.unwrap();
        let links: Vec<_> = saved.iter().filter_map(|r| r.link.as_deref()).collect();
        assert_eq!(links, vec!["https://n.example/news/1", "https://n.example/news/2"]);
        assert_eq!(store.remote().published.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_page_still_saves_unchanged_set() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let prior = SeenSet::from(vec![record("Old", Some("https://n.example/news/0"))]);
        seed(&settings.state_file, &prior).await;

        let fetcher = StaticFetcher::default().with(PAGE_URL, EMPTY_PAGE);
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(report.extracted, 0);
        assert_eq!(report.added, 0);
        assert!(report.synced);
        assert_eq!(store.load().await.unwrap(), prior);
        assert_eq!(store.remote().published.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_page_still_saves() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let fetcher = StaticFetcher::default();
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(report.extracted, 0);
        assert!(report.synced);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_card_leaves_set_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let prior = SeenSet::from(vec![
            record("One (first seen)", Some("https://n.example/news/1")),
            record("Two (first seen)", Some("https://n.example/news/2")),
        ]);
        seed(&settings.state_file, &prior).await;

        let fetcher = StaticFetcher::default().with(PAGE_URL, PAGE);
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(report.extracted, 2);
        assert_eq!(report.added, 0);
        assert_eq!(store.load().await.unwrap(), prior);
    }

    #[tokio::test]
    async fn test_unchanged_run_can_skip_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.sync_unchanged = false;
        let fetcher = StaticFetcher::default().with(PAGE_URL, EMPTY_PAGE);
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert!(!report.synced);
        assert!(store.remote().published.borrow().is_empty());
        assert!(settings.state_file.exists());
    }

    #[tokio::test]
    async fn test_push_failure_keeps_local_merge_for_next_run() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let fetcher = StaticFetcher::default().with(PAGE_URL, PAGE);

        let failing = store(&settings.state_file, true);
        let err = run(&fetcher, &failing, &settings).await.unwrap_err();
        assert!(matches!(err, PipelineError::Save(StoreError::Git { .. })));

        let retry = store(&settings.state_file, false);
        let report = run(&fetcher, &retry, &settings).await.unwrap();
        assert_eq!(report.previously_seen, 2);
        assert_eq!(report.added, 0);
        assert!(report.synced);

        let published = retry.remote().published.borrow();
        let pushed: SeenSet = serde_json::from_str(&published[0]).unwrap();
        assert_eq!(pushed.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_state_aborts_before_save() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        std::fs::write(&settings.state_file, "not json").unwrap();
        let fetcher = StaticFetcher::default().with(PAGE_URL, PAGE);
        let store = store(&settings.state_file, false);

        let err = run(&fetcher, &store, &settings).await.unwrap_err();
        assert!(matches!(err, PipelineError::Load(StoreError::Corrupt { .. })));
        assert!(store.remote().published.borrow().is_empty());
        assert_eq!(std::fs::read_to_string(&settings.state_file).unwrap(), "not json");
    }

    #[tokio::test]
    async fn test_enrichment_runs_for_new_items_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut settings = settings(tmp.path());
        settings.enrich.enabled = true;
        settings.enrich.max_width = 10;

        let fetcher = StaticFetcher::default()
            .with(PAGE_URL, PAGE)
            .with("https://n.example/img/1.png", png(40, 20));
        let store = store(&settings.state_file, false);

        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(
            report.enrichment,
            Some(EnrichReport {
                succeeded: 1,
                failed: 0,
                skipped: 1
            })
        );
        let saved: Vec<_> = std::fs::read_dir(&settings.enrich.output_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].starts_with("one-"), "unexpected file {saved:?}");

        // Second run: nothing new, so no enrichment pass at all.
        let report = run(&fetcher, &store, &settings).await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.enrichment, None);
    }
}
