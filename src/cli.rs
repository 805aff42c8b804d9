//! Command-line interface definitions for the news tracker.
//!
//! Every option can be given as a flag or through the environment, which is
//! how scheduled jobs normally configure the tracker. Values left unset here
//! fall back to the optional YAML file and then to built-in defaults; see
//! [`crate::config::Settings::resolve`].

use crate::config::TimestampPolicy;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the news tracker.
///
/// # Examples
///
/// ```sh
/// # Everything from the environment (or a .env file)
/// URL=https://n.example/news REPOURLWITHTOKEN=https://token@github.com/me/state.git \
///   NAME=bot EMAIL=bot@n.example news_tracker
///
/// # With a YAML file supplying selectors and enrichment settings
/// news_tracker -c ./tracker.yaml --enrich true
/// ```
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// News listing page to scrape
    #[arg(long, env = "URL")]
    pub url: Option<String>,

    /// Remote state repository URL, including its access token
    #[arg(long, env = "REPOURLWITHTOKEN", hide_env_values = true)]
    pub repo_url: Option<String>,

    /// Commit author name for state updates
    #[arg(long, env = "NAME")]
    pub author_name: Option<String>,

    /// Commit author email for state updates
    #[arg(long, env = "EMAIL")]
    pub author_email: Option<String>,

    /// Local ledger file holding every news item seen so far
    #[arg(long, env = "STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Branch of the state repository to push to
    #[arg(long, env = "BRANCH")]
    pub branch: Option<String>,

    /// Commit message used for state updates
    #[arg(long, env = "COMMIT_MESSAGE")]
    pub commit_message: Option<String>,

    /// Where a record's timestamp comes from
    #[arg(long, env = "TIMESTAMP_POLICY", value_enum)]
    pub timestamp_policy: Option<TimestampPolicy>,

    /// Push to the remote even when the run found nothing new
    #[arg(long, env = "SYNC_UNCHANGED")]
    pub sync_unchanged: Option<bool>,

    /// Download and resize thumbnails of newly seen items
    #[arg(long, env = "ENRICH")]
    pub enrich: Option<bool>,

    /// Directory receiving resized thumbnails
    #[arg(long, env = "THUMBNAILS_DIR")]
    pub thumbnails_dir: Option<PathBuf>,

    /// Maximum width of a resized thumbnail, in pixels
    #[arg(long, env = "THUMBNAIL_MAX_WIDTH")]
    pub thumbnail_max_width: Option<u32>,

    /// Number of thumbnails processed at once
    #[arg(long, env = "ENRICH_CONCURRENCY")]
    pub enrich_concurrency: Option<usize>,

    /// Per-request HTTP timeout, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "news_tracker",
            "--url",
            "https://n.example/news",
            "--repo-url",
            "https://token@git.example/state.git",
            "--author-name",
            "bot",
            "--author-email",
            "bot@n.example",
        ]);

        assert_eq!(cli.url.as_deref(), Some("https://n.example/news"));
        assert_eq!(cli.author_name.as_deref(), Some("bot"));
        assert_eq!(cli.author_email.as_deref(), Some("bot@n.example"));
    }

    #[test]
    fn test_cli_optional_values() {
        let cli = Cli::parse_from([
            "news_tracker",
            "-c",
            "/etc/tracker.yaml",
            "--timestamp-policy",
            "scraped",
            "--enrich",
            "true",
            "--thumbnail-max-width",
            "320",
        ]);

        assert_eq!(cli.config, Some(PathBuf::from("/etc/tracker.yaml")));
        assert_eq!(cli.timestamp_policy, Some(TimestampPolicy::Scraped));
        assert_eq!(cli.enrich, Some(true));
        assert_eq!(cli.thumbnail_max_width, Some(320));
    }
}
