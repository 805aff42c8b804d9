//! Runtime configuration: CLI/environment values layered over an optional
//! YAML file, layered over built-in defaults.
//!
//! # Precedence
//!
//! 1. Flags and environment variables ([`Cli`])
//! 2. The YAML file named by `--config` / `CONFIG_PATH`
//! 3. Defaults
//!
//! The page URL, repository URL and commit identity have no default; a run
//! without them fails at startup with [`ConfigError::Missing`].
//!
//! # YAML Layout
//!
//! ```yaml
//! url: https://n.example/news
//! repo_url: https://token@github.com/me/state.git
//! author_name: news-bot
//! author_email: bot@n.example
//! state_file: postedNews.json
//! branch: master
//! timestamp_policy: scraped
//! selectors:
//!   card: .news-list-card
//!   date: .news-list-card-date
//! enrich:
//!   enabled: true
//!   max_width: 480
//! ```

use crate::cli::Cli;
use crate::scrapers::listing::ListingRules;
use crate::utils::redact_credentials;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_STATE_FILE: &str = "postedNews.json";
pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_COMMIT_MESSAGE: &str = "Update postedNews.json";
pub const DEFAULT_THUMBNAILS_DIR: &str = "thumbnails";
pub const DEFAULT_THUMBNAIL_MAX_WIDTH: u32 = 600;
pub const DEFAULT_ENRICH_CONCURRENCY: usize = 4;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Errors that stop the tracker before any work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}` (set it in the environment or the config file)")]
    Missing(&'static str),
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("`url` is not a valid absolute URL ({value}): {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid CSS selector for `{name}` ({selector}): {reason}")]
    Selector {
        name: &'static str,
        selector: String,
        reason: String,
    },
    #[error("`{name}` must be greater than zero")]
    Zero { name: &'static str },
}

/// Where a record's timestamp comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// The moment the card was extracted, RFC 3339 in UTC.
    #[default]
    Extracted,
    /// The text of the card's date element, falling back to extraction time.
    Scraped,
}

/// CSS selectors describing the listing page layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// One repeated block per news item.
    pub card: String,
    /// Heading link whose text is the title.
    pub title: String,
    /// Anchor whose `href` is the article link; the first match is used.
    pub link: String,
    /// Element whose inline `style` carries the thumbnail `url(...)`.
    pub thumbnail: String,
    /// Element whose text is the publish date.
    pub date: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            card: ".news-list-card".to_string(),
            title: ".heading-size-2 a".to_string(),
            link: "a".to_string(),
            thumbnail: "a.news-list-card-teaser-image".to_string(),
            date: "time".to_string(),
        }
    }
}

/// Thumbnail enrichment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichSettings {
    pub enabled: bool,
    pub output_dir: PathBuf,
    pub max_width: u32,
    pub concurrency: usize,
}

impl Default for EnrichSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::from(DEFAULT_THUMBNAILS_DIR),
            max_width: DEFAULT_THUMBNAIL_MAX_WIDTH,
            concurrency: DEFAULT_ENRICH_CONCURRENCY,
        }
    }
}

/// Identity recorded on state commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileEnrich {
    enabled: Option<bool>,
    output_dir: Option<PathBuf>,
    max_width: Option<u32>,
    concurrency: Option<usize>,
}

/// Shape of the optional YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    url: Option<String>,
    repo_url: Option<String>,
    author_name: Option<String>,
    author_email: Option<String>,
    state_file: Option<PathBuf>,
    branch: Option<String>,
    commit_message: Option<String>,
    timestamp_policy: Option<TimestampPolicy>,
    sync_unchanged: Option<bool>,
    http_timeout_secs: Option<u64>,
    selectors: SelectorConfig,
    enrich: FileEnrich,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub page_url: Url,
    pub repo_url: String,
    pub author: CommitAuthor,
    pub state_file: PathBuf,
    pub branch: String,
    pub commit_message: String,
    pub sync_unchanged: bool,
    pub http_timeout: Duration,
    pub rules: ListingRules,
    pub enrich: EnrichSettings,
}

impl Settings {
    /// Merge CLI/environment values with the optional YAML file and defaults.
    #[instrument(level = "info", skip_all, fields(config = ?cli.config))]
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        let url = required(cli.url, file.url, "url")?;
        let page_url = Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
            value: url.clone(),
            source,
        })?;
        let repo_url = required(cli.repo_url, file.repo_url, "repo_url")?;
        let author = CommitAuthor {
            name: required(cli.author_name, file.author_name, "author_name")?,
            email: required(cli.author_email, file.author_email, "author_email")?,
        };

        let policy = cli
            .timestamp_policy
            .or(file.timestamp_policy)
            .unwrap_or_default();
        let rules = ListingRules::compile(&file.selectors, policy)?;

        let defaults = EnrichSettings::default();
        let enrich = EnrichSettings {
            enabled: cli.enrich.or(file.enrich.enabled).unwrap_or(defaults.enabled),
            output_dir: cli
                .thumbnails_dir
                .or(file.enrich.output_dir)
                .unwrap_or(defaults.output_dir),
            max_width: positive(
                cli.thumbnail_max_width
                    .or(file.enrich.max_width)
                    .unwrap_or(defaults.max_width),
                "thumbnail_max_width",
            )?,
            concurrency: positive(
                cli.enrich_concurrency
                    .or(file.enrich.concurrency)
                    .unwrap_or(defaults.concurrency),
                "enrich_concurrency",
            )?,
        };

        let timeout_secs = positive(
            cli.http_timeout_secs
                .or(file.http_timeout_secs)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            "http_timeout_secs",
        )?;

        let settings = Settings {
            page_url,
            repo_url,
            author,
            state_file: cli
                .state_file
                .or(file.state_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            branch: cli
                .branch
                .or(file.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            commit_message: cli
                .commit_message
                .or(file.commit_message)
                .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
            sync_unchanged: cli.sync_unchanged.or(file.sync_unchanged).unwrap_or(true),
            http_timeout: Duration::from_secs(timeout_secs),
            rules,
            enrich,
        };

        debug!(
            page_url = %settings.page_url,
            repo_url = %redact_credentials(&settings.repo_url),
            state_file = %settings.state_file.display(),
            branch = %settings.branch,
            policy = ?policy,
            enrich = settings.enrich.enabled,
            "Resolved settings"
        );
        Ok(settings)
    }
}

fn required(
    primary: Option<String>,
    fallback: Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    primary
        .or(fallback)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn positive<T: Default + PartialEq>(value: T, name: &'static str) -> Result<T, ConfigError> {
    if value == T::default() {
        Err(ConfigError::Zero { name })
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli() -> Cli {
        Cli {
            url: Some("https://n.example/news".to_string()),
            repo_url: Some("https://token@git.example/state.git".to_string()),
            author_name: Some("bot".to_string()),
            author_email: Some("bot@n.example".to_string()),
            ..Cli::default()
        }
    }

    fn yaml_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_apply() {
        let settings = Settings::resolve(cli()).unwrap();
        assert_eq!(settings.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert_eq!(settings.branch, "master");
        assert_eq!(settings.commit_message, "Update postedNews.json");
        assert!(settings.sync_unchanged);
        assert_eq!(settings.rules.policy(), TimestampPolicy::Extracted);
        assert_eq!(settings.enrich, EnrichSettings::default());
        assert_eq!(settings.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_required_is_fatal() {
        let err = Settings::resolve(Cli {
            author_email: None,
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("author_email")));

        let err = Settings::resolve(Cli {
            url: Some("   ".to_string()),
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("url")));
    }

    #[test]
    fn test_relative_url_is_rejected() {
        let err = Settings::resolve(Cli {
            url: Some("/news".to_string()),
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_yaml_fills_gaps_and_cli_wins() {
        let file = yaml_file(
            r#"
url: https://other.example/list
author_name: yaml-bot
branch: main
timestamp_policy: scraped
selectors:
  date: .card-date
enrich:
  enabled: true
  max_width: 320
"#,
        );
        let settings = Settings::resolve(Cli {
            config: Some(file.path().to_path_buf()),
            author_name: None,
            ..cli()
        })
        .unwrap();

        assert_eq!(settings.page_url.as_str(), "https://n.example/news");
        assert_eq!(settings.author.name, "yaml-bot");
        assert_eq!(settings.branch, "main");
        assert_eq!(settings.rules.policy(), TimestampPolicy::Scraped);
        assert!(settings.enrich.enabled);
        assert_eq!(settings.enrich.max_width, 320);
        assert_eq!(settings.enrich.concurrency, DEFAULT_ENRICH_CONCURRENCY);
    }

    #[test]
    fn test_bad_yaml_is_reported() {
        let file = yaml_file("enrich: [not, a, map]");
        let err = Settings::resolve(Cli {
            config: Some(file.path().to_path_buf()),
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let file = yaml_file("selectors:\n  card: \"<<<\"\n");
        let err = Settings::resolve(Cli {
            config: Some(file.path().to_path_buf()),
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Selector { name: "card", .. }));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = Settings::resolve(Cli {
            enrich_concurrency: Some(0),
            ..cli()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Zero { name: "enrich_concurrency" }));
    }
}
