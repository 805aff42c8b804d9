//! News listing page scraper.
//!
//! The listing page is a sequence of repeated "news cards". Each card yields
//! one [`NewsRecord`]; cards are returned in document order.
//!
//! # Card Layout
//!
//! With the default selectors a card looks like:
//!
//! ```html
//! <div class="news-list-card">
//!   <a class="news-list-card-teaser-image" href="/news/42"
//!      style="background-image:url('/img/42.jpg?w=400')"></a>
//!   <h2 class="heading-size-2"><a href="/news/42">Headline</a></h2>
//!   <time>06/05/2025</time>
//! </div>
//! ```
//!
//! A missing sub-element never drops the card: the title becomes empty and
//! the link or thumbnail becomes `None`.

use crate::config::{ConfigError, SelectorConfig, TimestampPolicy};
use crate::http::Fetch;
use crate::models::NewsRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

static STYLE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"url\((.*?)\)").expect("style url pattern is valid"));

/// Compiled selectors plus the timestamp policy.
#[derive(Debug, Clone)]
pub struct ListingRules {
    card: Selector,
    title: Selector,
    link: Selector,
    thumbnail: Selector,
    date: Selector,
    policy: TimestampPolicy,
}

impl ListingRules {
    /// Compile every selector, reporting the first one that fails to parse.
    pub fn compile(cfg: &SelectorConfig, policy: TimestampPolicy) -> Result<Self, ConfigError> {
        Ok(Self {
            card: parse_selector("card", &cfg.card)?,
            title: parse_selector("title", &cfg.title)?,
            link: parse_selector("link", &cfg.link)?,
            thumbnail: parse_selector("thumbnail", &cfg.thumbnail)?,
            date: parse_selector("date", &cfg.date)?,
            policy,
        })
    }

    pub fn policy(&self) -> TimestampPolicy {
        self.policy
    }
}

fn parse_selector(name: &'static str, selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        name,
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Format an extraction instant the way the ledger stores it,
/// e.g. `2025-05-06T10:00:00.000Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fetch the listing page and extract its cards.
///
/// Fetch failures are logged and turned into an empty result; the caller
/// still merges and persists as usual.
#[instrument(level = "info", skip_all, fields(page = %page_url))]
pub async fn fetch_listing<F: Fetch>(
    fetcher: &F,
    page_url: &Url,
    rules: &ListingRules,
) -> Vec<NewsRecord> {
    let html = match fetcher.get_text(page_url.as_str()).await {
        Ok(html) => html,
        Err(e) => {
            error!(stage = "extract", error = %e, "Error fetching news listing");
            return Vec::new();
        }
    };

    let records = extract(&html, page_url, rules, Utc::now());
    if records.is_empty() {
        warn!(stage = "extract", bytes = html.len(), "No news cards matched on the page");
    } else {
        info!(count = records.len(), "Extracted news cards");
    }
    records
}

/// Extract one [`NewsRecord`] per card in `html`, in document order.
pub fn extract(
    html: &str,
    base_url: &Url,
    rules: &ListingRules,
    extracted_at: DateTime<Utc>,
) -> Vec<NewsRecord> {
    let document = Html::parse_document(html);
    let stamp = format_timestamp(extracted_at);

    document
        .select(&rules.card)
        .map(|card| extract_one(card, base_url, rules, &stamp))
        .collect()
}

/// Build the record for a single card.
pub fn extract_one(
    card: ElementRef<'_>,
    base_url: &Url,
    rules: &ListingRules,
    extracted_at: &str,
) -> NewsRecord {
    let title = card
        .select(&rules.title)
        .flat_map(|el| el.text())
        .collect::<String>()
        .trim()
        .to_string();

    // Only the first anchor is consulted, even if it lacks an href.
    let link = card
        .select(&rules.link)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .and_then(|href| match base_url.join(href) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                debug!(%href, error = %e, "Unresolvable card link");
                None
            }
        });

    let thumbnail = card
        .select(&rules.thumbnail)
        .next()
        .and_then(|el| el.value().attr("style"))
        .and_then(|style| thumbnail_from_style(style, base_url));

    let timestamp = match rules.policy {
        TimestampPolicy::Extracted => extracted_at.to_string(),
        TimestampPolicy::Scraped => card
            .select(&rules.date)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| extracted_at.to_string()),
    };

    NewsRecord {
        title,
        link,
        thumbnail,
        timestamp,
    }
}

/// Derive an absolute, query-free thumbnail URL from an inline style.
///
/// Takes the first `url(...)` token, drops every quote character inside it,
/// resolves it against `base_url` and clears the query string.
pub fn thumbnail_from_style(style: &str, base_url: &Url) -> Option<String> {
    let raw = STYLE_URL.captures(style)?.get(1)?.as_str();
    let cleaned: String = raw.chars().filter(|c| *c != '\'' && *c != '"').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    let mut url = base_url.join(cleaned).ok()?;
    url.set_query(None);
    Some(url.to_string())
}
